// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The observed-remove set: the map core keyed by value fingerprint, so
//! two adds of equal values collapse to one live entry under the larger
//! id. Wire batches are gzip-compressed JSON arrays with two element
//! shapes: a bare id string for a deletion, `[id, value]` for an
//! insertion.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::trace;

use crate::canon;
use crate::error::{Error, Result};
use crate::map::{Batch, Config, ORMap};
use crate::observer::{NullObserver, Observer, SetObserver};
use crate::store::StateStore;

/// Serialized form of one operation on the wire. Deserialization tries
/// the bare-string deletion shape before the insertion pair.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireOp<V> {
    Delete(String),
    Insert((String, V)),
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireOpRef<'a, V> {
    Delete(&'a str),
    Insert((&'a str, &'a V)),
}

/// Compresses a structured batch into the wire form. Deletion keys are
/// dropped; the receiver recovers them (see [`ORSet::process`]).
fn encode<V: Serialize>(batch: &Batch<V>) -> Result<Vec<u8>> {
    let (insertions, deletions) = batch;
    let mut ops: Vec<WireOpRef<V>> = Vec::with_capacity(insertions.len() + deletions.len());
    for (_, (id, value)) in insertions {
        ops.push(WireOpRef::Insert((id.as_str(), value)));
    }
    for (id, _) in deletions {
        ops.push(WireOpRef::Delete(id.as_str()));
    }
    let json = serde_json::to_vec(&ops)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// One replica of the observed-remove set.
pub struct ORSet<V, S> {
    map: ORMap<V, S>,
}

impl<V, S> Clone for ORSet<V, S> {
    fn clone(&self) -> Self {
        ORSet {
            map: self.map.clone(),
        }
    }
}

impl<V, S> ORSet<V, S>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: StateStore<V> + Send + Sync + 'static,
{
    pub fn new(store: S, config: Config) -> Self {
        ORSet {
            map: ORMap::new(store, config).with_observer(Arc::new(SetAdapter {
                user: Arc::new(NullObserver) as Arc<dyn SetObserver<V>>,
            })),
        }
    }

    /// Installs the observer. Call before the replica is shared.
    pub fn with_observer(mut self, observer: Arc<dyn SetObserver<V>>) -> Self {
        self.map = self.map.with_observer(Arc::new(SetAdapter { user: observer }));
        self
    }

    /// Adds a value under a fresh id, superseding an equal value's
    /// earlier id.
    pub async fn add(&self, value: V) -> Result<()> {
        let key = canon::fingerprint(&value)?;
        self.map.set(&key, value).await
    }

    /// Removes a value. Removing an absent value is a no-op.
    pub async fn delete(&self, value: &V) -> Result<()> {
        let key = canon::fingerprint(value)?;
        self.map.delete(&key).await
    }

    pub fn has(&self, value: &V) -> Result<bool> {
        let key = canon::fingerprint(value)?;
        self.map.has(&key)
    }

    /// Values in fingerprint order, which is identical on every
    /// converged replica.
    pub fn values(&self) -> Result<Vec<V>> {
        self.map.values()
    }

    pub fn size(&self) -> u64 {
        self.map.size()
    }

    pub async fn clear(&self) -> Result<()> {
        self.map.clear().await
    }

    /// Structured snapshot; the compressed form is only used on the
    /// publish path.
    pub fn dump(&self) -> Result<Batch<V>> {
        self.map.dump()
    }

    /// Emits `queue` (or a dump) through the observer as a compressed
    /// buffer.
    pub fn sync(&self, queue: Option<Batch<V>>) -> Result<()> {
        self.map.sync(queue)
    }

    /// Decompresses and applies a wire batch. A deletion's key is
    /// recovered from a same-batch insertion carrying the same id, else
    /// from the live pair currently installed under that id; an
    /// unresolvable key is left empty, and the id-level tombstone alone
    /// suppresses any late copy of the insertion.
    pub async fn process(&self, buffer: &[u8]) -> Result<()> {
        let batch = self.decode(buffer)?;
        self.map.process(batch).await
    }

    /// See [`ORMap::flush`].
    pub async fn flush(&self) -> Result<u64> {
        self.map.flush().await
    }

    /// See [`ORMap::shutdown`].
    pub async fn shutdown(&self) {
        self.map.shutdown().await;
    }

    fn decode(&self, buffer: &[u8]) -> Result<Batch<V>> {
        let mut decoder = GzDecoder::new(buffer);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        let ops: Vec<WireOp<V>> = serde_json::from_slice(&json)?;
        trace!(ops = ops.len(), "decoded wire batch");
        let mut insertions = Vec::new();
        let mut deletion_ids = Vec::new();
        for op in ops {
            match op {
                WireOp::Insert((id, value)) => {
                    let key = canon::fingerprint(&value)?;
                    insertions.push((key, (id, value)));
                }
                WireOp::Delete(id) => deletion_ids.push(id),
            }
        }
        let mut deletions = Vec::with_capacity(deletion_ids.len());
        for id in deletion_ids {
            let key = insertions
                .iter()
                .find(|(_, (insert_id, _))| *insert_id == id)
                .map(|(key, _)| key.clone());
            let key = match key {
                Some(key) => key,
                None => self.key_of_live_id(&id)?.unwrap_or_default(),
            };
            deletions.push((id, key));
        }
        Ok((insertions, deletions))
    }

    /// Finds the key of the live pair installed under `id`, if any.
    fn key_of_live_id(&self, id: &str) -> Result<Option<String>> {
        let state = self.map.state_handle().read().unwrap();
        let mut after: Option<String> = None;
        loop {
            let page = state.scan_live(after.as_deref(), 128)?;
            let full = page.len() == 128;
            after = page.last().map(|(key, _)| key.clone());
            for (key, pair) in page {
                if pair.id == id {
                    return Ok(Some(key));
                }
            }
            if !full {
                return Ok(None);
            }
        }
    }
}

/// Bridges map events to the set observer, compressing publishes.
struct SetAdapter<V> {
    user: Arc<dyn SetObserver<V>>,
}

impl<V> Observer<V> for SetAdapter<V>
where
    V: Serialize + Send + Sync,
{
    fn on_set(&self, _key: &str, value: &V, _previous: Option<&V>) {
        self.user.on_add(value);
    }

    fn on_delete(&self, _key: &str, value: &V) {
        self.user.on_delete(value);
    }

    fn on_publish(&self, batch: &Batch<V>) {
        match encode(batch) {
            Ok(buffer) => self.user.on_publish(&buffer),
            Err(error) => self.user.on_error(&error),
        }
    }

    fn on_error(&self, error: &Error) {
        self.user.on_error(error);
    }
}
