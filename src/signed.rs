// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The signed map variant. A [`SignedORMap`] composes the unsigned core
//! and only exposes mutators that carry a caller-supplied id and
//! signature; the unsigned `set`/`delete`/`clear` do not exist on it.
//! Every signature in a batch is verified before any state is touched,
//! so a single forgery leaves the replica unchanged.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use keyring::{KeyFormat, Verifier};

use crate::canon;
use crate::error::{Error, Result};
use crate::map::{Batch, Config, Cursor, ORMap};
use crate::observer::Observer;
use crate::store::{Id, StateStore};

/// Signed insertion records: `(signature, id, key, value)`.
pub type SignedInsertions<V> = Vec<(String, Id, String, V)>;
/// Signed deletion records: `(signature, id, key)`.
pub type SignedDeletions = Vec<(String, Id, String)>;
/// What the signed variant's `dump`, `process_signed` and publish event
/// exchange.
pub type SignedBatch<V> = (SignedInsertions<V>, SignedDeletions);

/// Verifier configuration for the signed variant.
#[derive(Clone, Debug)]
pub struct SignedConfig {
    /// The public key every operation must be signed with.
    pub key: String,
    /// Encoding of `key`.
    pub format: KeyFormat,
}

/// One replica of the signed observed-remove map.
pub struct SignedORMap<V, S> {
    map: ORMap<V, S>,
    verifier: Verifier,
    queues: Arc<Mutex<SignedBatch<V>>>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    buffer_publishing: Duration,
}

impl<V, S> Clone for SignedORMap<V, S> {
    fn clone(&self) -> Self {
        SignedORMap {
            map: self.map.clone(),
            verifier: self.verifier.clone(),
            queues: self.queues.clone(),
            timer: self.timer.clone(),
            gate: self.gate.clone(),
            buffer_publishing: self.buffer_publishing,
        }
    }
}

impl<V, S> SignedORMap<V, S>
where
    V: Clone + Serialize + Send + Sync + 'static,
    S: StateStore<V> + Send + Sync + 'static,
{
    pub fn new(store: S, config: Config, signed: SignedConfig) -> Result<Self> {
        let verifier = Verifier::new(&signed.key, signed.format)?;
        let buffer_publishing = config.buffer_publishing;
        Ok(SignedORMap {
            map: ORMap::new(store, config),
            verifier,
            queues: Arc::new(Mutex::new((Vec::new(), Vec::new()))),
            timer: Arc::new(Mutex::new(None)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            buffer_publishing,
        })
    }

    /// Installs the observer. Call before the replica is shared.
    pub fn with_observer(mut self, observer: Arc<dyn Observer<V>>) -> Self {
        self.map = self.map.with_observer(observer);
        self
    }

    /// Assigns `value` to `key` under the caller's id, authorized by
    /// `signature` over the canonical `[key, value, id]` message.
    pub async fn set_signed(
        &self,
        key: &str,
        value: V,
        id: Id,
        signature: String,
    ) -> Result<()> {
        let batch = (
            vec![(signature, id, key.to_owned(), value)],
            Vec::new(),
        );
        // local observation matches a remote replica's, as in the
        // unsigned set
        self.process_signed_with(batch.clone(), true).await?;
        {
            let mut queues = self.queues.lock().unwrap();
            queues.0.extend_from_slice(&batch.0);
        }
        self.dequeue();
        Ok(())
    }

    /// Tombstones the insertion `id` currently live for `key`,
    /// authorized by `signature` over the canonical `[key, id]` message.
    pub async fn delete_signed(&self, key: &str, id: Id, signature: String) -> Result<()> {
        let batch = (Vec::new(), vec![(signature, id, key.to_owned())]);
        self.process_signed_with(batch.clone(), false).await?;
        {
            let mut queues = self.queues.lock().unwrap();
            queues.1.extend_from_slice(&batch.1);
        }
        self.dequeue();
        Ok(())
    }

    /// Applies a remote signed batch, then flushes aged tombstones.
    pub async fn process_signed(&self, batch: SignedBatch<V>) -> Result<()> {
        self.process_signed_with(batch, false).await
    }

    /// [`process_signed`](SignedORMap::process_signed) with an explicit
    /// flush toggle.
    pub async fn process_signed_with(
        &self,
        batch: SignedBatch<V>,
        skip_flush: bool,
    ) -> Result<()> {
        let _gate = self.gate.lock().await;
        let (insertions, deletions) = &batch;
        // every signature must check out before anything is written
        for (signature, id, key, value) in insertions {
            let message = canon::insertion_message(key, value, id)?;
            if !self.verifier.verify(signature, &message) {
                return Err(Error::InvalidSignature { id: id.clone() });
            }
        }
        for (signature, id, key) in deletions {
            let message = canon::deletion_message(key, id)?;
            if !self.verifier.verify(signature, &message) {
                return Err(Error::InvalidSignature { id: id.clone() });
            }
        }
        {
            let mut state = self.map.state_handle().write().unwrap();
            for (signature, id, _, _) in insertions {
                state.put_insertion_sig(id, signature)?;
            }
            for (signature, id, _) in deletions {
                state.put_deletion_sig(id, signature)?;
            }
        }
        let unsigned: Batch<V> = (
            insertions
                .iter()
                .map(|(_, id, key, value)| (key.clone(), (id.clone(), value.clone())))
                .collect(),
            deletions
                .iter()
                .map(|(_, id, key)| (id.clone(), key.clone()))
                .collect(),
        );
        self.map.process_with(unsigned, skip_flush).await?;
        {
            // a signature only vouches for the authoritative insertion;
            // once the id is superseded or cancelled it is dropped
            let mut state = self.map.state_handle().write().unwrap();
            for (_, id, key, _) in insertions {
                let authoritative = state
                    .get_live(key)?
                    .map(|pair| pair.id == *id)
                    .unwrap_or(false);
                if !authoritative {
                    state.remove_insertion_sig(id)?;
                    debug!(%id, "dropped non-authoritative insertion signature");
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        self.map.get(key)
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.map.has(key)
    }

    pub fn size(&self) -> u64 {
        self.map.size()
    }

    pub fn entries(&self) -> Cursor<V, S> {
        self.map.entries()
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.map.keys()
    }

    pub fn values(&self) -> Result<Vec<V>> {
        self.map.values()
    }

    /// Snapshot of the replica with every operation re-wrapped in its
    /// stored signature. Fails with
    /// [`Error::MissingSignature`] if the store lost one.
    pub fn dump(&self) -> Result<SignedBatch<V>> {
        let (insertions, deletions) = self.map.dump()?;
        let state = self.map.state_handle().read().unwrap();
        let mut signed_insertions = Vec::with_capacity(insertions.len());
        for (key, (id, value)) in insertions {
            let signature =
                state
                    .insertion_sig(&id)?
                    .ok_or_else(|| Error::MissingSignature {
                        kind: "insertion",
                        id: id.clone(),
                    })?;
            signed_insertions.push((signature, id, key, value));
        }
        let mut signed_deletions = Vec::with_capacity(deletions.len());
        for (id, key) in deletions {
            let signature =
                state
                    .deletion_sig(&id)?
                    .ok_or_else(|| Error::MissingSignature {
                        kind: "deletion",
                        id: id.clone(),
                    })?;
            signed_deletions.push((signature, id, key));
        }
        Ok((signed_insertions, signed_deletions))
    }

    /// Emits `queue` as a signed publish event, or a full signed
    /// [`dump`](SignedORMap::dump) when `queue` is `None`.
    pub fn sync(&self, queue: Option<SignedBatch<V>>) -> Result<()> {
        let batch = match queue {
            Some(batch) => batch,
            None => self.dump()?,
        };
        self.map.observer_handle().on_publish_signed(&batch);
        Ok(())
    }

    /// See [`ORMap::flush`].
    pub async fn flush(&self) -> Result<u64> {
        self.map.flush().await
    }

    /// Cancels any pending publish and drains both gates.
    pub async fn shutdown(&self) {
        if let Some(task) = self.timer.lock().unwrap().take() {
            task.abort();
        }
        let _gate = self.gate.lock().await;
        drop(_gate);
        self.map.shutdown().await;
    }

    fn dequeue(&self) {
        let mut timer = self.timer.lock().unwrap();
        if timer.as_ref().map(|task| !task.is_finished()).unwrap_or(false) {
            return;
        }
        if self.buffer_publishing.is_zero() {
            drop(timer);
            self.publish();
            return;
        }
        let map = self.clone();
        let delay = self.buffer_publishing;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            map.publish();
        }));
    }

    fn publish(&self) {
        let batch = std::mem::take(&mut *self.queues.lock().unwrap());
        if batch.0.is_empty() && batch.1.is_empty() {
            return;
        }
        debug!(
            insertions = batch.0.len(),
            deletions = batch.1.len(),
            "publishing signed batch"
        );
        self.map.observer_handle().on_publish_signed(&batch);
    }
}

impl<V, E> SignedORMap<V, crate::kv::KvStore<E>>
where
    V: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    E: sortedkv::Engine + Sync + 'static,
{
    /// Opens the persistent signed variant on `engine` under
    /// [`Config::namespace`](crate::Config).
    pub fn persistent(engine: E, config: Config, signed: SignedConfig) -> Result<Self> {
        let verifier = Verifier::new(&signed.key, signed.format)?;
        let buffer_publishing = config.buffer_publishing;
        Ok(SignedORMap {
            map: ORMap::persistent(engine, config)?,
            verifier,
            queues: Arc::new(Mutex::new((Vec::new(), Vec::new()))),
            timer: Arc::new(Mutex::new(None)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            buffer_publishing,
        })
    }
}
