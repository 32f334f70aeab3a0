// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The observed-remove map core. An [`ORMap`] applies local and remote
//! operations under one single-flight gate, so that every replica that
//! processes the same multiset of operations converges to the same live
//! pair table regardless of delivery order or duplication.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use opid::IdGenerator;

use crate::error::Result;
use crate::observer::{NullObserver, Observer};
use crate::store::{Id, StateStore};

/// Insertion records: `(key, (id, value))`.
pub type Insertions<V> = Vec<(String, (Id, V))>;
/// Deletion records (tombstones on the wire): `(id, key)`.
pub type Deletions = Vec<(Id, String)>;
/// What `dump`, `process` and the publish event exchange.
pub type Batch<V> = (Insertions<V>, Deletions);

/// Replica configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Tombstones (and deletion signatures) older than this are flushed.
    pub max_age: Duration,
    /// How long outgoing operations coalesce before publishing; zero
    /// publishes immediately.
    pub buffer_publishing: Duration,
    /// Key prefix isolating this replica's state within a shared
    /// persistent store; consumed by [`KvStore::open`](crate::KvStore::open).
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_age: Duration::from_millis(5000),
            buffer_publishing: Duration::from_millis(30),
            namespace: String::new(),
        }
    }
}

enum Event<V> {
    Set {
        key: String,
        value: V,
        previous: Option<V>,
    },
    Delete {
        key: String,
        value: V,
    },
    Affirm {
        key: String,
        value: V,
    },
}

/// One replica of the observed-remove map.
///
/// Mutators and `process` serialize through a single gate; a second
/// `process` cannot begin before the previous one has finished and run
/// its flush. Read accessors never suspend.
pub struct ORMap<V, S> {
    state: Arc<RwLock<S>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    queues: Arc<Mutex<Batch<V>>>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    observer: Arc<dyn Observer<V>>,
    ids: Arc<IdGenerator>,
    max_age: Duration,
    buffer_publishing: Duration,
}

impl<V, S> Clone for ORMap<V, S> {
    fn clone(&self) -> Self {
        ORMap {
            state: self.state.clone(),
            gate: self.gate.clone(),
            queues: self.queues.clone(),
            timer: self.timer.clone(),
            observer: self.observer.clone(),
            ids: self.ids.clone(),
            max_age: self.max_age,
            buffer_publishing: self.buffer_publishing,
        }
    }
}

impl<V, S> ORMap<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: StateStore<V> + Send + Sync + 'static,
{
    pub fn new(store: S, config: Config) -> Self {
        ORMap {
            state: Arc::new(RwLock::new(store)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            queues: Arc::new(Mutex::new((Vec::new(), Vec::new()))),
            timer: Arc::new(Mutex::new(None)),
            observer: Arc::new(NullObserver),
            ids: Arc::new(IdGenerator::new()),
            max_age: config.max_age,
            buffer_publishing: config.buffer_publishing,
        }
    }

    /// Installs the observer. Call before the replica is shared.
    pub fn with_observer(mut self, observer: Arc<dyn Observer<V>>) -> Self {
        self.observer = observer;
        self
    }

    /// Applies initial entries. This is the readiness point: the replica
    /// is usable before `load`, but only afterwards are the entries
    /// visible. A failure is also reported through `on_error`.
    pub async fn load(self, entries: impl IntoIterator<Item = (String, V)>) -> Result<Self> {
        for (key, value) in entries {
            if let Err(error) = self.set(&key, value).await {
                self.observer.on_error(&error);
                return Err(error);
            }
        }
        Ok(self)
    }

    /// Assigns `value` to `key` under a fresh id, superseding and
    /// tombstoning any current live pair for the key.
    pub async fn set(&self, key: &str, value: V) -> Result<()> {
        let id = self.ids.generate();
        self.set_with_id(key, value, id).await
    }

    /// Like [`set`](ORMap::set) with a caller-supplied id.
    pub async fn set_with_id(&self, key: &str, value: V, id: Id) -> Result<()> {
        {
            let _gate = self.gate.lock().await;
            let previous = self.state.read().unwrap().get_live(key)?;
            let mut deletions = Vec::new();
            if let Some(pair) = previous {
                deletions.push((pair.id, key.to_owned()));
            }
            let batch = (vec![(key.to_owned(), (id, value))], deletions);
            // local observation must match a remote replica processing
            // the same batch, so flush is skipped here
            let events = self.apply(&batch, true)?;
            {
                let mut queues = self.queues.lock().unwrap();
                queues.0.extend_from_slice(&batch.0);
                queues.1.extend_from_slice(&batch.1);
            }
            self.emit(events);
        }
        self.dequeue();
        Ok(())
    }

    /// Tombstones the live pair for `key`. Deleting an absent key is a
    /// no-op.
    pub async fn delete(&self, key: &str) -> Result<()> {
        {
            let _gate = self.gate.lock().await;
            let pair = match self.state.read().unwrap().get_live(key)? {
                Some(pair) => pair,
                None => return Ok(()),
            };
            let batch = (Vec::new(), vec![(pair.id, key.to_owned())]);
            let events = self.apply(&batch, false)?;
            {
                let mut queues = self.queues.lock().unwrap();
                queues.1.extend_from_slice(&batch.1);
            }
            self.emit(events);
        }
        self.dequeue();
        Ok(())
    }

    /// Deletes every key.
    pub async fn clear(&self) -> Result<()> {
        for key in self.keys()? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .get_live(key)?
            .map(|pair| pair.value))
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.state.read().unwrap().get_live(key)?.is_some())
    }

    /// Number of live pairs.
    pub fn size(&self) -> u64 {
        self.state.read().unwrap().size()
    }

    /// A cursor over the live pairs in key order. Dropping it releases
    /// the store.
    pub fn entries(&self) -> Cursor<V, S> {
        Cursor {
            state: self.state.clone(),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let mut cursor = self.entries();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next()? {
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn values(&self) -> Result<Vec<V>> {
        let mut cursor = self.entries();
        let mut values = Vec::new();
        while let Some((_, value)) = cursor.next()? {
            values.push(value);
        }
        Ok(values)
    }

    /// Snapshot of the whole replica: `(live pairs, tombstones)`. Feeding
    /// it to another replica's `process` brings that replica up to date.
    pub fn dump(&self) -> Result<Batch<V>> {
        let state = self.state.read().unwrap();
        let mut insertions = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = state.scan_live(after.as_deref(), Cursor::<V, S>::PAGE)?;
            let full = page.len() == Cursor::<V, S>::PAGE;
            after = page.last().map(|(key, _)| key.clone());
            for (key, pair) in page {
                insertions.push((key, (pair.id, pair.value)));
            }
            if !full {
                break;
            }
        }
        let deletions = state.tombstones()?;
        Ok((insertions, deletions))
    }

    /// Emits `queue` as a publish event, or a full [`dump`](ORMap::dump)
    /// when `queue` is `None`.
    pub fn sync(&self, queue: Option<Batch<V>>) -> Result<()> {
        let batch = match queue {
            Some(batch) => batch,
            None => self.dump()?,
        };
        self.observer.on_publish(&batch);
        Ok(())
    }

    /// Applies a remote batch, then flushes aged tombstones.
    pub async fn process(&self, batch: Batch<V>) -> Result<()> {
        self.process_with(batch, false).await
    }

    /// [`process`](ORMap::process) with an explicit flush toggle.
    pub async fn process_with(&self, batch: Batch<V>, skip_flush: bool) -> Result<()> {
        let _gate = self.gate.lock().await;
        let events = self.apply(&batch, skip_flush)?;
        self.emit(events);
        Ok(())
    }

    /// Removes tombstones and deletion signatures older than `max_age`,
    /// returning how many tombstones went away. Live pairs are never
    /// affected.
    pub async fn flush(&self) -> Result<u64> {
        let _gate = self.gate.lock().await;
        let horizon = opid::horizon(self.max_age);
        self.state.write().unwrap().flush(&horizon)
    }

    /// Cancels any pending publish and waits for in-flight processing to
    /// drain. Mutating the replica afterwards is not supported.
    pub async fn shutdown(&self) {
        if let Some(task) = self.timer.lock().unwrap().take() {
            task.abort();
        }
        let _gate = self.gate.lock().await;
    }

    /// The two-pass batch application. Tombstones are recorded before
    /// insertions are evaluated, and live pairs are removed afterwards,
    /// which makes the outcome independent of ordering within the batch.
    fn apply(&self, batch: &Batch<V>, skip_flush: bool) -> Result<Vec<Event<V>>> {
        let (insertions, deletions) = batch;
        trace!(
            insertions = insertions.len(),
            deletions = deletions.len(),
            "applying batch"
        );
        let mut state = self.state.write().unwrap();
        let mut events = Vec::new();
        for (id, key) in deletions {
            state.put_tombstone(id, key)?;
        }
        for (key, (id, value)) in insertions {
            if state.has_tombstone(id)? {
                continue;
            }
            match state.get_live(key)? {
                None => {
                    state.put_live(key, id, value)?;
                    events.push(Event::Set {
                        key: key.clone(),
                        value: value.clone(),
                        previous: None,
                    });
                }
                Some(pair) if pair.id < *id => {
                    state.put_live(key, id, value)?;
                    events.push(Event::Set {
                        key: key.clone(),
                        value: value.clone(),
                        previous: Some(pair.value),
                    });
                }
                Some(pair) if pair.id == *id => {
                    events.push(Event::Affirm {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
                // an older id never displaces the installed pair
                Some(_) => {}
            }
        }
        for (id, key) in deletions {
            if let Some(pair) = state.get_live(key)? {
                if pair.id == *id {
                    state.remove_live(key)?;
                    events.push(Event::Delete {
                        key: key.clone(),
                        value: pair.value,
                    });
                }
            }
        }
        if !skip_flush {
            let flushed = state.flush(&opid::horizon(self.max_age))?;
            if flushed > 0 {
                debug!(flushed, "flushed aged tombstones");
            }
        }
        Ok(events)
    }

    fn emit(&self, events: Vec<Event<V>>) {
        for event in events {
            match event {
                Event::Set {
                    key,
                    value,
                    previous,
                } => self.observer.on_set(&key, &value, previous.as_ref()),
                Event::Delete { key, value } => self.observer.on_delete(&key, &value),
                Event::Affirm { key, value } => self.observer.on_affirm(&key, &value),
            }
        }
    }

    /// Schedules at most one pending publish.
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

    /// Swaps the outgoing queues for empty ones and hands the batch to
    /// the observer.
    fn publish(&self) {
        let batch = std::mem::take(&mut *self.queues.lock().unwrap());
        if batch.0.is_empty() && batch.1.is_empty() {
            return;
        }
        debug!(
            insertions = batch.0.len(),
            deletions = batch.1.len(),
            "publishing"
        );
        self.observer.on_publish(&batch);
    }

    pub(crate) fn state_handle(&self) -> &Arc<RwLock<S>> {
        &self.state
    }

    pub(crate) fn observer_handle(&self) -> &Arc<dyn Observer<V>> {
        &self.observer
    }
}

/// Streams live pairs in key order through fixed-size range scans.
pub struct Cursor<V, S> {
    state: Arc<RwLock<S>>,
    after: Option<String>,
    buffer: VecDeque<(String, V)>,
    exhausted: bool,
}

impl<V, S> Cursor<V, S>
where
    V: Clone,
    S: StateStore<V>,
{
    const PAGE: usize = 128;

    pub fn next(&mut self) -> Result<Option<(String, V)>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .state
                .read()
                .unwrap()
                .scan_live(self.after.as_deref(), Self::PAGE)?;
            if page.len() < Self::PAGE {
                self.exhausted = true;
            }
            if let Some((key, _)) = page.last() {
                self.after = Some(key.clone());
            }
            self.buffer
                .extend(page.into_iter().map(|(key, pair)| (key, pair.value)));
        }
        Ok(self.buffer.pop_front())
    }
}
