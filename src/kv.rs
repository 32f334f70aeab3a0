// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The persistent [`StateStore`] over a [`sortedkv::Engine`]. One engine
//! may host many replicas under distinct namespaces.
//!
//! Four disjoint ranges under the namespace `N`, separated by ASCII
//! punctuation whose successor bounds each range with one comparison:
//!
//! | range               | key      | value         |
//! |---------------------|----------|---------------|
//! | live pairs          | `N>key`  | `[id, value]` |
//! | tombstones          | `N<id`   | `key`         |
//! | insertion sigs      | `N[id`   | `signature`   |
//! | deletion sigs       | `N]id`   | `signature`   |
//!
//! Range iteration uses `gt: N∥sep`, `lt: N∥succ(sep)`; flushing by age
//! is a range delete bounded by the 9-character id time prefix.

use std::ops::Bound;

use serde::{de::DeserializeOwned, Serialize};
use sortedkv::Engine;
use tracing::debug;

use crate::error::Result;
use crate::store::{Id, LivePair, StateStore};

const LIVE: u8 = b'>';
const TOMBSTONE: u8 = b'<';
const INSERTION_SIG: u8 = b'[';
const DELETION_SIG: u8 = b']';

pub struct KvStore<E: Engine> {
    engine: E,
    namespace: Vec<u8>,
    size: u64,
}

impl<E: Engine> KvStore<E> {
    /// Opens a namespace on the engine, reconciling the size counter by
    /// scanning the live range once.
    pub fn open(engine: E, namespace: &str) -> Result<Self> {
        let mut store = KvStore {
            engine,
            namespace: namespace.as_bytes().to_vec(),
            size: 0,
        };
        let mut size = 0;
        for item in store.engine.scan(store.range(LIVE)) {
            item?;
            size += 1;
        }
        store.size = size;
        debug!(namespace, size, "opened namespace");
        Ok(store)
    }

    fn key(&self, separator: u8, rest: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.namespace.len() + 1 + rest.len());
        key.extend_from_slice(&self.namespace);
        key.push(separator);
        key.extend_from_slice(rest.as_bytes());
        key
    }

    /// Bounds covering every key in a separator's range.
    fn range(&self, separator: u8) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (
            Bound::Excluded(self.key(separator, "")),
            Bound::Excluded(self.key(separator + 1, "")),
        )
    }

    /// Strips `N∥sep` from a stored key.
    fn suffix(&self, separator: u8, key: &[u8]) -> Result<String> {
        let rest = &key[self.namespace.len() + 1..];
        String::from_utf8(rest.to_vec()).map_err(|_| {
            crate::error::Error::Store(sortedkv::Error::Corruption(format!(
                "non-utf8 key in range {:?}",
                separator as char
            )))
        })
    }

    fn get_string(&self, separator: u8, id: &str) -> Result<Option<String>> {
        match self.engine.get(&self.key(separator, id))? {
            Some(bytes) => {
                let s = String::from_utf8(bytes).map_err(|_| {
                    crate::error::Error::Store(sortedkv::Error::Corruption(
                        "non-utf8 stored value".to_owned(),
                    ))
                })?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }
}

impl<V, E> StateStore<V> for KvStore<E>
where
    V: Serialize + DeserializeOwned,
    E: Engine,
{
    fn get_live(&self, key: &str) -> Result<Option<LivePair<V>>> {
        match self.engine.get(&self.key(LIVE, key))? {
            Some(bytes) => {
                let (id, value): (Id, V) = serde_json::from_slice(&bytes)?;
                Ok(Some(LivePair { id, value }))
            }
            None => Ok(None),
        }
    }

    fn put_live(&mut self, key: &str, id: &str, value: &V) -> Result<()> {
        let storage_key = self.key(LIVE, key);
        if self.engine.get(&storage_key)?.is_none() {
            self.size += 1;
        }
        let cell = serde_json::to_vec(&(id, value))?;
        self.engine.set(&storage_key, cell)?;
        Ok(())
    }

    fn remove_live(&mut self, key: &str) -> Result<()> {
        let storage_key = self.key(LIVE, key);
        if self.engine.get(&storage_key)?.is_some() {
            self.size -= 1;
            self.engine.delete(&storage_key)?;
        }
        Ok(())
    }

    fn scan_live(&self, after: Option<&str>, limit: usize) -> Result<Vec<(String, LivePair<V>)>> {
        let (start, end) = self.range(LIVE);
        let start = match after {
            Some(key) => Bound::Excluded(self.key(LIVE, key)),
            None => start,
        };
        let mut page = Vec::new();
        for item in self.engine.scan((start, end)).take(limit) {
            let (storage_key, bytes) = item?;
            let key = self.suffix(LIVE, &storage_key)?;
            let (id, value): (Id, V) = serde_json::from_slice(&bytes)?;
            page.push((key, LivePair { id, value }));
        }
        Ok(page)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn has_tombstone(&self, id: &str) -> Result<bool> {
        Ok(self.engine.get(&self.key(TOMBSTONE, id))?.is_some())
    }

    fn put_tombstone(&mut self, id: &str, key: &str) -> Result<()> {
        self.engine
            .set(&self.key(TOMBSTONE, id), key.as_bytes().to_vec())?;
        Ok(())
    }

    fn tombstones(&self) -> Result<Vec<(Id, String)>> {
        let mut all = Vec::new();
        for item in self.engine.scan(self.range(TOMBSTONE)) {
            let (storage_key, bytes) = item?;
            let id = self.suffix(TOMBSTONE, &storage_key)?;
            let key = String::from_utf8(bytes).map_err(|_| {
                crate::error::Error::Store(sortedkv::Error::Corruption(
                    "non-utf8 tombstone key".to_owned(),
                ))
            })?;
            all.push((id, key));
        }
        Ok(all)
    }

    fn put_insertion_sig(&mut self, id: &str, signature: &str) -> Result<()> {
        self.engine
            .set(&self.key(INSERTION_SIG, id), signature.as_bytes().to_vec())?;
        Ok(())
    }

    fn insertion_sig(&self, id: &str) -> Result<Option<String>> {
        self.get_string(INSERTION_SIG, id)
    }

    fn remove_insertion_sig(&mut self, id: &str) -> Result<()> {
        self.engine.delete(&self.key(INSERTION_SIG, id))?;
        Ok(())
    }

    fn put_deletion_sig(&mut self, id: &str, signature: &str) -> Result<()> {
        self.engine
            .set(&self.key(DELETION_SIG, id), signature.as_bytes().to_vec())?;
        Ok(())
    }

    fn deletion_sig(&self, id: &str) -> Result<Option<String>> {
        self.get_string(DELETION_SIG, id)
    }

    fn flush(&mut self, horizon: &str) -> Result<u64> {
        let flushed = self
            .engine
            .delete_range(&self.key(TOMBSTONE, ""), &self.key(TOMBSTONE, horizon))?;
        self.engine
            .delete_range(&self.key(DELETION_SIG, ""), &self.key(DELETION_SIG, horizon))?;
        Ok(flushed)
    }
}

impl<V, E> crate::map::ORMap<V, KvStore<E>>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Engine + Sync + 'static,
{
    /// Opens the persistent variant on `engine` under
    /// [`Config::namespace`](crate::Config).
    pub fn persistent(engine: E, config: crate::map::Config) -> Result<Self> {
        let store = KvStore::open(engine, &config.namespace)?;
        Ok(Self::new(store, config))
    }
}

#[cfg(test)]
mod tests {
    use sortedkv::Memory;

    use super::*;
    use crate::store::StateStore;

    #[test]
    fn ranges_are_disjoint() {
        let mut store = KvStore::open(Memory::new(), "ns").unwrap();
        StateStore::<i64>::put_live(&mut store, "k", "id0", &1).unwrap();
        StateStore::<i64>::put_tombstone(&mut store, "id0", "k").unwrap();
        StateStore::<i64>::put_insertion_sig(&mut store, "id0", "ins").unwrap();
        StateStore::<i64>::put_deletion_sig(&mut store, "id0", "del").unwrap();
        let live: Vec<_> = StateStore::<i64>::scan_live(&store, None, 10).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(StateStore::<i64>::tombstones(&store).unwrap().len(), 1);
        assert_eq!(
            StateStore::<i64>::insertion_sig(&store, "id0").unwrap(),
            Some("ins".to_owned())
        );
        assert_eq!(
            StateStore::<i64>::deletion_sig(&store, "id0").unwrap(),
            Some("del".to_owned())
        );
    }

    #[test]
    fn size_counts_distinct_keys() {
        let mut store = KvStore::open(Memory::new(), "").unwrap();
        StateStore::<i64>::put_live(&mut store, "a", "id0", &1).unwrap();
        StateStore::<i64>::put_live(&mut store, "a", "id1", &2).unwrap();
        StateStore::<i64>::put_live(&mut store, "b", "id2", &3).unwrap();
        assert_eq!(StateStore::<i64>::size(&store), 2);
        StateStore::<i64>::remove_live(&mut store, "a").unwrap();
        StateStore::<i64>::remove_live(&mut store, "a").unwrap();
        assert_eq!(StateStore::<i64>::size(&store), 1);
    }

    #[test]
    fn size_is_reconciled_on_reopen() {
        let mut store = KvStore::open(Memory::new(), "n").unwrap();
        StateStore::<i64>::put_live(&mut store, "a", "id0", &1).unwrap();
        StateStore::<i64>::put_live(&mut store, "b", "id1", &2).unwrap();
        let KvStore { engine, .. } = store;
        let reopened = KvStore::open(engine, "n").unwrap();
        assert_eq!(StateStore::<i64>::size(&reopened), 2);
    }

    #[test]
    fn namespaces_do_not_leak_into_each_other() {
        let mut store = KvStore::open(Memory::new(), "a").unwrap();
        StateStore::<i64>::put_live(&mut store, "k", "id0", &1).unwrap();
        let KvStore { engine, .. } = store;
        let other = KvStore::open(engine, "b").unwrap();
        assert_eq!(StateStore::<i64>::size(&other), 0);
        assert_eq!(StateStore::<i64>::get_live(&other, "k").unwrap(), None);
    }

    #[test]
    fn flush_bounds_follow_the_time_prefix() {
        let mut store = KvStore::open(Memory::new(), "").unwrap();
        StateStore::<i64>::put_tombstone(&mut store, "000000001aaaa", "a").unwrap();
        StateStore::<i64>::put_tombstone(&mut store, "000000005aaaa", "b").unwrap();
        StateStore::<i64>::put_deletion_sig(&mut store, "000000001aaaa", "s1").unwrap();
        StateStore::<i64>::put_deletion_sig(&mut store, "000000005aaaa", "s5").unwrap();
        let flushed = StateStore::<i64>::flush(&mut store, "000000003").unwrap();
        assert_eq!(flushed, 1);
        assert!(!StateStore::<i64>::has_tombstone(&store, "000000001aaaa").unwrap());
        assert!(StateStore::<i64>::has_tombstone(&store, "000000005aaaa").unwrap());
        assert_eq!(
            StateStore::<i64>::deletion_sig(&store, "000000001aaaa").unwrap(),
            None
        );
    }
}
