// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The in-memory [`StateStore`]: plain `BTreeMap`s, no persistence.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Result;
use crate::store::{Id, LivePair, StateStore};

#[derive(Clone, Debug)]
pub struct MemoryStore<V> {
    live: BTreeMap<String, (Id, V)>,
    tombstones: BTreeMap<Id, String>,
    insertion_sigs: BTreeMap<Id, String>,
    deletion_sigs: BTreeMap<Id, String>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        MemoryStore {
            live: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            insertion_sigs: BTreeMap::new(),
            deletion_sigs: BTreeMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> StateStore<V> for MemoryStore<V> {
    fn get_live(&self, key: &str) -> Result<Option<LivePair<V>>> {
        Ok(self.live.get(key).map(|(id, value)| LivePair {
            id: id.clone(),
            value: value.clone(),
        }))
    }

    fn put_live(&mut self, key: &str, id: &str, value: &V) -> Result<()> {
        self.live
            .insert(key.to_owned(), (id.to_owned(), value.clone()));
        Ok(())
    }

    fn remove_live(&mut self, key: &str) -> Result<()> {
        self.live.remove(key);
        Ok(())
    }

    fn scan_live(&self, after: Option<&str>, limit: usize) -> Result<Vec<(String, LivePair<V>)>> {
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_owned()),
            None => Bound::Unbounded,
        };
        Ok(self
            .live
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(key, (id, value))| {
                (
                    key.clone(),
                    LivePair {
                        id: id.clone(),
                        value: value.clone(),
                    },
                )
            })
            .collect())
    }

    fn size(&self) -> u64 {
        self.live.len() as u64
    }

    fn has_tombstone(&self, id: &str) -> Result<bool> {
        Ok(self.tombstones.contains_key(id))
    }

    fn put_tombstone(&mut self, id: &str, key: &str) -> Result<()> {
        self.tombstones.insert(id.to_owned(), key.to_owned());
        Ok(())
    }

    fn tombstones(&self) -> Result<Vec<(Id, String)>> {
        Ok(self
            .tombstones
            .iter()
            .map(|(id, key)| (id.clone(), key.clone()))
            .collect())
    }

    fn put_insertion_sig(&mut self, id: &str, signature: &str) -> Result<()> {
        self.insertion_sigs
            .insert(id.to_owned(), signature.to_owned());
        Ok(())
    }

    fn insertion_sig(&self, id: &str) -> Result<Option<String>> {
        Ok(self.insertion_sigs.get(id).cloned())
    }

    fn remove_insertion_sig(&mut self, id: &str) -> Result<()> {
        self.insertion_sigs.remove(id);
        Ok(())
    }

    fn put_deletion_sig(&mut self, id: &str, signature: &str) -> Result<()> {
        self.deletion_sigs
            .insert(id.to_owned(), signature.to_owned());
        Ok(())
    }

    fn deletion_sig(&self, id: &str) -> Result<Option<String>> {
        Ok(self.deletion_sigs.get(id).cloned())
    }

    fn flush(&mut self, horizon: &str) -> Result<u64> {
        // split_off keeps everything at or after the horizon
        let keep = self.tombstones.split_off(horizon);
        let flushed = std::mem::replace(&mut self.tombstones, keep);
        self.deletion_sigs = self.deletion_sigs.split_off(horizon);
        Ok(flushed.len() as u64)
    }
}
