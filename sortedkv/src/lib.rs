// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The boundary to the ordered key-value store backing the persistent
//! map variant: the [`Engine`] trait, plus the [`Memory`] reference
//! engine used by the tests. Real deployments implement [`Engine`] over
//! their store of choice; keys and values are arbitrary byte strings
//! kept in lexicographic key order.

pub mod memory;

use std::ops::{Bound, RangeBounds};

pub use memory::Memory;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by an engine. Absence of a key is not an error;
/// [`Engine::get`] reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store: {0}")]
    Corruption(String),
}

/// An ordered key/value storage engine. Reads take `&self`, writes take
/// `&mut self`; callers serialize access externally.
pub trait Engine: Send {
    /// The iterator returned by `scan()`.
    type ScanIterator<'a>: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a
    where
        Self: 'a;

    /// Gets a value for a key, if it exists.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Sets a value for a key, replacing the existing value if any.
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Deletes a key, or does nothing if it does not exist.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Iterates over an ordered range of key/value pairs.
    fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_>
    where
        Self: Sized;

    /// Deletes every key strictly between `gt` and `lt`, returning how
    /// many were removed. Engines with native range deletion should
    /// override this scan-and-delete default.
    fn delete_range(&mut self, gt: &[u8], lt: &[u8]) -> Result<u64>
    where
        Self: Sized,
    {
        let range = (
            Bound::Excluded(gt.to_vec()),
            Bound::Excluded(lt.to_vec()),
        );
        let keys: Vec<Vec<u8>> = self
            .scan(range)
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<_>>()?;
        let count = keys.len() as u64;
        for key in keys {
            self.delete(&key)?;
        }
        Ok(count)
    }
}
