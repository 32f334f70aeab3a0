// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This crate provides an observed-remove map [`ORMap`] (and its set
//! counterpart [`ORSet`]): replicated containers that different peers
//! can mutate concurrently and synchronize by exchanging published
//! batches over any transport. Replicas that have processed the same set
//! of operations converge to the same contents, regardless of delivery
//! order or duplication.

//! State lives behind the [`StateStore`] trait, with an in-memory
//! implementation ([`MemoryStore`]) and a persistent one ([`KvStore`])
//! over any ordered key-value engine implementing [`sortedkv::Engine`].

//! The signed variant [`SignedORMap`] only accepts operations carrying a
//! valid signature from the configured public key, so an untrusted
//! transport cannot forge mutations.

pub mod canon;
pub mod error;
pub mod kv;
pub mod map;
pub mod memory;
pub mod observer;
pub mod set;
pub mod signed;
pub mod store;

pub use error::{Error, Result};
pub use keyring::{KeyFormat, Keypair, Verifier};
pub use opid::IdGenerator;
pub use kv::KvStore;
pub use map::{Batch, Config, Cursor, Deletions, Insertions, ORMap};
pub use memory::MemoryStore;
pub use observer::{NullObserver, Observer, SetObserver};
pub use set::ORSet;
pub use signed::{SignedBatch, SignedConfig, SignedDeletions, SignedInsertions, SignedORMap};
pub use store::{Id, LivePair, StateStore};
