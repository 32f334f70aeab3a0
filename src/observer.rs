// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Typed observers replacing ambient event subscription. An observer is
//! handed to the map at construction; every method has a no-op default.
//!
//! Callbacks run synchronously after the state change they describe has
//! been committed, while the replica's operation gate is held. They must
//! not call back into the map's mutators, which would deadlock the gate.

use crate::error::Error;
use crate::map::Batch;
use crate::signed::SignedBatch;

/// Observes a map replica (plain or signed).
pub trait Observer<V>: Send + Sync {
    /// A new live pair was installed. `previous` is the value the
    /// insertion replaced, if any.
    fn on_set(&self, key: &str, value: &V, previous: Option<&V>) {
        let _ = (key, value, previous);
    }

    /// A live pair was removed.
    fn on_delete(&self, key: &str, value: &V) {
        let _ = (key, value);
    }

    /// An insertion identical in id to the installed one was re-received.
    fn on_affirm(&self, key: &str, value: &V) {
        let _ = (key, value);
    }

    /// A batch of local operations is ready for the transport.
    fn on_publish(&self, batch: &Batch<V>) {
        let _ = batch;
    }

    /// Signed-variant counterpart of [`on_publish`](Observer::on_publish).
    fn on_publish_signed(&self, batch: &SignedBatch<V>) {
        let _ = batch;
    }

    /// Initial-entry ingestion failed.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// Observes a set replica. Same delivery rules as [`Observer`].
pub trait SetObserver<V>: Send + Sync {
    fn on_add(&self, value: &V) {
        let _ = value;
    }

    fn on_delete(&self, value: &V) {
        let _ = value;
    }

    /// A gzip-compressed wire buffer is ready for the transport.
    fn on_publish(&self, buffer: &[u8]) {
        let _ = buffer;
    }

    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl<V> Observer<V> for NullObserver {}

impl<V> SetObserver<V> for NullObserver {}
