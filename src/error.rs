// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types shared by every map variant.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A signed batch contained at least one signature that does not
    /// verify. The whole batch is rejected; no state was touched.
    #[error("invalid signature for operation {id}")]
    InvalidSignature { id: String },

    /// A signed dump found no stored signature for an operation that
    /// must carry one. Indicates a corrupted store.
    #[error("missing {kind} signature for operation {id}")]
    MissingSignature {
        kind: &'static str,
        id: String,
    },

    /// Unexpected failure of the underlying ordered store. Absence of a
    /// key is never reported this way.
    #[error("store error: {0}")]
    Store(#[from] sortedkv::Error),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The set variant failed to compress or decompress a wire buffer.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The verifier rejected the configured public key.
    #[error("key error: {0}")]
    Key(#[from] keyring::KeyError),
}
