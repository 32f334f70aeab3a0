// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Signing and verification for the signed map variant: ed25519 keypairs
//! with detached signatures carried as base64 strings, and a [`Verifier`]
//! built from a public key in a configured [`KeyFormat`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("public key is not valid {0:?}")]
    Encoding(KeyFormat),
    #[error("public key is not a valid ed25519 point")]
    InvalidKey,
}

/// Encoding of public keys handed to [`Verifier::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFormat {
    Base64,
    Hex,
}

/// A signing identity. Held by whoever authors operations; replicas that
/// only replay operations need a [`Verifier`].
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Keypair {
        Keypair {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Keypair {
        Keypair {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// The public key, encoded for transmission in the given format.
    pub fn public_key(&self, format: KeyFormat) -> String {
        let bytes = self.signing.verifying_key().to_bytes();
        match format {
            KeyFormat::Base64 => BASE64.encode(bytes),
            KeyFormat::Hex => hex(&bytes),
        }
    }

    /// Signs a message, returning the signature as base64.
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing.sign(message).to_bytes())
    }

    pub fn verifier(&self) -> Verifier {
        Verifier {
            key: self.signing.verifying_key(),
        }
    }
}

/// Validates signatures against one public key.
#[derive(Clone, Debug)]
pub struct Verifier {
    key: VerifyingKey,
}

impl Verifier {
    pub fn new(key: &str, format: KeyFormat) -> Result<Verifier, KeyError> {
        let bytes = match format {
            KeyFormat::Base64 => BASE64.decode(key).map_err(|_| KeyError::Encoding(format))?,
            KeyFormat::Hex => unhex(key).ok_or(KeyError::Encoding(format))?,
        };
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidKey)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(Verifier { key })
    }

    /// Checks a base64 signature over a message. Any malformed input
    /// verifies as false.
    pub fn verify(&self, signature: &str, message: &[u8]) -> bool {
        let bytes = match BASE64.decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let bytes: [u8; 64] = match bytes.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        self.key.verify(message, &signature).is_ok()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn unhex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
