// Copyright 2023 Developers of the ormap project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Deterministic value encodings: canonical JSON and the 128-bit
//! fingerprint keying the set variant. Hashing and signing both depend
//! on replicas producing identical bytes for equal values.

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::Result;

/// Serializes a value to canonical JSON: object keys sorted, shortest
/// deterministic float formatting. Non-finite floats become `null`,
/// which every replica renders identically.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    // Going through Value sorts object keys at every nesting level.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// A stable 32-hex-character fingerprint of a value, derived from its
/// canonical JSON. Equal-fingerprint values occupy one slot in the set
/// variant.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let json = to_canonical_json(value)?;
    Ok(format!("{:032x}", xxh3_128(json.as_bytes())))
}

/// The bytes signed for an insertion: canonical JSON of `[key, value, id]`.
pub fn insertion_message<T: Serialize>(key: &str, value: &T, id: &str) -> Result<Vec<u8>> {
    Ok(to_canonical_json(&(key, value, id))?.into_bytes())
}

/// The bytes signed for a deletion: canonical JSON of `[key, id]`.
pub fn deletion_message(key: &str, id: &str) -> Result<Vec<u8>> {
    Ok(to_canonical_json(&(key, id))?.into_bytes())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_keys_are_sorted() {
        let json = to_canonical_json(&json!({"zebra": 1, "apple": {"b": 2, "a": 1}})).unwrap();
        assert_eq!(json, r#"{"apple":{"a":1,"b":2},"zebra":1}"#);
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = fingerprint(&json!({"x": 1, "y": [1, 2, 3]})).unwrap();
        let b = fingerprint(&json!({"y": [1, 2, 3], "x": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn fingerprint_separates_values() {
        let a = fingerprint(&json!({"x": 1})).unwrap();
        let b = fingerprint(&json!({"x": 2})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn messages_distinguish_insertion_from_deletion() {
        let ins = insertion_message("k", &json!(1), "id0").unwrap();
        let del = deletion_message("k", "id0").unwrap();
        assert_ne!(ins, del);
    }
}
