// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Version hashes for item collections.
//!
//! A [`VersionHash`] is a cheap "might have changed" signal: the first
//! 8 bytes of a SHA-256 over a canonical, key-sorted serialization of the
//! collection, hex encoded. It is NOT an identity. Truncation makes
//! collisions possible, so it must never be used for deduplication,
//! integrity checks, or anything security related.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::item::Item;

/// Digest bytes kept in a version hash.
const HASH_BYTES: usize = 8;

/// Fingerprint of an item collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionHash(String);

impl VersionHash {
    /// Wraps an existing hash string (e.g. one received from the peer).
    pub fn new(hash: impl Into<String>) -> Self {
        VersionHash(hash.into())
    }

    /// Returns the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the version hash of a collection.
///
/// Object keys are sorted at every depth before hashing, so key insertion
/// order does not affect the result. Collection order does.
pub fn generate_version_hash(items: &[Item]) -> VersionHash {
    let mut canonical = String::new();
    canonical.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_object(item.fields(), &mut canonical);
    }
    canonical.push(']');

    let hash = Sha256::digest(canonical.as_bytes());
    VersionHash(hex::encode(&hash[..HASH_BYTES]))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(values) => {
            out.push('[');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &serde_json::Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(value) = map.get(key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
