// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value encoding and content hashing.

use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use stagecache_store::StoreValue;

use crate::Error;

/// A value that can be stored in a cache.
///
/// Values travel through the store as JSON text, so any type that serializes
/// with `serde` qualifies. This trait is implemented automatically.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

pub(crate) fn encode<V: Serialize>(value: &V) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode<V: DeserializeOwned>(raw: &StoreValue) -> Result<V, Error> {
    match raw {
        StoreValue::Text(text) => Ok(serde_json::from_str(text)?),
        StoreValue::Int(n) => Ok(serde_json::from_str(&n.to_string())?),
    }
}

/// Returns the lowercase hex SHA-256 of an encoded value.
pub(crate) fn content_hash(encoded: &str) -> String {
    hex::encode(Sha256::digest(encoded.as_bytes()))
}
