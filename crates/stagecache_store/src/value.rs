// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// A raw property value as stored and returned by a [`Store`](crate::Store).
///
/// Stores are free to keep numbers as numbers or as text; callers must accept
/// either and coerce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreValue {
    /// An integer reply.
    Int(i64),
    /// A text reply.
    Text(String),
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Proof of holding a lease, handed out by [`Store::acquire_lease`](crate::Store::acquire_lease).
///
/// Releasing with a token that no longer owns the lease (because it expired and
/// someone else acquired it) must not release the new holder's lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeaseToken(u64);

impl LeaseToken {
    /// Creates a token from a store-specific identifier.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the store-specific identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}
