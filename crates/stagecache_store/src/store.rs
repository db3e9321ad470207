// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for the external key-value service.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::{Error, LeaseToken, StoreEvent, StoreValue, Timer};

/// Trait for the external store a cache runs on.
///
/// Every `key` argument is already namespaced by the caller. Each property
/// operation is individually atomic at the store level; nothing here is
/// transactional across properties.
///
/// Leases are advisory: the store does not understand ownership, only TTL-bounded
/// key presence. A holder that crashes simply lets its lease run out.
pub trait Store: Send + Sync {
    /// The timer type handed out by [`create_timer`](Self::create_timer).
    type Timer: Timer;

    /// Reads a property, returning `None` when the key or the property is absent.
    fn get_prop(&self, key: &str, prop: &str) -> impl Future<Output = Result<Option<StoreValue>, Error>> + Send;

    /// Writes a property, creating the key if needed.
    fn set_prop(&self, key: &str, prop: &str, value: StoreValue) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes a property. Removing an absent property is not an error.
    fn del_prop(&self, key: &str, prop: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Atomically adds `amount` to an integer property (absent counts as zero) and
    /// returns the new value.
    fn incr_prop_by(&self, key: &str, prop: &str, amount: i64) -> impl Future<Output = Result<i64, Error>> + Send;

    /// Removes a key and all of its properties.
    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes a key and all of its properties once `ttl` has elapsed.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tries to acquire the lease for `key` for at most `ttl`.
    ///
    /// Returns `None` when the lease is currently held elsewhere.
    fn acquire_lease(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<Option<LeaseToken>, Error>> + Send;

    /// Gives up a lease early.
    ///
    /// Must be a no-op when `token` no longer owns the lease.
    fn release_lease(&self, key: &str, token: LeaseToken) -> impl Future<Output = Result<(), Error>> + Send;

    /// Creates a timer scoped to `namespace`.
    fn create_timer(&self, namespace: &str) -> Self::Timer;

    /// Subscribes to store-level notifications, if the store supports them.
    fn notifications(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}
