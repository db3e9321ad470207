// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typed, namespaced view of the store for one cache.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use stagecache_store::{LeaseToken, Store, StoreEvent, StoreValue};
use tokio::sync::broadcast;

use crate::{
    Error,
    codec::{decode, encode},
};

/// Property holding the encoded value.
pub const VALUE: &str = "value";
/// Property holding the content hash of the last written value.
pub const HASH: &str = "hash";
/// Property holding the epoch-millisecond time the value was (re)populated.
pub const CREATED_AT: &str = "createdAt";
/// Property holding the epoch-millisecond time of the last read.
pub const ACCESSED_AT: &str = "accessedAt";
/// Property holding the count of consecutive failed distributed populations.
pub const POPULATE_IN_ERROR_COUNT: &str = "populateInErrorCount";
/// Property holding the epoch-millisecond time the failure count reached its cutoff.
pub const POPULATE_IN_CUTOFF_AT: &str = "populateInCutoffAt";

/// Narrows a [`Store`] to the properties a cache entry needs.
///
/// Every logical key is translated to `namespace:key` before reaching the store.
/// Raw replies are coerced to typed values here; no cache policy lives in this type.
pub struct KeyFacade<S> {
    store: Arc<S>,
    namespace: Arc<str>,
}

impl<S> Clone for KeyFacade<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: Arc::clone(&self.namespace),
        }
    }
}

impl<S> fmt::Debug for KeyFacade<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFacade").field("namespace", &self.namespace).finish_non_exhaustive()
    }
}

impl<S> KeyFacade<S> {
    /// Creates a facade over `store` scoped to `namespace`.
    pub fn new(store: Arc<S>, namespace: &str) -> Self {
        Self {
            store,
            namespace: Arc::from(namespace),
        }
    }

    /// Returns the namespace every key is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the store-scoped form of a logical key.
    #[must_use]
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

impl<S: Store> KeyFacade<S> {
    /// Reads and decodes the value, `None` when absent.
    pub async fn get_value<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, Error> {
        match self.store.get_prop(&self.store_key(key), VALUE).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Encodes and writes the value.
    pub async fn set_value<V: Serialize + Sync>(&self, key: &str, value: &V) -> Result<(), Error> {
        let encoded = encode(value)?;
        self.store.set_prop(&self.store_key(key), VALUE, StoreValue::Text(encoded)).await?;
        Ok(())
    }

    /// Removes the entry and all of its properties.
    pub async fn del(&self, key: &str) -> Result<(), Error> {
        self.store.del(&self.store_key(key)).await?;
        Ok(())
    }

    /// Removes the entry once `ttl` has elapsed.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Error> {
        self.store.expire(&self.store_key(key), ttl).await?;
        Ok(())
    }

    /// Reads `createdAt`, `None` when absent or unparsable.
    pub async fn get_created_at(&self, key: &str) -> Result<Option<u64>, Error> {
        self.get_timestamp(key, CREATED_AT).await
    }

    /// Writes `createdAt`.
    pub async fn set_created_at(&self, key: &str, epoch_ms: u64) -> Result<(), Error> {
        self.set_timestamp(key, CREATED_AT, epoch_ms).await
    }

    /// Reads `accessedAt`, `None` when absent or unparsable.
    pub async fn get_accessed_at(&self, key: &str) -> Result<Option<u64>, Error> {
        self.get_timestamp(key, ACCESSED_AT).await
    }

    /// Writes `accessedAt`.
    pub async fn set_accessed_at(&self, key: &str, epoch_ms: u64) -> Result<(), Error> {
        self.set_timestamp(key, ACCESSED_AT, epoch_ms).await
    }

    /// Reads the stored content hash, `None` when absent.
    pub async fn get_hash(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self
            .store
            .get_prop(&self.store_key(key), HASH)
            .await?
            .map(|raw| raw.to_string()))
    }

    /// Writes the content hash.
    pub async fn set_hash(&self, key: &str, hash: &str) -> Result<(), Error> {
        self.store.set_prop(&self.store_key(key), HASH, StoreValue::from(hash)).await?;
        Ok(())
    }

    /// Reads the consecutive distributed-population failure count (absent reads as zero).
    pub async fn get_populate_in_error_count(&self, key: &str) -> Result<u64, Error> {
        let raw = self.store.get_prop(&self.store_key(key), POPULATE_IN_ERROR_COUNT).await?;
        Ok(raw.as_ref().and_then(to_number).unwrap_or(0))
    }

    /// Clears the distributed-population failure count and its cutoff mark.
    pub async fn reset_populate_in_error_count(&self, key: &str) -> Result<(), Error> {
        let store_key = self.store_key(key);
        self.store.del_prop(&store_key, POPULATE_IN_ERROR_COUNT).await?;
        self.store.del_prop(&store_key, POPULATE_IN_CUTOFF_AT).await?;
        Ok(())
    }

    /// Reads when the failure count reached its cutoff, `None` when not cut off.
    pub async fn get_populate_in_cutoff_at(&self, key: &str) -> Result<Option<u64>, Error> {
        self.get_timestamp(key, POPULATE_IN_CUTOFF_AT).await
    }

    /// Marks the failure count as having reached its cutoff at `epoch_ms`.
    pub async fn set_populate_in_cutoff_at(&self, key: &str, epoch_ms: u64) -> Result<(), Error> {
        self.set_timestamp(key, POPULATE_IN_CUTOFF_AT, epoch_ms).await
    }

    /// Increments the distributed-population failure count and returns the new count.
    pub async fn increment_populate_in_error_count(&self, key: &str) -> Result<u64, Error> {
        let count = self
            .store
            .incr_prop_by(&self.store_key(key), POPULATE_IN_ERROR_COUNT, 1)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Creates a lease factory whose leases last at most `ttl`.
    #[must_use]
    pub fn create_lease(&self, ttl: Duration) -> Lease<S> {
        Lease {
            facade: self.clone(),
            ttl,
        }
    }

    /// Creates a timer scoped to this facade's namespace.
    #[must_use]
    pub fn create_timer(&self) -> S::Timer {
        self.store.create_timer(&self.namespace)
    }

    /// Subscribes to store notifications, if the store supports them.
    #[must_use]
    pub fn notifications(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.store.notifications()
    }

    async fn get_timestamp(&self, key: &str, prop: &str) -> Result<Option<u64>, Error> {
        let raw = self.store.get_prop(&self.store_key(key), prop).await?;
        Ok(raw.as_ref().and_then(to_number))
    }

    async fn set_timestamp(&self, key: &str, prop: &str, epoch_ms: u64) -> Result<(), Error> {
        let value = i64::try_from(epoch_ms).map_or_else(|_| StoreValue::Text(epoch_ms.to_string()), StoreValue::Int);
        self.store.set_prop(&self.store_key(key), prop, value).await?;
        Ok(())
    }
}

fn to_number(raw: &StoreValue) -> Option<u64> {
    match raw {
        StoreValue::Int(n) => u64::try_from(*n).ok(),
        StoreValue::Text(text) => text.trim().parse().ok(),
    }
}

/// Hands out TTL-bounded leases for keys of one namespace.
#[derive(Debug)]
pub struct Lease<S> {
    facade: KeyFacade<S>,
    ttl: Duration,
}

impl<S: Store> Lease<S> {
    /// Returns the TTL of leases handed out by this factory.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Tries to acquire the lease for `key`, `None` when another holder has it.
    pub async fn acquire(&self, key: &str) -> Result<Option<LeaseGuard<S>>, Error> {
        let token = self.facade.store.acquire_lease(&self.facade.store_key(key), self.ttl).await?;
        Ok(token.map(|token| LeaseGuard {
            facade: self.facade.clone(),
            key: key.to_owned(),
            token,
        }))
    }
}

/// Proof of holding the lease for one key.
///
/// Dropping the guard without calling [`release`](Self::release) leaves the lease
/// to run out its TTL.
#[derive(Debug)]
#[must_use = "a held lease should be released once the work is done"]
pub struct LeaseGuard<S> {
    facade: KeyFacade<S>,
    key: String,
    token: LeaseToken,
}

impl<S: Store> LeaseGuard<S> {
    /// Returns the logical key this lease covers.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Gives up the lease early.
    pub async fn release(self) -> Result<(), Error> {
        self.facade
            .store
            .release_lease(&self.facade.store_key(&self.key), self.token)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stagecache_store::testing::{MemoryStore, StoreOp};

    use super::*;

    fn facade() -> (MemoryStore, KeyFacade<MemoryStore>) {
        let store = MemoryStore::new();
        let facade = KeyFacade::new(Arc::new(store.clone()), "n");
        (store, facade)
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let (store, facade) = facade();

        facade.set_value("k", &"v".to_owned()).await.unwrap();

        assert_eq!(store.prop("n:k", VALUE), Some(StoreValue::from("\"v\"")));
        assert_eq!(
            store.operations(),
            vec![StoreOp::SetProp {
                key: "n:k".to_owned(),
                prop: VALUE.to_owned(),
                value: StoreValue::from("\"v\""),
            }]
        );
    }

    #[tokio::test]
    async fn missing_properties_read_as_absent() {
        let (_, facade) = facade();

        assert_eq!(facade.get_value::<String>("k").await.unwrap(), None);
        assert_eq!(facade.get_created_at("k").await.unwrap(), None);
        assert_eq!(facade.get_hash("k").await.unwrap(), None);
        assert_eq!(facade.get_populate_in_error_count("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_timestamps_are_parsed() {
        let (store, facade) = facade();
        store.insert_prop("n:k", CREATED_AT, "1700000000000");
        store.insert_prop("n:k", ACCESSED_AT, "garbage");

        assert_eq!(facade.get_created_at("k").await.unwrap(), Some(1_700_000_000_000));
        assert_eq!(facade.get_accessed_at("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn timestamps_round_trip_as_integers() {
        let (store, facade) = facade();

        facade.set_created_at("k", 42).await.unwrap();
        facade.set_accessed_at("k", 43).await.unwrap();

        assert_eq!(store.prop("n:k", CREATED_AT), Some(StoreValue::Int(42)));
        assert_eq!(facade.get_accessed_at("k").await.unwrap(), Some(43));
    }

    #[tokio::test]
    async fn error_count_increments_and_resets() {
        let (_, facade) = facade();

        assert_eq!(facade.increment_populate_in_error_count("k").await.unwrap(), 1);
        assert_eq!(facade.increment_populate_in_error_count("k").await.unwrap(), 2);
        assert_eq!(facade.get_populate_in_error_count("k").await.unwrap(), 2);

        facade.reset_populate_in_error_count("k").await.unwrap();
        assert_eq!(facade.get_populate_in_error_count("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_clears_the_cutoff_mark() {
        let (store, facade) = facade();
        facade.increment_populate_in_error_count("k").await.unwrap();
        facade.set_populate_in_cutoff_at("k", 1_000).await.unwrap();
        assert_eq!(facade.get_populate_in_cutoff_at("k").await.unwrap(), Some(1_000));

        facade.reset_populate_in_error_count("k").await.unwrap();

        assert_eq!(facade.get_populate_in_cutoff_at("k").await.unwrap(), None);
        assert_eq!(store.prop("n:k", POPULATE_IN_ERROR_COUNT), None);
    }

    #[tokio::test(start_paused = true)]
    async fn leases_are_exclusive_and_releasable() {
        let (store, facade) = facade();
        let lease = facade.create_lease(Duration::from_secs(30));

        let guard = lease.acquire("k").await.unwrap().expect("first acquire wins");
        assert_eq!(guard.key(), "k");
        assert!(store.is_leased("n:k"));
        assert!(lease.acquire("k").await.unwrap().is_none());

        guard.release().await.unwrap();
        assert!(!store.is_leased("n:k"));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_targets_the_namespaced_key() {
        let (store, facade) = facade();
        facade.set_value("k", &"v".to_owned()).await.unwrap();

        facade.expire("k", Duration::from_secs(5)).await.unwrap();
        assert!(store.contains_key("n:k"));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(!store.contains_key("n:k"));
        assert!(store.operations().contains(&StoreOp::Expire {
            key: "n:k".to_owned(),
            ttl: Duration::from_secs(5),
        }));
    }

    #[tokio::test]
    async fn store_failures_surface_as_store_errors() {
        let (store, facade) = facade();
        store.fail_when(|op| matches!(op, StoreOp::GetProp { .. }));

        let error = facade.get_value::<String>("k").await.unwrap_err();

        assert_eq!(error.kind(), crate::ErrorKind::Store);
    }
}
