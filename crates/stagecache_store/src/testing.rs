// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation for testing.
//!
//! This module provides `MemoryStore`, a store fake that keeps properties in memory,
//! honors lease and key TTLs on tokio time, broadcasts notifications, records every
//! operation and supports failure injection for testing error paths.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::broadcast, time::Instant};

use crate::{Error, LeaseToken, Store, StoreEvent, StoreValue, TokioTimer};

const NOTIFICATION_CAPACITY: usize = 1024;

/// Recorded store operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A property was read.
    GetProp {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
    },
    /// A property was written.
    SetProp {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
        /// The written value.
        value: StoreValue,
    },
    /// A property was removed.
    DelProp {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
    },
    /// An integer property was incremented.
    IncrPropBy {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
        /// The increment.
        amount: i64,
    },
    /// A key was removed.
    Del(String),
    /// A key was given a TTL.
    Expire {
        /// The namespaced key.
        key: String,
        /// The TTL.
        ttl: Duration,
    },
    /// A lease acquisition was attempted.
    AcquireLease {
        /// The namespaced key.
        key: String,
        /// The requested lease TTL.
        ttl: Duration,
    },
    /// A lease was released.
    ReleaseLease(String),
}

impl StoreOp {
    /// Returns the namespaced key the operation targeted.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::GetProp { key, .. }
            | Self::SetProp { key, .. }
            | Self::DelProp { key, .. }
            | Self::IncrPropBy { key, .. }
            | Self::Del(key)
            | Self::Expire { key, .. }
            | Self::AcquireLease { key, .. }
            | Self::ReleaseLease(key) => key,
        }
    }

    /// Returns the property the operation targeted, if any.
    #[must_use]
    pub fn prop(&self) -> Option<&str> {
        match self {
            Self::GetProp { prop, .. } | Self::SetProp { prop, .. } | Self::DelProp { prop, .. } | Self::IncrPropBy { prop, .. } => {
                Some(prop)
            }
            _ => None,
        }
    }
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct Entry {
    props: HashMap<String, StoreValue>,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    leases: HashMap<String, Lease>,
    next_token: u64,
}

/// An in-memory [`Store`] for testing.
///
/// Clones share the same state, so several caches built over clones of one
/// `MemoryStore` behave like several processes talking to one store.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use stagecache_store::{Store, StoreValue, testing::MemoryStore};
///
/// # async fn example() {
/// let store = MemoryStore::new();
/// store.set_prop("n:k", "value", StoreValue::from("\"v\"")).await.unwrap();
/// assert_eq!(store.prop("n:k", "value"), Some(StoreValue::from("\"v\"")));
///
/// // Leases are exclusive until released or timed out
/// let lease = store.acquire_lease("n:k", Duration::from_secs(1)).await.unwrap();
/// assert!(lease.is_some());
/// assert!(store.acquire_lease("n:k", Duration::from_secs(1)).await.unwrap().is_none());
/// # }
/// ```
///
/// # Failure Injection
///
/// ```no_run
/// use stagecache_store::{Store, testing::{MemoryStore, StoreOp}};
///
/// # async fn example() {
/// let store = MemoryStore::new();
///
/// // Fail only hash reads
/// store.fail_when(|op| matches!(op, StoreOp::GetProp { prop, .. } if prop == "hash"));
/// assert!(store.get_prop("n:k", "hash").await.is_err());
/// assert!(store.get_prop("n:k", "value").await.is_ok());
/// # }
/// ```
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("state", &self.state)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
            events: self.events.clone(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Sets a predicate that determines when operations should fail.
    ///
    /// Failed operations are still recorded but leave the state untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Reads a property without recording an operation.
    #[must_use]
    pub fn prop(&self, key: &str, prop: &str) -> Option<StoreValue> {
        let mut state = self.state.lock();
        self.purge_expired(&mut state, key);
        state.entries.get(key).and_then(|entry| entry.props.get(prop).cloned())
    }

    /// Writes a property without recording an operation or broadcasting.
    ///
    /// Use this to seed state before exercising the code under test.
    pub fn insert_prop(&self, key: &str, prop: &str, value: impl Into<StoreValue>) {
        self.state
            .lock()
            .entries
            .entry(key.to_owned())
            .or_default()
            .props
            .insert(prop.to_owned(), value.into());
    }

    /// Returns true if the key currently exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        self.purge_expired(&mut state, key);
        state.entries.contains_key(key)
    }

    /// Returns true if someone currently holds the lease for `key`.
    #[must_use]
    pub fn is_leased(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state.lock().leases.get(key).is_some_and(|lease| lease.expires_at > now)
    }

    fn record(&self, op: StoreOp) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = format!("memory store: {op:?} failed");
        self.operations.lock().push(op);
        if fail { Err(Error::from_message(message)) } else { Ok(()) }
    }

    fn notify(&self, event: StoreEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn purge_expired(&self, state: &mut State, key: &str) {
        let expired = state
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|expires_at| expires_at <= Instant::now());
        if expired {
            state.entries.remove(key);
            self.notify(StoreEvent::Expired { key: key.to_owned() });
        }
    }
}

impl Store for MemoryStore {
    type Timer = TokioTimer;

    async fn get_prop(&self, key: &str, prop: &str) -> Result<Option<StoreValue>, Error> {
        self.record(StoreOp::GetProp {
            key: key.to_owned(),
            prop: prop.to_owned(),
        })?;
        Ok(self.prop(key, prop))
    }

    async fn set_prop(&self, key: &str, prop: &str, value: StoreValue) -> Result<(), Error> {
        self.record(StoreOp::SetProp {
            key: key.to_owned(),
            prop: prop.to_owned(),
            value: value.clone(),
        })?;
        {
            let mut state = self.state.lock();
            self.purge_expired(&mut state, key);
            state
                .entries
                .entry(key.to_owned())
                .or_default()
                .props
                .insert(prop.to_owned(), value);
        }
        self.notify(StoreEvent::PropSet {
            key: key.to_owned(),
            prop: prop.to_owned(),
        });
        Ok(())
    }

    async fn del_prop(&self, key: &str, prop: &str) -> Result<(), Error> {
        self.record(StoreOp::DelProp {
            key: key.to_owned(),
            prop: prop.to_owned(),
        })?;
        {
            let mut state = self.state.lock();
            self.purge_expired(&mut state, key);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.props.remove(prop);
            }
        }
        self.notify(StoreEvent::PropDeleted {
            key: key.to_owned(),
            prop: prop.to_owned(),
        });
        Ok(())
    }

    async fn incr_prop_by(&self, key: &str, prop: &str, amount: i64) -> Result<i64, Error> {
        self.record(StoreOp::IncrPropBy {
            key: key.to_owned(),
            prop: prop.to_owned(),
            amount,
        })?;
        let updated = {
            let mut state = self.state.lock();
            self.purge_expired(&mut state, key);
            let props = &mut state.entries.entry(key.to_owned()).or_default().props;
            let current = match props.get(prop) {
                None => 0,
                Some(StoreValue::Int(n)) => *n,
                Some(StoreValue::Text(text)) => text
                    .parse::<i64>()
                    .map_err(|e| Error::caused_by(format!("memory store: {prop} is not an integer: {e}")))?,
            };
            let updated = current.saturating_add(amount);
            props.insert(prop.to_owned(), StoreValue::Int(updated));
            updated
        };
        self.notify(StoreEvent::PropSet {
            key: key.to_owned(),
            prop: prop.to_owned(),
        });
        Ok(updated)
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.record(StoreOp::Del(key.to_owned()))?;
        self.state.lock().entries.remove(key);
        self.notify(StoreEvent::Deleted { key: key.to_owned() });
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Error> {
        self.record(StoreOp::Expire {
            key: key.to_owned(),
            ttl,
        })?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state, key);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn acquire_lease(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, Error> {
        self.record(StoreOp::AcquireLease {
            key: key.to_owned(),
            ttl,
        })?;
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.leases.get(key).is_some_and(|lease| lease.expires_at > now) {
            return Ok(None);
        }
        state.next_token += 1;
        let token = LeaseToken::new(state.next_token);
        state.leases.insert(
            key.to_owned(),
            Lease {
                token,
                expires_at: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release_lease(&self, key: &str, token: LeaseToken) -> Result<(), Error> {
        self.record(StoreOp::ReleaseLease(key.to_owned()))?;
        let released = {
            let mut state = self.state.lock();
            let owned = state.leases.get(key).is_some_and(|lease| lease.token == token);
            if owned {
                state.leases.remove(key);
            }
            owned
        };
        if released {
            self.notify(StoreEvent::LeaseReleased { key: key.to_owned() });
        }
        Ok(())
    }

    fn create_timer(&self, namespace: &str) -> TokioTimer {
        TokioTimer::new(namespace)
    }

    fn notifications(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lease_is_exclusive_until_ttl_elapses() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);

        let first = store.acquire_lease("n:k", ttl).await.unwrap();
        assert!(first.is_some());
        assert!(store.acquire_lease("n:k", ttl).await.unwrap().is_none());

        tokio::time::advance(ttl).await;

        assert!(!store.is_leased("n:k"));
        assert!(store.acquire_lease("n:k", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_does_not_release_new_holder() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(1);

        let stale = store.acquire_lease("n:k", ttl).await.unwrap().unwrap();
        tokio::time::advance(ttl).await;
        let fresh = store.acquire_lease("n:k", ttl).await.unwrap();
        assert!(fresh.is_some());

        store.release_lease("n:k", stale).await.unwrap();

        assert!(store.is_leased("n:k"));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_removes_key_after_ttl() {
        let store = MemoryStore::new();
        store.set_prop("n:k", "value", "1".into()).await.unwrap();
        store.expire("n:k", Duration::from_secs(10)).await.unwrap();

        assert!(store.contains_key("n:k"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!store.contains_key("n:k"));
        assert_eq!(store.get_prop("n:k", "value").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_prop_by_counts_from_zero_and_accepts_text() {
        let store = MemoryStore::new();

        assert_eq!(store.incr_prop_by("n:k", "count", 1).await.unwrap(), 1);
        assert_eq!(store.incr_prop_by("n:k", "count", 2).await.unwrap(), 3);

        store.insert_prop("n:j", "count", "41");
        assert_eq!(store.incr_prop_by("n:j", "count", 1).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn failed_operations_are_recorded_and_leave_state_untouched() {
        let store = MemoryStore::new();
        store.fail_when(|op| matches!(op, StoreOp::SetProp { .. }));

        assert!(store.set_prop("n:k", "value", "1".into()).await.is_err());
        assert!(!store.contains_key("n:k"));
        assert_eq!(store.operations().len(), 1);

        store.clear_failures();
        store.set_prop("n:k", "value", "1".into()).await.unwrap();
        assert!(store.contains_key("n:k"));
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let store = MemoryStore::new();
        let mut notifications = store.notifications().unwrap();

        store.set_prop("n:k", "value", "1".into()).await.unwrap();
        store.del("n:k").await.unwrap();

        assert_eq!(
            notifications.recv().await.unwrap(),
            StoreEvent::PropSet {
                key: "n:k".to_owned(),
                prop: "value".to_owned()
            }
        );
        assert_eq!(notifications.recv().await.unwrap(), StoreEvent::Deleted { key: "n:k".to_owned() });
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.insert_prop("n:k", "value", 1_i64);

        assert_eq!(other.prop("n:k", "value"), Some(StoreValue::Int(1)));
    }

    #[test]
    fn op_accessors_expose_key_and_prop() {
        let op = StoreOp::GetProp {
            key: "n:k".to_owned(),
            prop: "hash".to_owned(),
        };
        assert_eq!(op.key(), "n:k");
        assert_eq!(op.prop(), Some("hash"));
        assert_eq!(StoreOp::Del("n:k".to_owned()).prop(), None);
    }
}
