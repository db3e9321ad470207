// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! The store boundary for `stagecache`.
//!
//! This crate defines the [`Store`] trait a key-value service must satisfy so the
//! `stagecache` stage chain can run on top of it: namespaced property storage,
//! advisory TTL-bounded leases, timers, and an optional notification channel.
//!
//! # Overview
//!
//! The store is treated as an opaque service. It knows nothing about cache entries,
//! staleness or population; it only stores named properties under keys, hands out
//! leases, and schedules timers. Every key it receives is already namespaced by the
//! caller.
//!
//! # Implementing a Store
//!
//! ```
//! use std::time::Duration;
//!
//! use stagecache_store::{Error, LeaseToken, Store, StoreValue, TokioTimer};
//!
//! struct NullStore;
//!
//! impl Store for NullStore {
//!     type Timer = TokioTimer;
//!
//!     async fn get_prop(&self, _key: &str, _prop: &str) -> Result<Option<StoreValue>, Error> {
//!         Ok(None)
//!     }
//!
//!     async fn set_prop(&self, _key: &str, _prop: &str, _value: StoreValue) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     async fn del_prop(&self, _key: &str, _prop: &str) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     async fn incr_prop_by(&self, _key: &str, _prop: &str, amount: i64) -> Result<i64, Error> {
//!         Ok(amount)
//!     }
//!
//!     async fn del(&self, _key: &str) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     async fn acquire_lease(&self, _key: &str, _ttl: Duration) -> Result<Option<LeaseToken>, Error> {
//!         Ok(Some(LeaseToken::new(1)))
//!     }
//!
//!     async fn release_lease(&self, _key: &str, _token: LeaseToken) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     fn create_timer(&self, namespace: &str) -> TokioTimer {
//!         TokioTimer::new(namespace)
//!     }
//! }
//! ```
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::MemoryStore`], an in-memory fake with
//! lease TTLs, key expiry, notifications, operation recording and failure injection.

pub mod error;
mod event;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod timer;
mod value;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use event::StoreEvent;
#[doc(inline)]
pub use store::Store;
#[doc(inline)]
pub use timer::{Timer, TokioTimer};
#[doc(inline)]
pub use value::{LeaseToken, StoreValue};
