// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A decorator-chain cache over an external key-value store.
//!
//! A cache is a linear chain of stages, each adding one policy on top of the
//! stage it wraps:
//! - **Base**: plain reads and writes of an entry's properties through the [`KeyFacade`]
//! - **Write dedup**: skips writes whose content hash is unchanged
//! - **Expiry**: hard TTL (delete and miss) and a softer staleness signal
//! - **Populate**: computes a value on a miss and writes it back; a stale hit is
//!   served as is while the value is recomputed in the background
//! - **Distributed populate**: single-flight population across processes using
//!   advisory leases, timer backoff and a durable failure counter
//!
//! The outermost [`Cache`] frames each call with `before`/`after`/`error` events,
//! and stages raise their own events inside that frame. Listeners registered with
//! [`Cache::on`] see every event raised anywhere in the chain.
//!
//! # Examples
//!
//! ## Building a chain
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use stagecache::{BoxError, Cache, ExpireOptions, PopulateInOptions};
//! use stagecache_store::testing::MemoryStore;
//!
//! # async fn example() -> Result<(), stagecache::Error> {
//! let cache = Cache::builder::<String, _>(MemoryStore::new(), "greetings")
//!     .expire(ExpireOptions::new().stale_in(Duration::from_secs(60)))
//!     .populate(|name: String| async move { Ok::<_, BoxError>(format!("hello, {name}")) })
//!     .populate_in(PopulateInOptions::new(Duration::from_secs(5)))
//!     .build();
//!
//! cache.on(|event| println!("{} {}", event.name(), event.key()));
//!
//! assert_eq!(cache.get("world").await?, Some("hello, world".to_owned()));
//! # Ok(())
//! # }
//! ```
//!
//! ## From configuration
//!
//! ```no_run
//! use stagecache::{CacheConfig, Client};
//! use stagecache_store::testing::MemoryStore;
//!
//! # async fn example() -> Result<(), stagecache::Error> {
//! let client = Client::new(MemoryStore::new());
//! let config = CacheConfig::from_json(r#"{ "namespace": "sessions", "expiresIn": "30 minutes" }"#)?;
//! let sessions = client.create::<u64>(&config)?;
//!
//! sessions.set("abc", 42).await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod base;
mod builder;
mod cache;
mod client;
mod clock;
mod codec;
mod config;
mod dedup;
mod error;
mod events;
mod expire;
pub mod facade;
mod interval;
mod populate;
mod populate_in;
mod revalidate;
mod stage;
mod telemetry;

#[doc(inline)]
pub use backoff::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX};
#[doc(inline)]
pub use base::BaseStage;
#[doc(inline)]
pub use builder::{CacheBuilder, Loader};
#[doc(inline)]
pub use cache::Cache;
#[doc(inline)]
pub use client::Client;
#[doc(inline)]
pub use clock::{Clock, TimedResult};
#[doc(inline)]
pub use codec::CacheValue;
#[doc(inline)]
pub use config::{CacheConfig, StoreOptions};
#[doc(inline)]
pub use dedup::DedupStage;
#[doc(inline)]
pub use error::{BoxError, Error, ErrorKind, Result};
#[doc(inline)]
pub use events::{CacheEvent, Events};
#[doc(inline)]
pub use expire::{ExpireOptions, ExpireStage};
#[doc(inline)]
pub use facade::{KeyFacade, Lease, LeaseGuard};
#[doc(inline)]
pub use interval::parse_interval;
#[doc(inline)]
pub use populate::{DEFAULT_POPULATE_TIMEOUT, Populate, PopulateStage};
#[doc(inline)]
pub use populate_in::{DEFAULT_LEASE_TIMEOUT, DEFAULT_MAX_ATTEMPTS, PopulateInOptions, PopulateInStage};
#[doc(inline)]
pub use stage::{Core, DynamicStage, DynamicStageExt, Fetched, Stage};
