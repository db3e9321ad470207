// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hard expiry and staleness based on entry age.

use std::{sync::Arc, time::Duration};

use crate::{
    CacheEvent, CacheValue, Error,
    clock::saturating_millis,
    stage::{Core, Fetched, Stage},
};

/// Age thresholds for [`ExpireStage`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stagecache::ExpireOptions;
///
/// let options = ExpireOptions::new()
///     .expires_in(Duration::from_secs(3600))
///     .stale_in(Duration::from_secs(60));
/// assert_eq!(options.expires_in_ms(), Some(3_600_000));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpireOptions {
    expires_in: Option<Duration>,
    stale_in: Option<Duration>,
}

impl ExpireOptions {
    /// Creates options with neither threshold set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hard TTL: entries at least this old are deleted and read as a miss.
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Sets the staleness threshold: entries at least this old raise `get:stale`
    /// but are still served.
    #[must_use]
    pub fn stale_in(mut self, threshold: Duration) -> Self {
        self.stale_in = Some(threshold);
        self
    }

    /// Returns the hard TTL in milliseconds, if set.
    #[must_use]
    pub fn expires_in_ms(&self) -> Option<u64> {
        self.expires_in.map(saturating_millis)
    }

    /// Returns the staleness threshold in milliseconds, if set.
    #[must_use]
    pub fn stale_in_ms(&self) -> Option<u64> {
        self.stale_in.map(saturating_millis)
    }

    /// Returns true if at least one threshold is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.expires_in.is_some() || self.stale_in.is_some()
    }
}

/// Enforces hard expiry and raises staleness signals based on `createdAt`.
///
/// An entry without `createdAt` is read through unchanged. An entry whose age
/// reaches `expires_in` raises `get:expire`, is deleted (under its own `del`
/// frame) and reads as a miss. Otherwise an entry whose age reaches `stale_in`
/// raises `get:stale` and is still returned; [`Stage::fetch`] marks it stale so a
/// population stage above can revalidate it.
#[derive(Debug)]
pub struct ExpireStage<I> {
    inner: I,
    options: ExpireOptions,
}

impl<I> ExpireStage<I> {
    /// Wraps `inner` with age-based expiry.
    #[must_use]
    pub fn new(inner: I, options: ExpireOptions) -> Self {
        Self { inner, options }
    }

    /// Returns the configured thresholds.
    #[must_use]
    pub fn options(&self) -> &ExpireOptions {
        &self.options
    }
}

/// Outcome of checking an entry's age.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Age {
    Fresh,
    Stale,
    Expired,
}

impl<I> ExpireStage<I> {
    /// Classifies the entry, raising `get:expire` or `get:stale` and deleting expired entries.
    async fn check<V>(&self, key: &str) -> Result<Age, Error>
    where
        V: CacheValue,
        I: Stage<V>,
    {
        let core = self.inner.core();
        let Some(created_at) = core.facade().get_created_at(key).await? else {
            return Ok(Age::Fresh);
        };
        let age = core.clock().now_ms().saturating_sub(created_at);

        if self.options.expires_in_ms().is_some_and(|ttl| age >= ttl) {
            core.events().emit(CacheEvent::GetExpire { key: key.to_owned() });
            core.framed_del(key, self.inner.del(key)).await?;
            return Ok(Age::Expired);
        }

        if self.options.stale_in_ms().is_some_and(|threshold| age >= threshold) {
            core.events().emit(CacheEvent::GetStale { key: key.to_owned() });
            return Ok(Age::Stale);
        }

        Ok(Age::Fresh)
    }
}

impl<V, I> Stage<V> for ExpireStage<I>
where
    V: CacheValue,
    I: Stage<V>,
{
    type Store = I::Store;

    fn core(&self) -> &Arc<Core<V, I::Store>> {
        self.inner.core()
    }

    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        match self.check::<V>(key).await? {
            Age::Expired => Ok(None),
            Age::Fresh | Age::Stale => self.inner.get(key).await,
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<V>, Error> {
        match self.check::<V>(key).await? {
            Age::Expired => Ok(None),
            Age::Fresh | Age::Stale => self.inner.lookup(key).await,
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Fetched<V>>, Error> {
        match self.check::<V>(key).await? {
            Age::Expired => Ok(None),
            Age::Stale => Ok(self.inner.lookup(key).await?.map(Fetched::stale)),
            Age::Fresh => self.inner.fetch(key).await,
        }
    }

    fn set(&self, key: &str, value: &V) -> impl Future<Output = Result<(), Error>> + Send {
        self.inner.set(key, value)
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send {
        self.inner.del(key)
    }
}
