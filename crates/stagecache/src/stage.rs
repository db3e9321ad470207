// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The stage contract and type erasure for stage chains.

use std::{fmt, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use stagecache_store::Store;

use crate::{CacheEvent, CacheValue, Clock, Error, events::Events, facade::KeyFacade};

/// State shared by every stage of one chain: the key facade, the event hub and the clock.
pub struct Core<V, S> {
    facade: KeyFacade<S>,
    events: Events<V>,
    clock: Clock,
}

impl<V, S> fmt::Debug for Core<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("facade", &self.facade)
            .field("events", &self.events)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V, S> Core<V, S> {
    pub(crate) fn new(facade: KeyFacade<S>, events: Events<V>, clock: Clock) -> Self {
        Self { facade, events, clock }
    }

    /// Returns the key facade.
    #[must_use]
    pub fn facade(&self) -> &KeyFacade<S> {
        &self.facade
    }

    /// Returns the event hub.
    #[must_use]
    pub fn events(&self) -> &Events<V> {
        &self.events
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Runs a delete under the `del:before` / `del:after` / `del:error` frame.
    pub(crate) async fn framed_del<F>(&self, key: &str, op: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>>,
    {
        self.events.emit(CacheEvent::DelBefore { key: key.to_owned() });
        let timed = self.clock.timed_async(op).await;
        match timed.result {
            Ok(()) => {
                self.events.emit(CacheEvent::DelAfter {
                    key: key.to_owned(),
                    elapsed: timed.duration,
                });
                Ok(())
            }
            Err(error) => {
                self.events.emit(CacheEvent::DelError {
                    key: key.to_owned(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}

/// A value read from the chain together with its freshness.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Fetched<V> {
    /// The stored value.
    pub value: V,
    /// Whether the entry is past its staleness threshold.
    pub stale: bool,
}

impl<V> Fetched<V> {
    /// Wraps a value that is within its staleness threshold.
    #[must_use]
    pub fn fresh(value: V) -> Self {
        Self { value, stale: false }
    }

    /// Wraps a value that is past its staleness threshold.
    #[must_use]
    pub fn stale(value: V) -> Self {
        Self { value, stale: true }
    }
}

/// One layer of a cache chain.
///
/// A stage wraps an inner stage and adds one policy. Operations it does not care
/// about are forwarded unchanged. Stages raise their own events through the shared
/// [`Core`] and return the inner stage's errors instead of swallowing them.
///
/// Stage operations are unframed: the outermost [`Cache`](crate::Cache) raises the
/// `before`/`after`/`hit`/`miss`/`error` events around the whole chain.
pub trait Stage<V: CacheValue>: Send + Sync {
    /// The store the chain runs on.
    type Store: Store + 'static;

    /// Returns the state shared by the chain.
    fn core(&self) -> &Arc<Core<V, Self::Store>>;

    /// Reads a value, letting population stages compute it on a miss.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send;

    /// Reads a value without triggering population.
    fn lookup(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send {
        self.get(key)
    }

    /// Reads a value and whether it is stale, without triggering population.
    ///
    /// Stages that know entry age report staleness here; the default reports
    /// whatever [`lookup`](Self::lookup) returns as fresh.
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<Fetched<V>>, Error>> + Send {
        async move { Ok(self.lookup(key).await?.map(Fetched::fresh)) }
    }

    /// Writes a value.
    fn set(&self, key: &str, value: &V) -> impl Future<Output = Result<(), Error>> + Send;

    /// Deletes a value.
    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

trait ErasedStage<V, S>: Send + Sync {
    fn core(&self) -> &Arc<Core<V, S>>;
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, Error>>;
    fn lookup<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, Error>>;
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Fetched<V>>, Error>>;
    fn set<'a>(&'a self, key: &'a str, value: &'a V) -> BoxFuture<'a, Result<(), Error>>;
    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), Error>>;
}

impl<V, T> ErasedStage<V, T::Store> for T
where
    V: CacheValue,
    T: Stage<V> + 'static,
{
    fn core(&self) -> &Arc<Core<V, T::Store>> {
        Stage::core(self)
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, Error>> {
        Stage::get(self, key).boxed()
    }

    fn lookup<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, Error>> {
        Stage::lookup(self, key).boxed()
    }

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Fetched<V>>, Error>> {
        Stage::fetch(self, key).boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a V) -> BoxFuture<'a, Result<(), Error>> {
        Stage::set(self, key, value).boxed()
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Stage::del(self, key).boxed()
    }
}

/// Extension trait for converting any [`Stage`] into a [`DynamicStage`].
pub trait DynamicStageExt<V: CacheValue>: Stage<V> + Sized + 'static {
    /// Erases the concrete chain type.
    fn into_dynamic(self) -> DynamicStage<V, Self::Store> {
        DynamicStage(Arc::new(self))
    }
}

impl<V: CacheValue, T: Stage<V> + 'static> DynamicStageExt<V> for T {}

/// A clonable stage chain with its concrete type erased.
///
/// Chains assembled from configuration differ in which stages they contain;
/// erasing the type lets them all share one cache type.
pub struct DynamicStage<V, S>(Arc<dyn ErasedStage<V, S>>);

impl<V, S> fmt::Debug for DynamicStage<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicStage").finish()
    }
}

impl<V, S> Clone for DynamicStage<V, S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V, S> Stage<V> for DynamicStage<V, S>
where
    V: CacheValue,
    S: Store + 'static,
{
    type Store = S;

    fn core(&self) -> &Arc<Core<V, S>> {
        self.0.core()
    }

    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        self.0.get(key).await
    }

    async fn lookup(&self, key: &str) -> Result<Option<V>, Error> {
        self.0.lookup(key).await
    }

    async fn fetch(&self, key: &str) -> Result<Option<Fetched<V>>, Error> {
        self.0.fetch(key).await
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), Error> {
        self.0.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.0.del(key).await
    }
}
