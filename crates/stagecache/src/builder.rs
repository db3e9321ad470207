// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typestate builder that assembles a stage chain in its fixed order.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use stagecache_store::Store;

use crate::{
    BaseStage, Cache, CacheConfig, CacheValue, Clock, DedupStage, ExpireOptions, ExpireStage, Populate, PopulateInOptions,
    PopulateInStage, PopulateStage,
    events::Events,
    facade::KeyFacade,
    populate::DEFAULT_POPULATE_TIMEOUT,
    stage::{Core, DynamicStage, DynamicStageExt},
    telemetry::CacheTelemetry,
};

/// Builder state holding the population function.
#[derive(Debug)]
pub struct Loader<P>(P);

/// Builder for a [`Cache`].
///
/// Created by [`Cache::builder`]. Stages are always assembled innermost to
/// outermost as base, write dedup, expiry, populate, distributed populate; each
/// is present only when configured. The state parameter `P` is `()` until
/// [`populate`](CacheBuilder::populate) sets a [`Loader`], and distributed population can
/// only be configured once a loader exists.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use stagecache::{BoxError, Cache, ExpireOptions, PopulateInOptions};
/// use stagecache_store::testing::MemoryStore;
///
/// let cache = Cache::builder::<String, _>(MemoryStore::new(), "profiles")
///     .expire(ExpireOptions::new().expires_in(Duration::from_secs(3600)))
///     .populate(|key: String| async move { Ok::<_, BoxError>(format!("profile of {key}")) })
///     .populate_in(PopulateInOptions::new(Duration::from_secs(10)))
///     .with_logs()
///     .build();
/// ```
#[derive(Debug)]
pub struct CacheBuilder<V, S, P = ()> {
    store: Arc<S>,
    namespace: String,
    only_set_changed: bool,
    expire: ExpireOptions,
    populate: P,
    populate_timeout: Duration,
    populate_in: Option<PopulateInOptions>,
    logs: bool,
    clock: Option<Clock>,
    _phantom: PhantomData<V>,
}

impl<V, S> CacheBuilder<V, S, ()> {
    pub(crate) fn new(store: Arc<S>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_owned(),
            only_set_changed: true,
            expire: ExpireOptions::default(),
            populate: (),
            populate_timeout: DEFAULT_POPULATE_TIMEOUT,
            populate_in: None,
            logs: false,
            clock: None,
            _phantom: PhantomData,
        }
    }

    /// Computes values on a miss with `loader`.
    ///
    /// The loader receives the logical key. Its result is written back through the
    /// chain before it is returned to the caller.
    pub fn populate<P>(self, loader: P) -> CacheBuilder<V, S, Loader<P>>
    where
        P: Populate<V> + 'static,
    {
        CacheBuilder {
            store: self.store,
            namespace: self.namespace,
            only_set_changed: self.only_set_changed,
            expire: self.expire,
            populate: Loader(loader),
            populate_timeout: self.populate_timeout,
            populate_in: self.populate_in,
            logs: self.logs,
            clock: self.clock,
            _phantom: PhantomData,
        }
    }
}

impl<V, S, P> CacheBuilder<V, S, P> {
    /// Sets whether writes of unchanged values are skipped. Enabled by default.
    #[must_use]
    pub fn only_set_changed(mut self, enabled: bool) -> Self {
        self.only_set_changed = enabled;
        self
    }

    /// Enables age-based expiry and staleness.
    #[must_use]
    pub fn expire(mut self, options: ExpireOptions) -> Self {
        self.expire = options;
        self
    }

    /// Sets the bound on a single population call. Defaults to 30 seconds.
    #[must_use]
    pub fn populate_timeout(mut self, timeout: Duration) -> Self {
        self.populate_timeout = timeout;
        self
    }

    /// Logs every cache event through `tracing`.
    #[must_use]
    pub fn with_logs(mut self) -> Self {
        self.logs = true;
        self
    }

    /// Uses `clock` for timestamps and timings instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Applies every stage setting found in `config`.
    ///
    /// Distributed population settings take effect only once a loader is set.
    #[must_use]
    pub fn from_config(mut self, config: &CacheConfig) -> Self {
        self.expire = config.expire_options();
        self.populate_timeout = config.populate_timeout_or_default();
        self.populate_in = config.populate_in_options();
        if let Some(enabled) = config.only_set_changed {
            self.only_set_changed = enabled;
        }
        if let Some(enabled) = config.logs {
            self.logs = enabled;
        }
        self
    }
}

impl<V, S, P> CacheBuilder<V, S, P>
where
    V: CacheValue,
    S: Store + 'static,
{
    /// Builds the base, dedup and expiry part of the chain.
    fn storage_chain(&mut self) -> DynamicStage<V, S> {
        let facade = KeyFacade::new(Arc::clone(&self.store), &self.namespace);
        let events = Events::new(CacheTelemetry::new(&self.namespace, self.logs));
        let clock = self.clock.take().unwrap_or_default();
        let core = Arc::new(Core::new(facade, events, clock));

        let base = BaseStage::new(core);
        let chain = if self.only_set_changed {
            DedupStage::new(base).into_dynamic()
        } else {
            base.into_dynamic()
        };

        if self.expire.is_enabled() {
            ExpireStage::new(chain, self.expire).into_dynamic()
        } else {
            chain
        }
    }
}

impl<V, S> CacheBuilder<V, S, ()>
where
    V: CacheValue,
    S: Store + 'static,
{
    /// Builds the cache.
    #[must_use]
    pub fn build(mut self) -> Cache<V, DynamicStage<V, S>> {
        Cache::new(self.storage_chain())
    }
}

impl<V, S, P> CacheBuilder<V, S, Loader<P>>
where
    V: CacheValue,
    S: Store + 'static,
    P: Populate<V> + 'static,
{
    /// Coordinates population across processes sharing the store.
    #[must_use]
    pub fn populate_in(mut self, options: PopulateInOptions) -> Self {
        self.populate_in = Some(options);
        self
    }

    /// Builds the cache.
    #[must_use]
    pub fn build(mut self) -> Cache<V, DynamicStage<V, S>> {
        let chain = self.storage_chain();
        let populate = PopulateStage::new(chain, self.populate.0, self.populate_timeout);

        let chain = match self.populate_in {
            Some(options) => PopulateInStage::new(populate, options).into_dynamic(),
            None => populate.into_dynamic(),
        };
        Cache::new(chain)
    }
}
