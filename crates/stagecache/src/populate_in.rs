// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Distributed single-flight population over advisory leases.

use std::{pin::pin, sync::Arc, time::Duration};

use futures::future::select;
use stagecache_store::{StoreEvent, Timer};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    Backoff, CacheEvent, CacheValue, Error,
    clock::saturating_millis,
    facade::{LeaseGuard, VALUE},
    populate::{Populate, PopulateStage},
    stage::{Core, Fetched, Stage},
};

/// Default lease TTL for one population attempt.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of consecutive failures before population is cut off.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 5;

/// Settings for [`PopulateInStage`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stagecache::PopulateInOptions;
///
/// let options = PopulateInOptions::new(Duration::from_secs(10))
///     .lease_timeout(Duration::from_secs(5))
///     .max_attempts(3);
/// assert_eq!(options.populate_in(), Duration::from_secs(10));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PopulateInOptions {
    populate_in: Duration,
    lease_timeout: Duration,
    max_attempts: u64,
    backoff: Backoff,
}

impl PopulateInOptions {
    /// Creates options with an overall budget of `populate_in` and default settings otherwise.
    #[must_use]
    pub fn new(populate_in: Duration) -> Self {
        Self {
            populate_in,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }

    /// Sets the lease TTL for one population attempt.
    #[must_use]
    pub fn lease_timeout(mut self, ttl: Duration) -> Self {
        self.lease_timeout = ttl;
        self
    }

    /// Sets how many consecutive failures cut population off.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the re-attempt delay schedule.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the overall budget for the whole attempt sequence.
    #[must_use]
    pub fn populate_in(&self) -> Duration {
        self.populate_in
    }

    /// Returns the lease TTL for one population attempt.
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        self.lease_timeout
    }

    /// Returns the consecutive-failure cutoff.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.max_attempts
    }

    /// Returns the re-attempt delay schedule.
    #[must_use]
    pub fn backoff_schedule(&self) -> Backoff {
        self.backoff
    }
}

/// Coordinates population across processes so a key is computed at most once at a time.
///
/// On a miss the stage raises `populateIn:before` and loops:
///
/// - It tries to take the key's lease. The winner checks the durable failure count,
///   computes the value through the wrapped [`PopulateStage`], releases the lease and
///   resets the count. A failed computation bumps the count, releases the lease and
///   backs off; once the count reaches the cutoff it raises `populateIn:maxAttempts`,
///   records when the cutoff was reached, and fails. The cutoff holds for the overall
///   budget, after which the next lease holder clears the count and computes again.
/// - A loser raises `populateIn:pause` and waits for the backoff delay or for a store
///   notification that the value was written or the lease released, then re-reads.
///
/// The loop ends with `populateIn:after` once a value is available, or with
/// `populateIn:error` when the budget runs out or a store call fails. Store failures
/// are never retried.
///
/// A stale hit is served immediately. A background task then recomputes it, but only
/// if it can take the lease, so at most one process revalidates a key at a time.
#[derive(Debug)]
pub struct PopulateInStage<I, P> {
    inner: PopulateStage<I, P>,
    options: PopulateInOptions,
}

impl<I, P> Clone for PopulateInStage<I, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            options: self.options,
        }
    }
}

impl<I, P> PopulateInStage<I, P> {
    /// Wraps a populate stage with distributed coordination.
    #[must_use]
    pub fn new(inner: PopulateStage<I, P>, options: PopulateInOptions) -> Self {
        Self { inner, options }
    }

    /// Returns the configured settings.
    #[must_use]
    pub fn options(&self) -> &PopulateInOptions {
        &self.options
    }
}

impl<I, P> PopulateInStage<I, P> {
    async fn run<V>(&self, key: &str) -> Result<V, Error>
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        let core = Stage::<V>::core(&self.inner);
        let facade = core.facade();
        let deadline = core.clock().instant() + self.options.populate_in;
        let lease = facade.create_lease(self.options.lease_timeout);
        let timer = facade.create_timer();
        let mut notifications = facade.notifications();
        let mut delays = self.options.backoff.delays();
        let store_key = facade.store_key(key);

        loop {
            if core.clock().instant() >= deadline {
                return Err(self.budget_exhausted(key));
            }

            let acquired = lease.acquire(key).await?;
            core.events().telemetry().lease(key, acquired.is_some());

            if let Some(guard) = acquired {
                if let Some(value) = self.attempt(core, key, guard).await? {
                    return Ok(value);
                }
                // Our own release must not cut the backoff short.
                notifications = facade.notifications();
            } else {
                core.events().emit(CacheEvent::PopulateInPause { key: key.to_owned() });
            }

            let now = core.clock().instant();
            if now >= deadline {
                return Err(self.budget_exhausted(key));
            }
            let delay = delays.next().unwrap_or_else(|| self.options.backoff.max());
            Self::wait(&timer, notifications.as_mut(), &store_key, delay.min(deadline.saturating_duration_since(now))).await;

            if let Some(value) = Stage::<V>::lookup(&self.inner, key).await? {
                return Ok(value);
            }
        }
    }

    /// Runs one population attempt while holding the lease.
    ///
    /// Returns `Ok(None)` when the attempt failed but may be retried.
    async fn attempt<V>(&self, core: &Core<V, I::Store>, key: &str, guard: LeaseGuard<I::Store>) -> Result<Option<V>, Error>
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        let facade = core.facade();

        let outcome = match self.cut_off(core, key).await {
            Ok(true) => {
                core.events().emit(CacheEvent::PopulateInMaxAttempts { key: key.to_owned() });
                Err(Error::max_attempts(key, None))
            }
            Ok(false) => self.compute(key).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(value) => {
                release(core, guard).await;
                if let Err(error) = facade.reset_populate_in_error_count(key).await {
                    core.events().report(key, error);
                }
                Ok(Some(value))
            }
            Err(error) if error.is_retryable_population_failure() => {
                let failures = match facade.increment_populate_in_error_count(key).await {
                    Ok(failures) => failures,
                    Err(store_error) => {
                        release(core, guard).await;
                        return Err(store_error);
                    }
                };
                if failures >= self.options.max_attempts {
                    core.events().emit(CacheEvent::PopulateInMaxAttempts { key: key.to_owned() });
                    if let Err(store_error) = facade.set_populate_in_cutoff_at(key, core.clock().now_ms()).await {
                        core.events().report(key, store_error);
                    }
                    release(core, guard).await;
                    return Err(Error::max_attempts(key, Some(error)));
                }
                release(core, guard).await;
                Ok(None)
            }
            Err(error) => {
                release(core, guard).await;
                Err(error)
            }
        }
    }

    /// Returns whether population of `key` is cut off.
    ///
    /// A cutoff lasts for the overall budget from when it was reached; an older one is
    /// cleared here. A count at the limit without a cutoff mark starts its cutoff now.
    async fn cut_off<V>(&self, core: &Core<V, I::Store>, key: &str) -> Result<bool, Error>
    where
        V: CacheValue,
        I: Stage<V>,
    {
        let facade = core.facade();
        if facade.get_populate_in_error_count(key).await? < self.options.max_attempts {
            return Ok(false);
        }

        let now = core.clock().now_ms();
        match facade.get_populate_in_cutoff_at(key).await? {
            Some(cutoff_at) if now.saturating_sub(cutoff_at) >= saturating_millis(self.options.populate_in) => {
                facade.reset_populate_in_error_count(key).await?;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                facade.set_populate_in_cutoff_at(key, now).await?;
                Ok(true)
            }
        }
    }

    /// Recomputes a stale entry on a background task.
    fn revalidate<V>(&self, key: &str)
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        let this = self.clone();
        self.inner.revalidations().spawn(key, move |key| async move {
            if let Err(error) = this.revalidate_under_lease::<V>(&key).await {
                Stage::<V>::core(&this.inner).events().report(&key, error);
            }
        });
    }

    /// Recomputes `key` if this process can take its lease and population is not cut off.
    async fn revalidate_under_lease<V>(&self, key: &str) -> Result<(), Error>
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        let core = Stage::<V>::core(&self.inner);
        let lease = core.facade().create_lease(self.options.lease_timeout);
        let acquired = lease.acquire(key).await?;
        core.events().telemetry().lease(key, acquired.is_some());
        let Some(guard) = acquired else {
            return Ok(());
        };

        let refreshed = match self.cut_off(core, key).await {
            Ok(true) => Ok(false),
            Ok(false) => self.inner.fill::<V>(key).await.map(|_| true),
            Err(error) => Err(error),
        };
        release(core, guard).await;

        if refreshed? {
            core.facade().reset_populate_in_error_count(key).await?;
        }
        Ok(())
    }

    async fn compute<V>(&self, key: &str) -> Result<V, Error>
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        // A peer may have finished between our read and winning the lease.
        if let Some(value) = Stage::<V>::lookup(&self.inner, key).await? {
            return Ok(value);
        }
        self.inner.fill(key).await
    }

    async fn wait<T: Timer>(timer: &T, notifications: Option<&mut broadcast::Receiver<StoreEvent>>, store_key: &str, delay: Duration) {
        let sleep = pin!(timer.schedule(delay));
        let Some(receiver) = notifications else {
            sleep.await;
            return;
        };

        let woken = pin!(async {
            loop {
                match receiver.recv().await {
                    Ok(event) if wakes(&event, store_key) => return,
                    Ok(_) => {}
                    // Missed notifications may include ours.
                    Err(RecvError::Lagged(_)) => return,
                    Err(RecvError::Closed) => std::future::pending::<()>().await,
                }
            }
        });

        select(sleep, woken).await;
    }

    fn budget_exhausted(&self, key: &str) -> Error {
        Error::timeout(format!(
            "distributed population of '{key}' did not complete within {}ms",
            self.options.populate_in.as_millis()
        ))
    }
}

fn wakes(event: &StoreEvent, store_key: &str) -> bool {
    event.key() == store_key
        && match event {
            StoreEvent::PropSet { prop, .. } => prop == VALUE,
            StoreEvent::LeaseReleased { .. } | StoreEvent::Deleted { .. } | StoreEvent::Expired { .. } => true,
            _ => false,
        }
}

async fn release<V, S>(core: &Core<V, S>, guard: LeaseGuard<S>)
where
    S: stagecache_store::Store,
{
    let key = guard.key().to_owned();
    if let Err(error) = guard.release().await {
        core.events().report(&key, error);
    }
}

impl<V, I, P> Stage<V> for PopulateInStage<I, P>
where
    V: CacheValue,
    I: Stage<V> + 'static,
    P: Populate<V> + 'static,
{
    type Store = I::Store;

    fn core(&self) -> &Arc<Core<V, I::Store>> {
        self.inner.core()
    }

    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        if let Some(Fetched { value, stale }) = Stage::<V>::fetch(&self.inner, key).await? {
            if stale {
                self.revalidate::<V>(key);
            }
            return Ok(Some(value));
        }

        let events = Stage::<V>::core(self).events();
        events.emit(CacheEvent::PopulateInBefore { key: key.to_owned() });

        match self.run(key).await {
            Ok(value) => {
                events.emit(CacheEvent::PopulateInAfter {
                    key: key.to_owned(),
                    value: value.clone(),
                });
                Ok(Some(value))
            }
            Err(error) => {
                events.emit(CacheEvent::PopulateInError {
                    key: key.to_owned(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn lookup(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send {
        self.inner.lookup(key)
    }

    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<Fetched<V>>, Error>> + Send {
        self.inner.fetch(key)
    }

    fn set(&self, key: &str, value: &V) -> impl Future<Output = Result<(), Error>> + Send {
        self.inner.set(key, value)
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send {
        self.inner.del(key)
    }
}
