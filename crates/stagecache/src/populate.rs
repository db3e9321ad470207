// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compute-on-miss population.

use std::{sync::Arc, time::Duration};

use crate::{
    CacheEvent, CacheValue, Error,
    error::BoxError,
    revalidate::Revalidations,
    stage::{Core, Fetched, Stage},
};

/// Default bound on a single population call.
pub const DEFAULT_POPULATE_TIMEOUT: Duration = Duration::from_secs(30);

/// A function that computes the value for a key on a miss.
///
/// Implemented for any `Fn(String) -> impl Future<Output = Result<V, E>>` closure
/// whose error converts into a boxed error.
///
/// # Examples
///
/// ```
/// use stagecache::{BoxError, Populate};
///
/// fn assert_populate<P: Populate<String>>(_: P) {}
///
/// assert_populate(|key: String| async move { Ok::<_, BoxError>(key.to_uppercase()) });
/// ```
pub trait Populate<V>: Send + Sync {
    /// Computes the value for `key`.
    fn populate(&self, key: &str) -> impl Future<Output = Result<V, BoxError>> + Send;
}

impl<V, F, Fut, E> Populate<V> for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send,
    E: Into<BoxError>,
{
    fn populate(&self, key: &str) -> impl Future<Output = Result<V, BoxError>> + Send {
        let pending = self(key.to_owned());
        async move { pending.await.map_err(Into::into) }
    }
}

/// Fills misses by calling a [`Populate`] function and writing the result back.
///
/// A miss raises `populate:before`, runs the function bounded by the populate
/// timeout, writes the value through the inner stage and raises `populate:after`.
/// A failed or timed-out computation raises `populate:error` and nothing is cached.
///
/// A stale hit is returned as is while a background task recomputes the value.
/// Each process runs at most one such task per key; its failures are reported
/// through [`CacheEvent::Error`] and never reach a caller.
#[derive(Debug)]
pub struct PopulateStage<I, P> {
    shared: Arc<Shared<I, P>>,
    revalidations: Arc<Revalidations>,
}

#[derive(Debug)]
struct Shared<I, P> {
    inner: I,
    populate: P,
    timeout: Duration,
}

impl<I, P> Clone for PopulateStage<I, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            revalidations: Arc::clone(&self.revalidations),
        }
    }
}

impl<I, P> PopulateStage<I, P> {
    /// Wraps `inner` with compute-on-miss population.
    #[must_use]
    pub fn new(inner: I, populate: P, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared { inner, populate, timeout }),
            revalidations: Arc::new(Revalidations::default()),
        }
    }

    /// Returns the bound on a single population call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub(crate) fn revalidations(&self) -> &Arc<Revalidations> {
        &self.revalidations
    }

    /// Computes, stores and returns the value for `key`.
    pub(crate) async fn fill<V>(&self, key: &str) -> Result<V, Error>
    where
        V: CacheValue,
        I: Stage<V>,
        P: Populate<V>,
    {
        let events = self.shared.inner.core().events();
        events.emit(CacheEvent::PopulateBefore { key: key.to_owned() });

        match self.compute(key).await {
            Ok(value) => {
                events.emit(CacheEvent::PopulateAfter {
                    key: key.to_owned(),
                    value: value.clone(),
                });
                Ok(value)
            }
            Err(error) => {
                events.emit(CacheEvent::PopulateError {
                    key: key.to_owned(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn compute<V>(&self, key: &str) -> Result<V, Error>
    where
        V: CacheValue,
        I: Stage<V>,
        P: Populate<V>,
    {
        let shared = &*self.shared;
        let value = match tokio::time::timeout(shared.timeout, shared.populate.populate(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(cause)) => return Err(Error::populate(cause)),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "populating '{key}' did not complete within {}ms",
                    shared.timeout.as_millis()
                )));
            }
        };
        shared.inner.set(key, &value).await?;
        Ok(value)
    }

    /// Recomputes a stale entry on a background task.
    fn revalidate<V>(&self, key: &str)
    where
        V: CacheValue,
        I: Stage<V> + 'static,
        P: Populate<V> + 'static,
    {
        let this = self.clone();
        self.revalidations.spawn(key, move |key| async move {
            if let Err(error) = this.fill::<V>(&key).await {
                this.shared.inner.core().events().report(&key, error);
            }
        });
    }
}

impl<V, I, P> Stage<V> for PopulateStage<I, P>
where
    V: CacheValue,
    I: Stage<V> + 'static,
    P: Populate<V> + 'static,
{
    type Store = I::Store;

    fn core(&self) -> &Arc<Core<V, I::Store>> {
        self.shared.inner.core()
    }

    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        match self.shared.inner.fetch(key).await? {
            Some(Fetched { value, stale }) => {
                if stale {
                    self.revalidate::<V>(key);
                }
                Ok(Some(value))
            }
            None => self.fill(key).await.map(Some),
        }
    }

    fn lookup(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send {
        self.shared.inner.get(key)
    }

    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<Fetched<V>>, Error>> + Send {
        self.shared.inner.fetch(key)
    }

    fn set(&self, key: &str, value: &V) -> impl Future<Output = Result<(), Error>> + Send {
        self.shared.inner.set(key, value)
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send {
        self.shared.inner.del(key)
    }
}
