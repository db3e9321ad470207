// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The outermost cache handle.

use std::{marker::PhantomData, sync::Arc};

use stagecache_store::Store;

use crate::{
    CacheEvent, CacheValue, Error,
    builder::CacheBuilder,
    stage::{Core, Stage},
};

/// The user-facing cache: a stage chain plus the event frame around it.
///
/// `Cache` raises `*:before` when a call starts, `*:after` when it completes,
/// `get:hit` or `get:miss` after a successful read, and `*:error` instead of
/// `*:after` when the call fails. Events raised by stages inside the chain land
/// between the frame's `before` and `after`, so the ordering a listener sees does
/// not depend on which stages are configured.
///
/// This type does NOT implement [`Stage`]: it is always the outermost wrapper.
///
/// # Examples
///
/// ```no_run
/// use stagecache::Cache;
/// use stagecache_store::testing::MemoryStore;
///
/// # async fn example() -> Result<(), stagecache::Error> {
/// let cache = Cache::builder::<String, _>(MemoryStore::new(), "users").build();
///
/// cache.on(|event| println!("{} {}", event.name(), event.key()));
///
/// cache.set("alice", "Alice".to_owned()).await?;
/// assert_eq!(cache.get("alice").await?, Some("Alice".to_owned()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cache<V, L> {
    stage: L,
    _phantom: PhantomData<V>,
}

impl Cache<(), ()> {
    /// Creates a new cache builder over `store`, scoped to `namespace`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    ///
    /// use stagecache::{Cache, ExpireOptions};
    /// use stagecache_store::testing::MemoryStore;
    ///
    /// let cache = Cache::builder::<u64, _>(MemoryStore::new(), "counters")
    ///     .expire(ExpireOptions::new().stale_in(Duration::from_secs(60)))
    ///     .build();
    /// ```
    #[must_use]
    pub fn builder<V, S>(store: S, namespace: &str) -> CacheBuilder<V, S>
    where
        V: CacheValue,
        S: Store + 'static,
    {
        CacheBuilder::new(Arc::new(store), namespace)
    }
}

impl<V, L> Cache<V, L>
where
    V: CacheValue,
    L: Stage<V>,
{
    /// Wraps a stage chain built by hand.
    #[must_use]
    pub fn new(stage: L) -> Self {
        Self {
            stage,
            _phantom: PhantomData,
        }
    }

    /// Returns the namespace of this cache.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.core().facade().namespace()
    }

    /// Returns a reference to the stage chain.
    #[must_use]
    pub fn inner(&self) -> &L {
        &self.stage
    }

    /// Returns the state shared by the chain.
    #[must_use]
    pub fn core(&self) -> &Arc<Core<V, L::Store>> {
        self.stage.core()
    }

    /// Subscribes to every event raised anywhere in the chain.
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.core().events().subscribe(listener);
    }

    /// Reads a value.
    ///
    /// Returns `Ok(None)` on a miss. With population stages configured, a miss is
    /// filled by the population function before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or population fails.
    pub async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        let core = self.core();
        let events = core.events();
        events.emit(CacheEvent::GetBefore { key: key.to_owned() });

        let timed = core.clock().timed_async(self.stage.get(key)).await;
        match timed.result {
            Ok(value) => {
                events.emit(CacheEvent::GetAfter {
                    key: key.to_owned(),
                    elapsed: timed.duration,
                });
                if value.is_some() {
                    events.emit(CacheEvent::GetHit { key: key.to_owned() });
                } else {
                    events.emit(CacheEvent::GetMiss { key: key.to_owned() });
                }
                Ok(value)
            }
            Err(error) => {
                events.emit(CacheEvent::GetError {
                    key: key.to_owned(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn set(&self, key: &str, value: V) -> Result<(), Error> {
        let core = self.core();
        let events = core.events();
        events.emit(CacheEvent::SetBefore {
            key: key.to_owned(),
            value: value.clone(),
        });

        let timed = core.clock().timed_async(self.stage.set(key, &value)).await;
        match timed.result {
            Ok(()) => {
                events.emit(CacheEvent::SetAfter {
                    key: key.to_owned(),
                    value,
                    elapsed: timed.duration,
                });
                Ok(())
            }
            Err(error) => {
                events.emit(CacheEvent::SetError {
                    key: key.to_owned(),
                    value,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Deletes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn del(&self, key: &str) -> Result<(), Error> {
        self.core().framed_del(key, self.stage.del(key)).await
    }
}
