// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Config-driven cache construction over one shared store.

use std::sync::Arc;

use stagecache_store::Store;

use crate::{BoxError, Cache, CacheConfig, CacheValue, Error, Populate, StoreOptions, builder::CacheBuilder, stage::DynamicStage};

/// Creates caches from [`CacheConfig`] values, all sharing one store connection.
///
/// # Examples
///
/// ```no_run
/// use stagecache::{BoxError, CacheConfig, Client};
/// use stagecache_store::testing::MemoryStore;
///
/// # async fn example() -> Result<(), stagecache::Error> {
/// let client = Client::new(MemoryStore::new());
/// let config = CacheConfig::from_json(r#"{ "namespace": "users", "expiresIn": "1 hour" }"#)?;
///
/// let users = client.create_with_loader(&config, |id: String| async move {
///     Ok::<_, BoxError>(format!("user {id}"))
/// })?;
/// assert_eq!(users.get("7").await?, Some("user 7".to_owned()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client<S> {
    store: Arc<S>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> Client<S>
where
    S: Store + 'static,
{
    /// Creates a client over an existing store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store: Arc::new(store) }
    }

    /// Opens a store with `factory` and creates a client over it.
    ///
    /// # Errors
    ///
    /// Returns a [`Store`](crate::ErrorKind::Store) error if the factory fails.
    pub async fn connect<F, Fut, E>(options: &StoreOptions, factory: F) -> Result<Self, Error>
    where
        F: FnOnce(StoreOptions) -> Fut,
        Fut: Future<Output = Result<S, E>>,
        E: Into<BoxError>,
    {
        let store = factory(options.clone()).await.map_err(Error::store)?;
        Ok(Self::new(store))
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates a cache without population.
    ///
    /// `expiresIn` or `staleIn` in `config` enables the expiry stage.
    ///
    /// # Errors
    ///
    /// Returns a [`Config`](crate::ErrorKind::Config) error if `config` has no namespace.
    pub fn create<V>(&self, config: &CacheConfig) -> Result<Cache<V, DynamicStage<V, S>>, Error>
    where
        V: CacheValue,
    {
        Ok(self.builder(config)?.from_config(config).build())
    }

    /// Creates a cache that computes misses with `loader`.
    ///
    /// `populateIn` in `config` additionally enables distributed population.
    ///
    /// # Errors
    ///
    /// Returns a [`Config`](crate::ErrorKind::Config) error if `config` has no namespace.
    pub fn create_with_loader<V, P>(&self, config: &CacheConfig, loader: P) -> Result<Cache<V, DynamicStage<V, S>>, Error>
    where
        V: CacheValue,
        P: Populate<V> + 'static,
    {
        Ok(self.builder(config)?.populate(loader).from_config(config).build())
    }

    fn builder<V>(&self, config: &CacheConfig) -> Result<CacheBuilder<V, S>, Error> {
        let namespace = config
            .namespace
            .as_deref()
            .ok_or_else(|| Error::config("cache configuration has no namespace"))?;
        Ok(CacheBuilder::new(Arc::clone(&self.store), namespace))
    }
}
