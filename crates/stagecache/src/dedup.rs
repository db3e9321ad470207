// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Write deduplication by content hash.

use std::sync::Arc;

use crate::{
    CacheEvent, CacheValue, Error,
    codec::{content_hash, encode},
    stage::{Core, Stage},
};

/// Skips writes whose content hash matches the stored hash.
///
/// An identical write raises `set:identical` and completes successfully without
/// touching the stored value. Only `createdAt` is refreshed, so the entry's age
/// reflects the write the caller asked for. A changed write goes through the inner
/// stage and then persists the new hash; a failure to persist the hash is reported
/// as an `error` event and does not fail the call.
#[derive(Debug)]
pub struct DedupStage<I> {
    inner: I,
}

impl<I> DedupStage<I> {
    /// Wraps `inner` with write deduplication.
    #[must_use]
    pub fn new(inner: I) -> Self {
        Self { inner }
    }

    /// Returns the wrapped stage.
    #[must_use]
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<V, I> Stage<V> for DedupStage<I>
where
    V: CacheValue,
    I: Stage<V>,
{
    type Store = I::Store;

    fn core(&self) -> &Arc<Core<V, I::Store>> {
        self.inner.core()
    }

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send {
        self.inner.get(key)
    }

    fn lookup(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send {
        self.inner.lookup(key)
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), Error> {
        let core = self.inner.core();
        let facade = core.facade();

        let existing = facade.get_hash(key).await?;
        let hash = content_hash(&encode(value)?);

        if existing.as_deref() == Some(hash.as_str()) {
            core.events().emit(CacheEvent::SetIdentical { key: key.to_owned() });
            if let Err(error) = facade.set_created_at(key, core.clock().now_ms()).await {
                core.events().report(key, error);
            }
            return Ok(());
        }

        self.inner.set(key, value).await?;

        if let Err(error) = facade.set_hash(key, &hash).await {
            core.events().report(key, error);
        }
        Ok(())
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send {
        self.inner.del(key)
    }
}
