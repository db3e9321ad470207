// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The innermost stage: plain reads and writes through the key facade.

use std::sync::Arc;

use stagecache_store::Store;

use crate::{
    CacheValue, Error,
    stage::{Core, Stage},
};

/// The innermost stage of every chain.
///
/// Reads decode the stored value; a hit stamps `accessedAt` on a best-effort basis.
/// Writes stamp `createdAt` before writing the value so age-based stages always see
/// a creation time at least as new as the value. Deletes remove the whole entry.
#[derive(Debug)]
pub struct BaseStage<V, S> {
    core: Arc<Core<V, S>>,
}

impl<V, S> BaseStage<V, S> {
    /// Creates the innermost stage around the shared chain state.
    #[must_use]
    pub fn new(core: Arc<Core<V, S>>) -> Self {
        Self { core }
    }
}

impl<V, S> Stage<V> for BaseStage<V, S>
where
    V: CacheValue,
    S: Store + 'static,
{
    type Store = S;

    fn core(&self) -> &Arc<Core<V, S>> {
        &self.core
    }

    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        let facade = self.core.facade();
        let value = facade.get_value(key).await?;
        if value.is_some()
            && let Err(error) = facade.set_accessed_at(key, self.core.clock().now_ms()).await
        {
            self.core.events().report(key, error);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), Error> {
        let facade = self.core.facade();
        facade.set_created_at(key, self.core.clock().now_ms()).await?;
        facade.set_value(key, value).await
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.core.facade().del(key).await
    }
}
