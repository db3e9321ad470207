// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Background revalidation of stale entries.

use std::{collections::HashSet, fmt, sync::Arc};

use parking_lot::Mutex;

/// Tracks the keys this process is revalidating so each key has at most one task.
#[derive(Default)]
pub(crate) struct Revalidations {
    in_flight: Mutex<HashSet<String>>,
}

impl fmt::Debug for Revalidations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revalidations")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl Revalidations {
    /// Spawns `work` for `key` unless a revalidation of `key` is already running.
    ///
    /// Returns whether a task was spawned. The key is released when the task ends,
    /// even if it panics.
    pub(crate) fn spawn<F, Fut>(self: &Arc<Self>, key: &str, work: F) -> bool
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(slot) = self.try_start(key) else {
            return false;
        };
        let job = work(key.to_owned());
        drop(tokio::spawn(async move {
            job.await;
            drop(slot);
        }));
        true
    }

    fn try_start(self: &Arc<Self>, key: &str) -> Option<Slot> {
        self.in_flight.lock().insert(key.to_owned()).then(|| Slot {
            owner: Arc::clone(self),
            key: key.to_owned(),
        })
    }

    #[cfg(test)]
    fn is_running(&self, key: &str) -> bool {
        self.in_flight.lock().contains(key)
    }
}

struct Slot {
    owner: Arc<Revalidations>,
    key: String,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.owner.in_flight.lock().remove(&self.key);
    }
}
