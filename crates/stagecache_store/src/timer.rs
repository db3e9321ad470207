// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{sync::Arc, time::Duration};

/// A namespace-scoped scheduling handle.
///
/// Timers are how cache stages back off between attempts without busy-waiting.
/// A timer is ephemeral and owned by the process that created it.
pub trait Timer: Send + Sync {
    /// Resolves once, no earlier than `delay` from now.
    ///
    /// The delay is a lower bound only; the store may fire later.
    fn schedule(&self, delay: Duration) -> impl Future<Output = ()> + Send;
}

/// A [`Timer`] driven by the tokio time driver.
///
/// Under a paused tokio clock (`start_paused = true`) schedules complete as soon as
/// the runtime has nothing else to do, which keeps tests deterministic.
#[derive(Clone, Debug)]
pub struct TokioTimer {
    namespace: Arc<str>,
}

impl TokioTimer {
    /// Creates a timer for the given namespace.
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: Arc::from(namespace),
        }
    }

    /// Returns the namespace this timer belongs to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Timer for TokioTimer {
    async fn schedule(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
