// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wall-clock timestamps and operation timing on tokio time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// The time source used by a cache.
///
/// Timestamps written to the store (`createdAt`, `accessedAt`) are Unix epoch
/// milliseconds. They are derived from a wall-clock anchor taken at construction
/// plus the elapsed tokio time since then, so a paused tokio clock freezes them
/// and `tokio::time::advance` moves them forward deterministically.
///
/// # Examples
///
/// ```
/// use stagecache::Clock;
///
/// let clock = Clock::starting_at(1_000);
/// assert!(clock.now_ms() >= 1_000);
/// ```
#[derive(Clone, Debug)]
pub struct Clock {
    anchor_ms: u64,
    anchor: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Creates a clock anchored at the current system time.
    #[must_use]
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::starting_at(saturating_millis(since_epoch))
    }

    /// Creates a clock whose current time is `epoch_ms`.
    #[must_use]
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            anchor_ms: epoch_ms,
            anchor: Instant::now(),
        }
    }

    /// Returns the current time as Unix epoch milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.anchor_ms.saturating_add(saturating_millis(self.anchor.elapsed()))
    }

    /// Returns the current monotonic instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        Instant::now()
    }

    /// Times an async operation and returns both the result and the elapsed duration.
    pub async fn timed_async<F, R>(&self, f: F) -> TimedResult<R>
    where
        F: Future<Output = R>,
    {
        let start = self.instant();
        let result = f.await;
        TimedResult {
            result,
            duration: self.instant().saturating_duration_since(start),
        }
    }
}

/// Result of a timed async operation.
#[derive(Debug, Clone, Copy)]
pub struct TimedResult<R> {
    /// The result of the operation.
    pub result: R,
    /// The duration of the operation.
    pub duration: Duration,
}

pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
