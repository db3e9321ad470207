// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

/// Default delay before the first re-attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Default upper bound on a single re-attempt delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(2);

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// Exponential backoff schedule for distributed population re-attempts.
///
/// Delays double from `base` and are clamped to `max`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stagecache::Backoff;
///
/// let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
/// let delays: Vec<_> = backoff.delays().take(4).collect();
/// assert_eq!(
///     delays,
///     [100, 200, 350, 350].map(Duration::from_millis)
/// );
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

impl Backoff {
    /// Creates a schedule starting at `base` and never exceeding `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the first delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Returns the largest delay.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the infinite sequence of delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        DelaysIter {
            base: self.base,
            max: self.max,
            attempt: 0,
        }
    }
}

#[derive(Debug)]
struct DelaysIter {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Iterator for DelaysIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        // zero base delay => always zero
        if self.base.is_zero() {
            return Some(Duration::ZERO);
        }

        let delay = duration_mul_pow2(self.base, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(min(delay, self.max))
    }
}

fn duration_mul_pow2(base: Duration, attempt: u32) -> Duration {
    let factor = EXPONENTIAL_FACTOR.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    secs_to_duration_saturating(base.as_secs_f64() * factor)
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
