// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging of cache events through `tracing`.
//!
//! When logs are enabled on a cache, every event raised anywhere in its chain is
//! emitted as a `cache.event` record. Best-effort failures that nobody listens for
//! are always logged at `error` level, whether or not logs are enabled.

use std::{sync::Arc, time::Duration};

use crate::{CacheEvent, Error};

pub(crate) mod attributes;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Error,
}

pub(crate) fn severity<V>(event: &CacheEvent<V>) -> Severity {
    match event {
        CacheEvent::GetError { .. }
        | CacheEvent::SetError { .. }
        | CacheEvent::DelError { .. }
        | CacheEvent::PopulateError { .. }
        | CacheEvent::PopulateInError { .. }
        | CacheEvent::Error { .. } => Severity::Error,
        CacheEvent::GetExpire { .. }
        | CacheEvent::GetStale { .. }
        | CacheEvent::PopulateBefore { .. }
        | CacheEvent::PopulateAfter { .. }
        | CacheEvent::PopulateInBefore { .. }
        | CacheEvent::PopulateInPause { .. }
        | CacheEvent::PopulateInMaxAttempts { .. }
        | CacheEvent::PopulateInAfter { .. } => Severity::Info,
        _ => Severity::Debug,
    }
}

/// Log emitter for one cache namespace.
#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetry {
    namespace: Arc<str>,
    logging_enabled: bool,
}

impl CacheTelemetry {
    pub(crate) fn new(namespace: &str, logging_enabled: bool) -> Self {
        Self {
            namespace: Arc::from(namespace),
            logging_enabled,
        }
    }

    /// Records an event if logging is enabled.
    #[inline]
    pub(crate) fn record<V>(&self, event: &CacheEvent<V>) {
        if self.logging_enabled {
            Self::emit(&self.namespace, event.name(), event.key(), event.elapsed(), severity(event));
        }
    }

    /// Logs the outcome of a lease acquisition if logging is enabled.
    pub(crate) fn lease(&self, key: &str, acquired: bool) {
        if self.logging_enabled {
            tracing::debug!(
                cache.namespace = &*self.namespace,
                cache.key = key,
                cache.lease_acquired = acquired,
                "cache.lease"
            );
        }
    }

    /// Logs a best-effort failure that no listener observed.
    pub(crate) fn unhandled(&self, key: &str, error: &Error) {
        tracing::error!(
            cache.namespace = &*self.namespace,
            cache.key = key,
            cache.error = %error,
            "cache.unhandled_error"
        );
    }

    fn emit(namespace: &str, event: &str, key: &str, elapsed: Option<Duration>, severity: Severity) {
        let elapsed_ms = elapsed.map(|d| d.as_millis());

        // Tracing level must be constant, so we use a macro to select the appropriate level.
        // Field names must match constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.namespace = namespace,
                    cache.event = event,
                    cache.key = key,
                    cache.elapsed_ms = ?elapsed_ms,
                    "cache.event"
                )
            };
        }

        match severity {
            Severity::Error => emit_event!(error),
            Severity::Info => emit_event!(info),
            Severity::Debug => emit_event!(debug),
        }
    }
}
