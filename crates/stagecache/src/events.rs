// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache events and the listener hub shared by every stage of a chain.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;

use crate::{Error, telemetry::CacheTelemetry};

/// An event raised by a cache while serving an operation.
///
/// Frame events (`*:before`, `*:after`, `get:hit`, `get:miss`, `*:error`) are raised
/// by the outermost [`Cache`](crate::Cache); the remaining events are raised by the
/// stage that detects the condition and always land between the frame's `before`
/// and `after` events.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CacheEvent<V> {
    /// `get:before`
    GetBefore {
        /// The logical key.
        key: String,
    },
    /// `get:stale`
    GetStale {
        /// The logical key.
        key: String,
    },
    /// `get:expire`
    GetExpire {
        /// The logical key.
        key: String,
    },
    /// `get:hit`
    GetHit {
        /// The logical key.
        key: String,
    },
    /// `get:miss`
    GetMiss {
        /// The logical key.
        key: String,
    },
    /// `get:after`
    GetAfter {
        /// The logical key.
        key: String,
        /// Time spent serving the call.
        elapsed: Duration,
    },
    /// `get:error`
    GetError {
        /// The logical key.
        key: String,
        /// The error returned to the caller.
        error: Error,
    },
    /// `set:before`
    SetBefore {
        /// The logical key.
        key: String,
        /// The value being written.
        value: V,
    },
    /// `set:identical`
    SetIdentical {
        /// The logical key.
        key: String,
    },
    /// `set:after`
    SetAfter {
        /// The logical key.
        key: String,
        /// The value written.
        value: V,
        /// Time spent serving the call.
        elapsed: Duration,
    },
    /// `set:error`
    SetError {
        /// The logical key.
        key: String,
        /// The value that failed to be written.
        value: V,
        /// The error returned to the caller.
        error: Error,
    },
    /// `del:before`
    DelBefore {
        /// The logical key.
        key: String,
    },
    /// `del:after`
    DelAfter {
        /// The logical key.
        key: String,
        /// Time spent serving the call.
        elapsed: Duration,
    },
    /// `del:error`
    DelError {
        /// The logical key.
        key: String,
        /// The error returned to the caller.
        error: Error,
    },
    /// `populate:before`
    PopulateBefore {
        /// The logical key.
        key: String,
    },
    /// `populate:after`
    PopulateAfter {
        /// The logical key.
        key: String,
        /// The computed value.
        value: V,
    },
    /// `populate:error`
    PopulateError {
        /// The logical key.
        key: String,
        /// Why population failed.
        error: Error,
    },
    /// `populateIn:before`
    PopulateInBefore {
        /// The logical key.
        key: String,
    },
    /// `populateIn:pause`
    PopulateInPause {
        /// The logical key.
        key: String,
    },
    /// `populateIn:maxAttempts`
    PopulateInMaxAttempts {
        /// The logical key.
        key: String,
    },
    /// `populateIn:after`
    PopulateInAfter {
        /// The logical key.
        key: String,
        /// The value obtained.
        value: V,
    },
    /// `populateIn:error`
    PopulateInError {
        /// The logical key.
        key: String,
        /// Why distributed population failed.
        error: Error,
    },
    /// `error`: a best-effort secondary write failed without failing the call.
    Error {
        /// The logical key.
        key: String,
        /// The failure.
        error: Error,
    },
}

impl<V> CacheEvent<V> {
    /// Returns the event name, for example `get:before`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetBefore { .. } => "get:before",
            Self::GetStale { .. } => "get:stale",
            Self::GetExpire { .. } => "get:expire",
            Self::GetHit { .. } => "get:hit",
            Self::GetMiss { .. } => "get:miss",
            Self::GetAfter { .. } => "get:after",
            Self::GetError { .. } => "get:error",
            Self::SetBefore { .. } => "set:before",
            Self::SetIdentical { .. } => "set:identical",
            Self::SetAfter { .. } => "set:after",
            Self::SetError { .. } => "set:error",
            Self::DelBefore { .. } => "del:before",
            Self::DelAfter { .. } => "del:after",
            Self::DelError { .. } => "del:error",
            Self::PopulateBefore { .. } => "populate:before",
            Self::PopulateAfter { .. } => "populate:after",
            Self::PopulateError { .. } => "populate:error",
            Self::PopulateInBefore { .. } => "populateIn:before",
            Self::PopulateInPause { .. } => "populateIn:pause",
            Self::PopulateInMaxAttempts { .. } => "populateIn:maxAttempts",
            Self::PopulateInAfter { .. } => "populateIn:after",
            Self::PopulateInError { .. } => "populateIn:error",
            Self::Error { .. } => "error",
        }
    }

    /// Returns the logical key the event is about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::GetBefore { key }
            | Self::GetStale { key }
            | Self::GetExpire { key }
            | Self::GetHit { key }
            | Self::GetMiss { key }
            | Self::GetAfter { key, .. }
            | Self::GetError { key, .. }
            | Self::SetBefore { key, .. }
            | Self::SetIdentical { key }
            | Self::SetAfter { key, .. }
            | Self::SetError { key, .. }
            | Self::DelBefore { key }
            | Self::DelAfter { key, .. }
            | Self::DelError { key, .. }
            | Self::PopulateBefore { key }
            | Self::PopulateAfter { key, .. }
            | Self::PopulateError { key, .. }
            | Self::PopulateInBefore { key }
            | Self::PopulateInPause { key }
            | Self::PopulateInMaxAttempts { key }
            | Self::PopulateInAfter { key, .. }
            | Self::PopulateInError { key, .. }
            | Self::Error { key, .. } => key,
        }
    }

    /// Returns the time spent serving the call, for `*:after` events.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::GetAfter { elapsed, .. } | Self::SetAfter { elapsed, .. } | Self::DelAfter { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }

    /// Returns the error carried by the event, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::GetError { error, .. }
            | Self::SetError { error, .. }
            | Self::DelError { error, .. }
            | Self::PopulateError { error, .. }
            | Self::PopulateInError { error, .. }
            | Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

type Listener<V> = Arc<dyn Fn(&CacheEvent<V>) + Send + Sync>;

/// The listener hub shared by every stage of one chain.
///
/// Every stage raises events through the same hub, so a listener registered on
/// the outermost cache observes events raised at any depth.
pub struct Events<V> {
    listeners: RwLock<Vec<Listener<V>>>,
    telemetry: CacheTelemetry,
}

impl<V> fmt::Debug for Events<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("listeners", &self.listeners.read().len())
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl<V> Events<V> {
    pub(crate) fn new(telemetry: CacheTelemetry) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            telemetry,
        }
    }

    /// Registers a listener for every event raised by the chain.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub(crate) fn telemetry(&self) -> &CacheTelemetry {
        &self.telemetry
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Raises an event to every listener.
    ///
    /// Listeners run synchronously on the caller's task, outside the registry lock.
    pub fn emit(&self, event: CacheEvent<V>) {
        let listeners = self.listeners.read().clone();

        self.telemetry.record(&event);

        if let CacheEvent::Error { key, error } = &event
            && listeners.is_empty()
        {
            self.telemetry.unhandled(key, error);
        }

        for listener in &listeners {
            listener(&event);
        }
    }

    /// Reports a best-effort failure that must not fail the current call.
    pub(crate) fn report(&self, key: &str, error: Error) {
        self.emit(CacheEvent::Error {
            key: key.to_owned(),
            error,
        });
    }
}
