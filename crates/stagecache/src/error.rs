// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::{fmt, sync::Arc};

/// A boxed error as returned by user-supplied population functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The category of a cache [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The underlying store call failed.
    Store,
    /// A bounded operation exceeded its allotted time.
    Timeout,
    /// The user-supplied population function failed.
    Populate,
    /// Distributed population exhausted its attempt budget.
    MaxAttempts,
    /// A value could not be encoded for, or decoded from, the store.
    Codec,
    /// The cache configuration is invalid.
    Config,
}

impl ErrorKind {
    /// Returns a short, stable name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Timeout => "timeout",
            Self::Populate => "populate",
            Self::MaxAttempts => "max attempts",
            Self::Codec => "codec",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache operation.
///
/// This is an opaque error type. Use [`kind()`](Self::kind) to branch on the
/// category and [`std::error::Error::source()`] to reach the underlying cause.
/// Errors are cheap to clone so the same error can be reported through an event
/// and returned to the caller.
///
/// # Example
///
/// ```
/// use stagecache::{Error, ErrorKind};
///
/// let error = Error::populate("upstream unavailable");
/// assert_eq!(error.kind(), ErrorKind::Populate);
/// assert!(error.to_string().contains("upstream unavailable"));
/// ```
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Arc<str>,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    fn new(kind: ErrorKind, message: impl Into<Arc<str>>, cause: Option<BoxError>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: cause.map(Arc::from),
        }
    }

    /// Creates a store error wrapping the given cause.
    pub fn store(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::new(ErrorKind::Store, cause.to_string(), Some(cause))
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<Arc<str>>) -> Self {
        Self::new(ErrorKind::Timeout, message, None)
    }

    /// Creates a population error wrapping the given cause.
    pub fn populate(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::new(ErrorKind::Populate, cause.to_string(), Some(cause))
    }

    /// Creates a max-attempts error for `key`, optionally keeping the last failure as the cause.
    #[must_use]
    pub fn max_attempts(key: &str, last_failure: Option<Self>) -> Self {
        Self::new(
            ErrorKind::MaxAttempts,
            format!("population of '{key}' exhausted its attempts"),
            last_failure.map(|e| Box::new(e) as BoxError),
        )
    }

    /// Creates a codec error wrapping the given cause.
    pub fn codec(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::new(ErrorKind::Codec, cause.to_string(), Some(cause))
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<Arc<str>>) -> Self {
        Self::new(ErrorKind::Config, message, None)
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if the distributed populate stage may retry after this error.
    #[must_use]
    pub(crate) fn is_retryable_population_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::Populate | ErrorKind::Timeout)
    }
}

impl From<stagecache_store::Error> for Error {
    fn from(error: stagecache_store::Error) -> Self {
        Self::store(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::codec(error)
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
