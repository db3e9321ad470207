// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for store operations.

/// An error from a store operation.
///
/// This is an opaque error type that wraps whatever went wrong talking to the store:
/// a dropped connection, a protocol violation, a timeout. Use
/// [`std::error::Error::source()`] to access the underlying cause if needed.
///
/// # Example
///
/// ```
/// use stagecache_store::Error;
///
/// let error = Error::from_message("connection reset");
/// assert!(error.to_string().contains("connection reset"));
/// ```
#[derive(Debug, thiserror::Error)]
#[error("store operation failed: {cause}")]
pub struct Error {
    #[source]
    cause: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Creates a new error wrapping the given cause.
    pub fn caused_by(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self { cause: cause.into() }
    }

    /// Creates a new error from a message or any type convertible to an error.
    ///
    /// This is the public API for creating store errors from external crates.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}

/// A specialized [`Result`] type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
