// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A store-level lifecycle notification.
///
/// Stores that can broadcast mutations expose them through
/// [`Store::notifications`](crate::Store::notifications). Cache stages use them as
/// wake signals, for example to stop waiting as soon as another process has written
/// a value.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreEvent {
    /// A property was written.
    PropSet {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
    },
    /// A property was removed.
    PropDeleted {
        /// The namespaced key.
        key: String,
        /// The property name.
        prop: String,
    },
    /// A key and all its properties were removed.
    Deleted {
        /// The namespaced key.
        key: String,
    },
    /// A key reached the end of its TTL and was removed.
    Expired {
        /// The namespaced key.
        key: String,
    },
    /// A lease was released before its TTL elapsed.
    LeaseReleased {
        /// The namespaced key.
        key: String,
    },
}

impl StoreEvent {
    /// Returns the namespaced key this notification is about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::PropSet { key, .. }
            | Self::PropDeleted { key, .. }
            | Self::Deleted { key }
            | Self::Expired { key }
            | Self::LeaseReleased { key } => key,
        }
    }
}
