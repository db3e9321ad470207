// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[cfg(test)]
pub(crate) const CACHE_NAMESPACE: &str = "cache.namespace";

#[cfg(test)]
pub(crate) const CACHE_EVENT: &str = "cache.event";

#[cfg(test)]
pub(crate) const CACHE_KEY: &str = "cache.key";

#[cfg(test)]
pub(crate) const CACHE_ELAPSED_MS: &str = "cache.elapsed_ms";
