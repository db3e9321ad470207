// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serde-backed cache configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::{
    Backoff, Error, ExpireOptions, PopulateInOptions,
    backoff::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX},
    interval,
    populate::DEFAULT_POPULATE_TIMEOUT,
    populate_in::{DEFAULT_LEASE_TIMEOUT, DEFAULT_MAX_ATTEMPTS},
};

/// Connection settings handed to a store factory.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct StoreOptions {
    /// Store host name.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Optional store password.
    pub password: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 6379,
            password: None,
        }
    }
}

/// Settings that decide which stages a cache is assembled from.
///
/// Every field is optional. Durations accept integer milliseconds or an interval
/// string such as `"1.5 seconds"`. Keys are accepted in camelCase.
///
/// - `expiresIn` or `staleIn` enables the expiry stage.
/// - A loader enables the populate stage.
/// - A loader plus `populateIn` enables distributed population.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stagecache::CacheConfig;
///
/// let config = CacheConfig::from_json(
///     r#"{ "namespace": "users", "port": 6380, "staleIn": "1 minute", "populateIn": 5000 }"#,
/// )?;
///
/// assert_eq!(config.store.port, 6380);
/// assert_eq!(config.stale_in, Some(Duration::from_secs(60)));
/// assert_eq!(config.populate_in, Some(Duration::from_secs(5)));
/// # Ok::<(), stagecache::Error>(())
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct CacheConfig {
    /// Connection settings for the store.
    #[serde(flatten)]
    pub store: StoreOptions,
    /// Namespace prefixed to every key.
    pub namespace: Option<String>,
    /// Hard TTL measured from `createdAt`.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub expires_in: Option<Duration>,
    /// Staleness threshold measured from `createdAt`.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub stale_in: Option<Duration>,
    /// Overall budget for distributed population.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub populate_in: Option<Duration>,
    /// Bound on a single population call.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub populate_timeout: Option<Duration>,
    /// Lease TTL for one distributed population attempt.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub lease_timeout: Option<Duration>,
    /// Consecutive failures that cut distributed population off.
    pub max_attempts: Option<u64>,
    /// First re-attempt delay.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub backoff_base: Option<Duration>,
    /// Largest re-attempt delay.
    #[serde(deserialize_with = "interval::deserialize_opt")]
    pub backoff_max: Option<Duration>,
    /// Whether writes of unchanged values are skipped.
    pub only_set_changed: Option<bool>,
    /// Whether cache events are logged.
    pub logs: Option<bool>,
}

impl CacheConfig {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`Config`](crate::ErrorKind::Config) error if the text is not valid
    /// configuration, including an interval string that cannot be parsed.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("invalid cache configuration: {e}")))
    }

    /// Returns the expiry thresholds.
    #[must_use]
    pub fn expire_options(&self) -> ExpireOptions {
        let mut options = ExpireOptions::new();
        if let Some(ttl) = self.expires_in {
            options = options.expires_in(ttl);
        }
        if let Some(threshold) = self.stale_in {
            options = options.stale_in(threshold);
        }
        options
    }

    /// Returns the distributed population settings, if `populate_in` is set.
    #[must_use]
    pub fn populate_in_options(&self) -> Option<PopulateInOptions> {
        self.populate_in.map(|budget| {
            PopulateInOptions::new(budget)
                .lease_timeout(self.lease_timeout.unwrap_or(DEFAULT_LEASE_TIMEOUT))
                .max_attempts(self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
                .backoff(Backoff::new(
                    self.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE),
                    self.backoff_max.unwrap_or(DEFAULT_BACKOFF_MAX),
                ))
        })
    }

    /// Returns the population timeout, falling back to the default.
    #[must_use]
    pub fn populate_timeout_or_default(&self) -> Duration {
        self.populate_timeout.unwrap_or(DEFAULT_POPULATE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn empty_object_uses_defaults() {
        let config = CacheConfig::from_json("{}").unwrap();

        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.store.host, "localhost");
        assert_eq!(config.store.port, 6379);
        assert!(!config.expire_options().is_enabled());
        assert_eq!(config.populate_in_options(), None);
        assert_eq!(config.populate_timeout_or_default(), Duration::from_secs(30));
    }

    #[test]
    fn accepts_millis_and_interval_strings() {
        let config = CacheConfig::from_json(
            r#"{
                "host": "cache.internal",
                "password": "hunter2",
                "namespace": "n",
                "expiresIn": "2 hours",
                "staleIn": 90000,
                "populateTimeout": "500ms"
            }"#,
        )
        .unwrap();

        assert_eq!(config.store.host, "cache.internal");
        assert_eq!(config.store.password.as_deref(), Some("hunter2"));
        assert_eq!(config.namespace.as_deref(), Some("n"));
        assert_eq!(config.expire_options().expires_in_ms(), Some(7_200_000));
        assert_eq!(config.expire_options().stale_in_ms(), Some(90_000));
        assert_eq!(config.populate_timeout_or_default(), Duration::from_millis(500));
    }

    #[test]
    fn populate_in_options_fill_defaults() {
        let config = CacheConfig::from_json(r#"{ "populateIn": "10s", "maxAttempts": 2, "backoffMax": 400 }"#).unwrap();

        let options = config.populate_in_options().unwrap();
        assert_eq!(options.populate_in(), Duration::from_secs(10));
        assert_eq!(options.lease_ttl(), Duration::from_secs(30));
        assert_eq!(options.attempts(), 2);
        assert_eq!(options.backoff_schedule(), Backoff::new(Duration::from_millis(50), Duration::from_millis(400)));
    }

    #[test]
    fn bad_interval_is_config_error() {
        let error = CacheConfig::from_json(r#"{ "expiresIn": "eventually" }"#).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Config);
        assert!(error.to_string().contains("eventually"));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let error = CacheConfig::from_json("{ not json").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Config);
    }
}
