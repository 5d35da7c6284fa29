//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cel::engine::DEFAULT_CACHE_CAPACITY;

/// Authorizer configuration
///
/// Environment variables read by [`EngineConfig::from_env`]:
/// - `STATEGATE_AUDIT` - emit audit records (default: true)
/// - `STATEGATE_METRICS` - collect metrics (default: true)
/// - `STATEGATE_SCOPE_CACHE_SIZE` - compiled scope expression cache capacity (default: 10000)
/// - `STATEGATE_SNAPSHOT_REFRESH_SECS` - background snapshot reload interval, 0 disables (default: 0)
/// - `STATEGATE_REVOCATION_REAP_SECS` - expired revocation purge interval, 0 disables (default: 300)
/// - `STATEGATE_MAX_TOKEN_LIFETIME_SECS` - longest lifetime of an issued token; subject-wide
///   revocations older than this are purged, 0 keeps them forever (default: 86400)
/// - `STATEGATE_DATABASE_URL` - PostgreSQL connection string (default: unset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enable_audit: bool,

    pub enable_metrics: bool,

    pub scope_cache_capacity: usize,

    pub snapshot_refresh_secs: u64,

    pub revocation_reap_secs: u64,

    pub max_token_lifetime_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_audit: true,
            enable_metrics: true,
            scope_cache_capacity: DEFAULT_CACHE_CAPACITY,
            snapshot_refresh_secs: 0,
            revocation_reap_secs: 300,
            max_token_lifetime_secs: 86_400,
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STATEGATE_*` environment variables.
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let parse_bool = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(default)
        };

        Self {
            enable_audit: parse_bool("STATEGATE_AUDIT", defaults.enable_audit),
            enable_metrics: parse_bool("STATEGATE_METRICS", defaults.enable_metrics),
            scope_cache_capacity: lookup("STATEGATE_SCOPE_CACHE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.scope_cache_capacity),
            snapshot_refresh_secs: lookup("STATEGATE_SNAPSHOT_REFRESH_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.snapshot_refresh_secs),
            revocation_reap_secs: lookup("STATEGATE_REVOCATION_REAP_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.revocation_reap_secs),
            max_token_lifetime_secs: lookup("STATEGATE_MAX_TOKEN_LIFETIME_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_token_lifetime_secs),
            database_url: lookup("STATEGATE_DATABASE_URL").filter(|s| !s.is_empty()),
        }
    }

    pub fn snapshot_refresh_interval(&self) -> Option<Duration> {
        (self.snapshot_refresh_secs > 0).then(|| Duration::from_secs(self.snapshot_refresh_secs))
    }

    pub fn revocation_reap_interval(&self) -> Option<Duration> {
        (self.revocation_reap_secs > 0).then(|| Duration::from_secs(self.revocation_reap_secs))
    }

    pub fn max_token_lifetime(&self) -> Option<Duration> {
        (self.max_token_lifetime_secs > 0).then(|| Duration::from_secs(self.max_token_lifetime_secs))
    }
}
