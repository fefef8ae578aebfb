//! Configuration module for pulsewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("invalid DNS resolver address: {0}")]
    Resolver(String),
}

/// Engine and server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP port for the ingest/query surface (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// Probe worker pool size (default: 64)
    pub max_concurrent_probes: usize,
    /// Sink delivery pool size (default: 32)
    pub max_concurrent_deliveries: usize,
    /// Planning pass period (default: 10s)
    pub planning_period: Duration,
    /// How long `stop` waits for in-flight work (default: 10s)
    pub shutdown_grace: Duration,
    pub default_failure_threshold: u32,
    pub default_recovery_threshold: u32,
    /// Resolver used by DNS targets that don't name one.
    pub dns_resolver: Option<String>,
    pub sink_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            max_concurrent_probes: 64,
            max_concurrent_deliveries: 32,
            planning_period: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            default_failure_threshold: 1,
            default_recovery_threshold: 1,
            dns_resolver: None,
            sink_cache_ttl: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PULSEWATCH_DB_PATH`: Database file path (default: "pulsewatch.db")
    /// - `PULSEWATCH_MAX_CONCURRENT_PROBES`: probe pool size (default: 64)
    /// - `PULSEWATCH_MAX_CONCURRENT_DELIVERIES`: delivery pool size (default: 32)
    /// - `PULSEWATCH_PLANNING_PERIOD_SECS`: planning period (default: 10)
    /// - `PULSEWATCH_SHUTDOWN_GRACE_SECS`: shutdown grace (default: 10)
    /// - `PULSEWATCH_FAILURE_THRESHOLD` / `PULSEWATCH_RECOVERY_THRESHOLD` (default: 1)
    /// - `PULSEWATCH_DNS_RESOLVER`: default resolver `ip[:port]`
    /// - `PULSEWATCH_SINK_CACHE_TTL_SECS`: sink list cache TTL (default: 30)
    ///
    /// Unparseable values keep their default.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        parse_into(&lookup, "PULSEWATCH_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("PULSEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        parse_into(&lookup, "PULSEWATCH_MAX_CONCURRENT_PROBES", &mut cfg.max_concurrent_probes);
        parse_into(
            &lookup,
            "PULSEWATCH_MAX_CONCURRENT_DELIVERIES",
            &mut cfg.max_concurrent_deliveries,
        );
        if let Some(secs) = parse_var::<u64, _>(&lookup, "PULSEWATCH_PLANNING_PERIOD_SECS") {
            cfg.planning_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "PULSEWATCH_SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = Duration::from_secs(secs);
        }
        parse_into(&lookup, "PULSEWATCH_FAILURE_THRESHOLD", &mut cfg.default_failure_threshold);
        parse_into(&lookup, "PULSEWATCH_RECOVERY_THRESHOLD", &mut cfg.default_recovery_threshold);
        if let Some(resolver) = lookup("PULSEWATCH_DNS_RESOLVER").filter(|s| !s.is_empty()) {
            cfg.dns_resolver = Some(resolver);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "PULSEWATCH_SINK_CACHE_TTL_SECS") {
            cfg.sink_cache_ttl = Duration::from_secs(secs);
        }

        cfg
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::Zero("max_concurrent_probes"));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(ConfigError::Zero("max_concurrent_deliveries"));
        }
        if self.planning_period.is_zero() {
            return Err(ConfigError::Zero("planning_period"));
        }
        if self.default_failure_threshold == 0 {
            return Err(ConfigError::Zero("default_failure_threshold"));
        }
        if self.default_recovery_threshold == 0 {
            return Err(ConfigError::Zero("default_recovery_threshold"));
        }
        if let Some(resolver) = &self.dns_resolver {
            if crate::probe::parse_resolver(resolver).is_none() {
                return Err(ConfigError::Resolver(resolver.clone()));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_into<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, slot: &mut T) {
    if let Some(value) = parse_var(lookup, key) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "pulsewatch.db");
        assert_eq!(cfg.max_concurrent_probes, 64);
        assert_eq!(cfg.max_concurrent_deliveries, 32);
        assert_eq!(cfg.planning_period, Duration::from_secs(10));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_and_bad_values() {
        let cfg = from_map(&[
            ("PULSEWATCH_MAX_CONCURRENT_PROBES", "8"),
            ("PULSEWATCH_PLANNING_PERIOD_SECS", "2"),
            ("PULSEWATCH_HTTP_PORT", "not-a-port"),
            ("PULSEWATCH_DNS_RESOLVER", "1.1.1.1"),
        ]);
        assert_eq!(cfg.max_concurrent_probes, 8);
        assert_eq!(cfg.planning_period, Duration::from_secs(2));
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.dns_resolver.as_deref(), Some("1.1.1.1"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pools() {
        let cfg = from_map(&[("PULSEWATCH_MAX_CONCURRENT_DELIVERIES", "0")]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero("max_concurrent_deliveries"))
        );

        let cfg = from_map(&[("PULSEWATCH_DNS_RESOLVER", "not an address")]);
        assert!(matches!(cfg.validate(), Err(ConfigError::Resolver(_))));
    }
}
