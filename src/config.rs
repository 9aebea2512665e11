//! Distributor configuration and per-tenant limits
//!
//! Both load from the environment or from JSON. Environment variables:
//! - RINGQUERY_SHARDING_STRATEGY: "default" or "shuffle-sharding"
//! - RINGQUERY_SHARD_BY_ALL_LABELS: bool (default: false)
//! - RINGQUERY_SHUFFLE_SHARDING_LOOKBACK: duration (default: 0s)
//! - RINGQUERY_EXTRA_QUERY_DELAY: duration (default: 0s)
//! - RINGQUERY_QUERY_TIMEOUT: duration, 0s for none (default: 2m)
//! - RINGQUERY_CLIENT_CONNECT_TIMEOUT / RINGQUERY_CLIENT_REQUEST_TIMEOUT: durations

use crate::client::GrpcClientConfig;
use crate::limiter::QueryLimits;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How a tenant's series are spread over the ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardingStrategy {
    /// Series spread over the whole ring
    #[default]
    Default,
    /// Each tenant confined to a stable subset of instances
    ShuffleSharding,
}

impl ShardingStrategy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(ShardingStrategy::Default),
            "shuffle-sharding" | "shuffle" => Ok(ShardingStrategy::ShuffleSharding),
            other => Err(Error::Config(format!(
                "sharding strategy must be one of [default, shuffle-sharding], got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub sharding_strategy: ShardingStrategy,
    /// Writes hash on every label rather than tenant + metric name
    pub shard_by_all_labels: bool,
    /// Instances that joined within this window are always queried
    #[serde(with = "humantime_serde")]
    pub shuffle_sharding_lookback: Duration,
    /// Delay before asking replicas beyond the quorum
    #[serde(with = "humantime_serde")]
    pub extra_query_delay: Duration,
    /// Upper bound on one query; zero disables it
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    pub client: GrpcClientConfig,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            sharding_strategy: ShardingStrategy::Default,
            shard_by_all_labels: false,
            shuffle_sharding_lookback: Duration::ZERO,
            extra_query_delay: Duration::ZERO,
            query_timeout: Duration::from_secs(120),
            client: GrpcClientConfig::default(),
        }
    }
}

impl DistributorConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var("RINGQUERY_SHARDING_STRATEGY") {
            cfg.sharding_strategy = ShardingStrategy::parse(&raw)?;
        }
        if let Some(v) = parse_optional_bool("RINGQUERY_SHARD_BY_ALL_LABELS")? {
            cfg.shard_by_all_labels = v;
        }
        if let Some(d) = parse_optional_duration("RINGQUERY_SHUFFLE_SHARDING_LOOKBACK")? {
            cfg.shuffle_sharding_lookback = d;
        }
        if let Some(d) = parse_optional_duration("RINGQUERY_EXTRA_QUERY_DELAY")? {
            cfg.extra_query_delay = d;
        }
        if let Some(d) = parse_optional_duration("RINGQUERY_QUERY_TIMEOUT")? {
            cfg.query_timeout = d;
        }
        if let Some(d) = parse_optional_duration("RINGQUERY_CLIENT_CONNECT_TIMEOUT")? {
            cfg.client.connect_timeout = d;
        }
        if let Some(d) = parse_optional_duration("RINGQUERY_CLIENT_REQUEST_TIMEOUT")? {
            cfg.client.request_timeout = d;
        }

        info!(
            sharding_strategy = ?cfg.sharding_strategy,
            shard_by_all_labels = cfg.shard_by_all_labels,
            lookback = ?cfg.shuffle_sharding_lookback,
            extra_query_delay = ?cfg.extra_query_delay,
            "Loaded distributor config"
        );
        Ok(cfg)
    }
}

/// Limits for one tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantLimitsConfig {
    /// Shuffle shard size; zero uses the whole ring
    pub ingestion_tenant_shard_size: usize,
    pub max_fetched_series_per_query: u64,
    pub max_fetched_chunk_bytes_per_query: u64,
    pub max_fetched_data_bytes_per_query: u64,
    pub max_chunks_per_query: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TenantLimitsFile {
    #[serde(default)]
    defaults: TenantLimitsConfig,
    #[serde(default)]
    overrides: HashMap<String, TenantLimitsConfig>,
}

/// Default limits plus per-tenant overrides
#[derive(Debug, Default)]
pub struct TenantLimits {
    defaults: TenantLimitsConfig,
    overrides: DashMap<String, TenantLimitsConfig>,
}

impl TenantLimits {
    pub fn new(defaults: TenantLimitsConfig) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
        }
    }

    /// Load `{"defaults": {...}, "overrides": {"tenant": {...}}}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| Error::Config(format!("invalid limits file {}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: TenantLimitsFile = serde_json::from_str(raw)?;
        let limits = Self::new(file.defaults);
        for (tenant, cfg) in file.overrides {
            limits.set_override(tenant, cfg);
        }
        Ok(limits)
    }

    pub fn set_override(&self, tenant: impl Into<String>, cfg: TenantLimitsConfig) {
        self.overrides.insert(tenant.into(), cfg);
    }

    pub fn remove_override(&self, tenant: &str) {
        self.overrides.remove(tenant);
    }

    pub fn for_tenant(&self, tenant: &str) -> TenantLimitsConfig {
        self.overrides
            .get(tenant)
            .map(|cfg| *cfg)
            .unwrap_or(self.defaults)
    }

    pub fn ingestion_tenant_shard_size(&self, tenant: &str) -> usize {
        self.for_tenant(tenant).ingestion_tenant_shard_size
    }

    pub fn query_limits(&self, tenant: &str) -> QueryLimits {
        let cfg = self.for_tenant(tenant);
        QueryLimits {
            max_series: cfg.max_fetched_series_per_query,
            max_chunk_bytes: cfg.max_fetched_chunk_bytes_per_query,
            max_data_bytes: cfg.max_fetched_data_bytes_per_query,
            max_chunks: cfg.max_chunks_per_query,
        }
    }
}

/// Parse durations like `250ms`, `30s`, `5m` or `1h 30m`. A bare number
/// is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|e| Error::Config(format!("invalid duration '{raw}': {e}")))
}

pub(crate) fn parse_optional_bool(name: &str) -> Result<Option<bool>> {
    let Some(raw) = std::env::var(name).ok() else {
        return Ok(None);
    };
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

fn parse_optional_duration(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => parse_duration(&raw)
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "s", "10x", "1.5h", "-1s", "1h30"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        assert!(matches!(
            parse_duration("99999999999999999h"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_durations_round_trip_through_json() {
        let cfg = DistributorConfig {
            extra_query_delay: Duration::from_micros(1_500),
            shuffle_sharding_lookback: Duration::from_secs(3600),
            ..Default::default()
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["shuffle_sharding_lookback"], "1h");

        let back: DistributorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.extra_query_delay, Duration::from_micros(1_500));
        assert_eq!(back.shuffle_sharding_lookback, Duration::from_secs(3600));
        assert_eq!(back.query_timeout, cfg.query_timeout);
    }

    #[test]
    fn test_sharding_strategy_parse() {
        assert_eq!(ShardingStrategy::parse("shuffle-sharding").unwrap(), ShardingStrategy::ShuffleSharding);
        assert_eq!(ShardingStrategy::parse(" Default ").unwrap(), ShardingStrategy::Default);
        assert!(ShardingStrategy::parse("random").is_err());
    }

    #[test]
    fn test_distributor_config_json() {
        let cfg: DistributorConfig = serde_json::from_str(
            r#"{"sharding_strategy": "shuffle-sharding", "shuffle_sharding_lookback": "12h", "extra_query_delay": "50ms"}"#,
        )
        .unwrap();
        assert_eq!(cfg.sharding_strategy, ShardingStrategy::ShuffleSharding);
        assert_eq!(cfg.shuffle_sharding_lookback, Duration::from_secs(12 * 3600));
        assert_eq!(cfg.extra_query_delay, Duration::from_millis(50));
        assert!(!cfg.shard_by_all_labels);
        assert_eq!(cfg.query_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_tenant_overrides() {
        let limits = TenantLimits::from_json(
            r#"{
                "defaults": {"max_fetched_series_per_query": 1000},
                "overrides": {"big": {"ingestion_tenant_shard_size": 6, "max_chunks_per_query": 50}}
            }"#,
        )
        .unwrap();

        assert_eq!(limits.query_limits("small").max_series, 1000);
        assert_eq!(limits.ingestion_tenant_shard_size("small"), 0);

        // overrides replace the defaults wholesale
        let big = limits.query_limits("big");
        assert_eq!(big.max_series, 0);
        assert_eq!(big.max_chunks, 50);
        assert_eq!(limits.ingestion_tenant_shard_size("big"), 6);

        limits.remove_override("big");
        assert_eq!(limits.ingestion_tenant_shard_size("big"), 0);
    }

    #[test]
    fn test_limits_file_errors_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(TenantLimits::from_json_file(&path), Err(Error::Config(_))));
    }
}
