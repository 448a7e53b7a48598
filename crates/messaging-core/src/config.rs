//! Typed bootstrap configuration.
//!
//! Loaded from a YAML file and/or environment variables. Env vars use `__`
//! as the nesting separator under a caller-chosen prefix, e.g.
//! `TENANTFLOW_CACHE__CACHE_TTL__MESSAGE_DEDUP=120`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MessagingError;

fn default_adapter() -> AdapterKind {
    AdapterKind::Memory
}

fn default_key_prefix() -> String {
    "hl8:messaging:".to_string()
}

fn default_true() -> bool {
    true
}

/// Which broker backend the facade drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// A durable, exchange/routing-key broker (e.g. RabbitMQ).
    Rabbitmq,
    /// A key-value store with pub/sub and streams (e.g. Redis).
    Redis,
    /// A partitioned streaming log (e.g. Kafka).
    Kafka,
    /// An in-process, test-friendly broker.
    Memory,
}

/// TTL configuration for each cacheable subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    /// `cache.cache_ttl.message_dedup`, default 300s.
    #[serde(default = "default_dedup_ttl")]
    pub message_dedup: u64,
    /// `cache.cache_ttl.consumer_state`, default 3600s.
    #[serde(default = "default_consumer_state_ttl")]
    pub consumer_state: u64,
    /// `cache.cache_ttl.stats`, default 60s.
    #[serde(default = "default_stats_ttl")]
    pub stats: u64,
    /// `cache.cache_ttl.dead_letter`, default 86400s.
    #[serde(default = "default_dead_letter_ttl")]
    pub dead_letter: u64,
    /// `cache.cache_ttl.tenant_config`, default 3600s.
    #[serde(default = "default_tenant_config_ttl")]
    pub tenant_config: u64,
}

fn default_dedup_ttl() -> u64 {
    300
}
fn default_consumer_state_ttl() -> u64 {
    3600
}
fn default_stats_ttl() -> u64 {
    60
}
fn default_dead_letter_ttl() -> u64 {
    86_400
}
fn default_tenant_config_ttl() -> u64 {
    3600
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            message_dedup: default_dedup_ttl(),
            consumer_state: default_consumer_state_ttl(),
            stats: default_stats_ttl(),
            dead_letter: default_dead_letter_ttl(),
            tenant_config: default_tenant_config_ttl(),
        }
    }
}

impl CacheTtlConfig {
    /// `message_dedup` as a `Duration`.
    pub fn message_dedup_duration(&self) -> Duration {
        Duration::from_secs(self.message_dedup)
    }
    /// `consumer_state` as a `Duration`.
    pub fn consumer_state_duration(&self) -> Duration {
        Duration::from_secs(self.consumer_state)
    }
    /// `dead_letter` as a `Duration`.
    pub fn dead_letter_duration(&self) -> Duration {
        Duration::from_secs(self.dead_letter)
    }
    /// `tenant_config` as a `Duration`.
    pub fn tenant_config_duration(&self) -> Duration {
        Duration::from_secs(self.tenant_config)
    }
}

/// Which optional subsystems are enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheToggles {
    /// Toggles message deduplication.
    #[serde(default = "default_true")]
    pub enable_message_deduplication: bool,
    /// Toggles consumer state persistence.
    #[serde(default = "default_true")]
    pub enable_consumer_state_cache: bool,
    /// Toggles dead-letter persistence.
    #[serde(default = "default_true")]
    pub enable_dead_letter_cache: bool,
    /// Toggles tenant config caching.
    #[serde(default = "default_true")]
    pub enable_tenant_config_cache: bool,
    /// Toggles advanced monitoring bucket storage.
    #[serde(default = "default_true")]
    pub enable_advanced_monitoring_cache: bool,
    /// TTLs for each subsystem.
    #[serde(default)]
    pub cache_ttl: CacheTtlConfig,
}

impl Default for CacheToggles {
    fn default() -> Self {
        Self {
            enable_message_deduplication: true,
            enable_consumer_state_cache: true,
            enable_dead_letter_cache: true,
            enable_tenant_config_cache: true,
            enable_advanced_monitoring_cache: true,
            cache_ttl: CacheTtlConfig::default(),
        }
    }
}

/// Default retry policy applied when a tenant hasn't overridden it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    /// Default `max_retries`, 0..10.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default backoff strategy.
    #[serde(default = "default_backoff")]
    pub backoff: crate::tenant_config::RetryBackoff,
    /// Whether dead-lettering is enabled by default.
    #[serde(default = "default_true")]
    pub enable_dead_letter_queue: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff() -> crate::tenant_config::RetryBackoff {
    crate::tenant_config::RetryBackoff::Exponential
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: default_backoff(),
            enable_dead_letter_queue: true,
        }
    }
}

/// Monitoring bootstrap toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether to record metrics at all.
    #[serde(default = "default_true")]
    pub enable_stats: bool,
    /// Whether health checks are served.
    #[serde(default = "default_true")]
    pub enable_health_check: bool,
    /// Stats sampling interval, in milliseconds.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_stats_interval_ms() -> u64 {
    10_000
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_stats: true,
            enable_health_check: true,
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

/// Top-level facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Which broker backend to drive.
    #[serde(default = "default_adapter")]
    pub adapter: AdapterKind,
    /// Whether topic/queue names are namespaced per tenant.
    #[serde(default = "default_true")]
    pub enable_tenant_isolation: bool,
    /// Process-wide cache key prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Cache toggles and TTLs.
    #[serde(default)]
    pub cache: CacheToggles,
    /// Default retry policy.
    #[serde(default)]
    pub retry: RetryDefaults,
    /// Monitoring toggles.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            enable_tenant_isolation: true,
            key_prefix: default_key_prefix(),
            cache: CacheToggles::default(),
            retry: RetryDefaults::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl MessagingConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml(input: &str) -> Result<Self, MessagingError> {
        serde_yaml::from_str(input).map_err(|e| MessagingError::ConfigError(e.to_string()))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, MessagingError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Apply `PREFIX__section__field`-style environment overrides on top of
    /// `self`. Only scalar leaf overrides understood by this bootstrap config
    /// are applied; unrecognized keys are ignored.
    pub fn apply_env_overrides(&mut self, prefix: &str) {
        let dedup_key = format!("{prefix}__CACHE__CACHE_TTL__MESSAGE_DEDUP");
        if let Ok(val) = std::env::var(&dedup_key) {
            if let Ok(parsed) = val.parse() {
                self.cache.cache_ttl.message_dedup = parsed;
            }
        }
        let adapter_key = format!("{prefix}__ADAPTER");
        if let Ok(val) = std::env::var(&adapter_key) {
            match val.to_lowercase().as_str() {
                "rabbitmq" => self.adapter = AdapterKind::Rabbitmq,
                "redis" => self.adapter = AdapterKind::Redis,
                "kafka" => self.adapter = AdapterKind::Kafka,
                "memory" => self.adapter = AdapterKind::Memory,
                _ => {}
            }
        }
        let prefix_key = format!("{prefix}__KEY_PREFIX");
        if let Ok(val) = std::env::var(&prefix_key) {
            self.key_prefix = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let cfg = MessagingConfig::default();
        assert_eq!(cfg.key_prefix, "hl8:messaging:");
        assert_eq!(cfg.cache.cache_ttl.message_dedup, 300);
        assert_eq!(cfg.cache.cache_ttl.consumer_state, 3600);
        assert_eq!(cfg.cache.cache_ttl.dead_letter, 86_400);
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = "adapter: kafka\nkey_prefix: \"myapp:\"\n";
        let cfg = MessagingConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.adapter, AdapterKind::Kafka);
        assert_eq!(cfg.key_prefix, "myapp:");
        assert_eq!(cfg.cache.cache_ttl.stats, 60);
    }

    #[test]
    fn env_override_applies_on_top_of_yaml() {
        let mut cfg = MessagingConfig::default();
        std::env::set_var("TF_TEST__CACHE__CACHE_TTL__MESSAGE_DEDUP", "42");
        cfg.apply_env_overrides("TF_TEST");
        std::env::remove_var("TF_TEST__CACHE__CACHE_TTL__MESSAGE_DEDUP");
        assert_eq!(cfg.cache.cache_ttl.message_dedup, 42);
    }
}
