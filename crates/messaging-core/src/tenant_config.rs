//! Tenant Config Cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;

/// Default tenant-config TTL.
pub const DEFAULT_TENANT_CONFIG_TTL: Duration = Duration::from_secs(3600);

const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 0..=10;
const RETRY_DELAY_MS_RANGE: std::ops::RangeInclusive<u64> = 100..=300_000;
const MIN_MESSAGE_SIZE: u64 = 1024; // 1 KiB
const MAX_MESSAGE_SIZE: u64 = 100 * 1024 * 1024; // 100 MiB

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Fixed delay between each retry.
    Fixed,
    /// Delay grows linearly with attempt number.
    Linear,
    /// Delay grows exponentially with attempt number.
    Exponential,
}

/// A single routing rule applied when resolving where a message lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Logical name pattern this rule matches (exact match or `*` suffix).
    pub pattern: String,
    /// Physical destination override.
    pub destination: String,
}

/// Per-tenant rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced for this tenant.
    pub enabled: bool,
    /// Sustained messages per second.
    pub max_per_sec: u32,
    /// Burst allowance above the sustained rate.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: false, max_per_sec: 100, burst: 20 }
    }
}

/// Per-tenant monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMonitoringConfig {
    /// Whether metrics are recorded for this tenant.
    pub metrics: bool,
    /// Whether tracing spans are emitted for this tenant.
    pub tracing: bool,
    /// Minimum log level recorded.
    pub log_level: String,
}

impl Default for TenantMonitoringConfig {
    fn default() -> Self {
        Self { metrics: true, tracing: true, log_level: "info".to_string() }
    }
}

/// Per-tenant messaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMessagingConfig {
    /// Owning tenant.
    pub tenant_id: String,
    /// Prefix applied to queue names for this tenant.
    pub queue_prefix: String,
    /// Prefix applied to exchange/topic names for this tenant.
    pub exchange_prefix: String,
    /// Maximum retry attempts, 0..=10.
    pub max_retries: u32,
    /// Delay between retries in milliseconds, 100..=300000.
    pub retry_delay_ms: u64,
    /// Backoff strategy.
    pub retry_backoff: RetryBackoff,
    /// Whether failed messages are dead-lettered.
    pub enable_dead_letter_queue: bool,
    /// Dead-letter retention, in seconds.
    pub dead_letter_ttl_s: u64,
    /// Maximum message size in bytes, [1KiB, 100MiB].
    pub max_message_size: u64,
    /// Whether payload compression is enabled.
    pub compression_enabled: bool,
    /// Compression algorithm name, if enabled.
    pub compression_algorithm: Option<String>,
    /// Whether payload encryption is enabled.
    pub encryption_enabled: bool,
    /// Encryption key id/alias, if enabled.
    pub encryption_key_id: Option<String>,
    /// Routing overrides applied ahead of tenant key resolution.
    pub routing_rules: Vec<RoutingRule>,
    /// Per-tenant rate limit.
    pub rate_limit: RateLimitConfig,
    /// Per-tenant monitoring toggles.
    pub monitoring: TenantMonitoringConfig,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl TenantMessagingConfig {
    /// Build the defaults for a freshly seen tenant.
    pub fn default_for(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        let tenant_id = tenant_id.into();
        Self {
            queue_prefix: format!("{tenant_id}."),
            exchange_prefix: format!("{tenant_id}."),
            tenant_id,
            max_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: RetryBackoff::Exponential,
            enable_dead_letter_queue: true,
            dead_letter_ttl_s: 86_400,
            max_message_size: 1024 * 1024,
            compression_enabled: false,
            compression_algorithm: None,
            encryption_enabled: false,
            encryption_key_id: None,
            routing_rules: Vec::new(),
            rate_limit: RateLimitConfig { enabled: false, ..RateLimitConfig::default() },
            monitoring: TenantMonitoringConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the range invariants. Returns every broken rule, not just
    /// the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            errors.push("max_retries must be in 0..10".to_string());
        }
        if !RETRY_DELAY_MS_RANGE.contains(&self.retry_delay_ms) {
            errors.push("retry_delay_ms must be in 100..300000".to_string());
        }
        if self.max_message_size < MIN_MESSAGE_SIZE || self.max_message_size > MAX_MESSAGE_SIZE {
            errors.push("max_message_size must be in [1KiB, 100MiB]".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Partial update applied to a `TenantMessagingConfig`; `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantConfigPatch {
    /// Override for `max_retries`.
    pub max_retries: Option<u32>,
    /// Override for `retry_delay_ms`.
    pub retry_delay_ms: Option<u64>,
    /// Override for `retry_backoff`.
    pub retry_backoff: Option<RetryBackoff>,
    /// Override for `enable_dead_letter_queue`.
    pub enable_dead_letter_queue: Option<bool>,
    /// Override for `dead_letter_ttl_s`.
    pub dead_letter_ttl_s: Option<u64>,
    /// Override for `max_message_size`.
    pub max_message_size: Option<u64>,
    /// Override for `rate_limit`.
    pub rate_limit: Option<RateLimitConfig>,
}

impl TenantConfigPatch {
    fn apply_to(&self, config: &mut TenantMessagingConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(v) = self.max_retries {
            if config.max_retries != v {
                config.max_retries = v;
                changed.push("max_retries");
            }
        }
        if let Some(v) = self.retry_delay_ms {
            if config.retry_delay_ms != v {
                config.retry_delay_ms = v;
                changed.push("retry_delay_ms");
            }
        }
        if let Some(v) = self.retry_backoff {
            if config.retry_backoff != v {
                config.retry_backoff = v;
                changed.push("retry_backoff");
            }
        }
        if let Some(v) = self.enable_dead_letter_queue {
            if config.enable_dead_letter_queue != v {
                config.enable_dead_letter_queue = v;
                changed.push("enable_dead_letter_queue");
            }
        }
        if let Some(v) = self.dead_letter_ttl_s {
            if config.dead_letter_ttl_s != v {
                config.dead_letter_ttl_s = v;
                changed.push("dead_letter_ttl_s");
            }
        }
        if let Some(v) = self.max_message_size {
            if config.max_message_size != v {
                config.max_message_size = v;
                changed.push("max_message_size");
            }
        }
        if let Some(v) = self.rate_limit.clone() {
            config.rate_limit = v;
            changed.push("rate_limit");
        }
        changed
    }
}

/// Result of a tenant config update attempt.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The update was valid, applied, and these fields changed.
    Applied {
        /// Field names that differed from the previous value.
        changed_fields: Vec<String>,
    },
    /// Validation failed; the cache was left untouched.
    Rejected {
        /// Every broken validation rule.
        errors: Vec<String>,
    },
}

/// Read-through / write-through cache of per-tenant messaging configuration.
pub struct TenantConfigCache<C: Cache> {
    cache: Arc<C>,
    key_prefix: String,
    ttl: Duration,
}

impl<C: Cache> TenantConfigCache<C> {
    /// Build a cache backed by `cache`.
    pub fn new(cache: Arc<C>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            ttl: DEFAULT_TENANT_CONFIG_TTL,
        }
    }

    /// Override the default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key_for(&self, tenant: &str) -> String {
        format!("{}cache:tenant-config:{}", self.key_prefix, tenant)
    }

    /// Load `tenant`'s config, bypassing the cache if `force_refresh`.
    /// On a cold cache (or a forced refresh with no persisted override) the
    /// defaults are returned and cached.
    pub async fn get(&self, tenant: &str, force_refresh: bool) -> TenantMessagingConfig {
        let key = self.key_for(tenant);
        if !force_refresh {
            if let Some(cfg) = self.cache.get::<TenantMessagingConfig>(&key).await {
                return cfg;
            }
        }
        let default_cfg = TenantMessagingConfig::default_for(tenant);
        self.cache.set(&key, &default_cfg, Some(self.ttl)).await;
        default_cfg
    }

    /// Apply `patch` to `tenant`'s current config. Validates before
    /// persisting; on failure the cache is left untouched.
    pub async fn update(
        &self,
        tenant: &str,
        patch: TenantConfigPatch,
        persist: bool,
    ) -> UpdateOutcome {
        let mut config = self.get(tenant, false).await;
        let changed = patch.apply_to(&mut config);
        if let Err(errors) = config.validate() {
            return UpdateOutcome::Rejected { errors };
        }
        config.updated_at = Utc::now();
        if persist {
            let key = self.key_for(tenant);
            self.cache.set(&key, &config, Some(self.ttl)).await;
        }
        UpdateOutcome::Applied {
            changed_fields: changed.into_iter().map(str::to_string).collect(),
        }
    }

    /// Apply the same patch across multiple tenants.
    pub async fn batch_update(
        &self,
        tenants: &[String],
        patch: TenantConfigPatch,
        persist: bool,
    ) -> Vec<(String, UpdateOutcome)> {
        let mut results = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let outcome = self.update(tenant, patch.clone(), persist).await;
            results.push((tenant.clone(), outcome));
        }
        results
    }

    /// Remove a tenant's cached config (the next `get` repopulates defaults).
    pub async fn delete(&self, tenant: &str) -> bool {
        let key = self.key_for(tenant);
        self.cache.delete(&key).await
    }

    /// Force-reload `tenant`'s config.
    pub async fn refresh(&self, tenant: &str) -> TenantMessagingConfig {
        self.get(tenant, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn defaults_match_expected_values() {
        let cache = TenantConfigCache::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let cfg = cache.get("acme", false).await;
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay_ms, 1000);
        assert_eq!(cfg.retry_backoff, RetryBackoff::Exponential);
        assert!(cfg.enable_dead_letter_queue);
        assert!(!cfg.compression_enabled);
        assert!(!cfg.encryption_enabled);
        assert!(!cfg.rate_limit.enabled);
    }

    #[tokio::test]
    async fn invalid_update_is_rejected_and_cache_untouched() {
        let cache = TenantConfigCache::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let before = cache.get("acme", false).await;
        let patch = TenantConfigPatch {
            max_retries: Some(99),
            ..Default::default()
        };
        let outcome = cache.update("acme", patch, true).await;
        match outcome {
            UpdateOutcome::Rejected { errors } => {
                assert!(errors.iter().any(|e| e.contains("max_retries")));
            }
            UpdateOutcome::Applied { .. } => panic!("expected rejection"),
        }
        let after = cache.get("acme", false).await;
        assert_eq!(before.max_retries, after.max_retries);
    }

    #[tokio::test]
    async fn valid_update_reports_changed_fields() {
        let cache = TenantConfigCache::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let patch = TenantConfigPatch {
            max_retries: Some(5),
            ..Default::default()
        };
        let outcome = cache.update("acme", patch, true).await;
        match outcome {
            UpdateOutcome::Applied { changed_fields } => {
                assert_eq!(changed_fields, vec!["max_retries".to_string()]);
            }
            UpdateOutcome::Rejected { errors } => panic!("unexpected rejection: {errors:?}"),
        }
        let after = cache.get("acme", false).await;
        assert_eq!(after.max_retries, 5);
    }

    #[test]
    fn config_validate_reports_all_broken_rules() {
        let mut cfg = TenantMessagingConfig::default_for("acme");
        cfg.max_retries = 99;
        cfg.retry_delay_ms = 1;
        cfg.max_message_size = 1;
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
