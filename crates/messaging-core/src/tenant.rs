//! Tenant Key Resolver.
//!
//! Maps a logical topic/queue name plus an optional tenant id to the
//! physical name a broker adapter should use.

use tracing::warn;

/// A pluggable tenant isolation strategy.
///
/// Applications that already have a tenant-context propagation mechanism
/// implement this trait to plug it in; the resolver falls back to a
/// deterministic format if the call fails.
pub trait TenantIsolation: Send + Sync {
    /// Compute the isolated key for `logical` under `tenant`.
    fn key(&self, logical: &str, tenant: &str) -> Result<String, String>;
}

/// Default isolation strategy: `"<prefix><tenant>:<logical>"`.
pub struct PrefixIsolation {
    prefix: String,
}

impl PrefixIsolation {
    /// Build a prefix isolation strategy. `prefix` is typically empty or a
    /// short namespace like `"tenant:"`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for PrefixIsolation {
    fn default() -> Self {
        Self::new("")
    }
}

impl TenantIsolation for PrefixIsolation {
    fn key(&self, logical: &str, tenant: &str) -> Result<String, String> {
        Ok(format!("{}{}:{}", self.prefix, tenant, logical))
    }
}

/// Resolves logical names into tenant-isolated physical names.
pub struct TenantKeyResolver {
    enable_tenant_isolation: bool,
    isolation: Box<dyn TenantIsolation>,
    fallback_prefix: String,
}

impl TenantKeyResolver {
    /// Build a resolver. `enable_tenant_isolation` mirrors the
    /// `enable_tenant_isolation` configuration key.
    pub fn new(enable_tenant_isolation: bool, isolation: Box<dyn TenantIsolation>) -> Self {
        Self {
            enable_tenant_isolation,
            isolation,
            fallback_prefix: String::new(),
        }
    }

    /// Override the fallback format's prefix (default: empty).
    pub fn fallback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fallback_prefix = prefix.into();
        self
    }

    /// Resolve `logical` into a physical name, scoped to `tenant_id` if
    /// tenant isolation is enabled and a tenant id is present.
    pub fn resolve(&self, logical: &str, tenant_id: Option<&str>) -> String {
        let Some(tenant) = tenant_id else {
            return logical.to_string();
        };
        if !self.enable_tenant_isolation {
            return logical.to_string();
        }
        match self.isolation.key(logical, tenant) {
            Ok(physical) => physical,
            Err(err) => {
                warn!(
                    tenant = %tenant,
                    logical = %logical,
                    error = %err,
                    "tenant isolation collaborator failed, falling back to deterministic key"
                );
                format!("{}{}:{}", self.fallback_prefix, tenant, logical)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingIsolation;
    impl TenantIsolation for FailingIsolation {
        fn key(&self, _logical: &str, _tenant: &str) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn no_tenant_returns_logical_name() {
        let resolver = TenantKeyResolver::new(true, Box::new(PrefixIsolation::default()));
        assert_eq!(resolver.resolve("orders", None), "orders");
    }

    #[test]
    fn isolation_disabled_returns_logical_name() {
        let resolver = TenantKeyResolver::new(false, Box::new(PrefixIsolation::default()));
        assert_eq!(resolver.resolve("orders", Some("acme")), "orders");
    }

    #[test]
    fn isolation_enabled_namespaces_by_tenant() {
        let resolver = TenantKeyResolver::new(true, Box::new(PrefixIsolation::default()));
        assert_eq!(resolver.resolve("orders", Some("acme")), "acme:orders");
    }

    #[test]
    fn distinct_tenants_never_collide() {
        let resolver = TenantKeyResolver::new(true, Box::new(PrefixIsolation::default()));
        let a = resolver.resolve("orders", Some("acme"));
        let b = resolver.resolve("orders", Some("globex"));
        assert_ne!(a, b);
    }

    #[test]
    fn falls_back_on_isolation_failure() {
        let resolver = TenantKeyResolver::new(true, Box::new(FailingIsolation));
        assert_eq!(resolver.resolve("orders", Some("acme")), "acme:orders");
    }
}
