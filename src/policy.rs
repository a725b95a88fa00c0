//! Per-tenant routing policy and path classification.
//!
//! The route table is built once from configuration at startup and is
//! read-only afterwards. It answers the three questions the dispatcher
//! and auth gate need on every request: does this tenant require a
//! session, is this path public for this tenant, and what internal
//! prefix does the tenant rewrite to. Static-asset detection lives here
//! too since it is the same kind of startup-frozen path table.

use crate::tenant::Tenant;
use crate::{GatewayError, Result};

/// Default static-asset prefixes. Requests under these bypass the whole
/// pipeline and are forwarded unmodified.
pub const DEFAULT_STATIC_PREFIXES: [&str; 5] = [
    "/static/",
    "/assets/",
    "/images/",
    "/favicon.ico",
    "/robots.txt",
];

/// Routing policy for a single enabled tenant.
#[derive(Debug, Clone)]
pub struct TenantPolicy {
    /// The tenant this policy applies to.
    pub tenant: Tenant,
    /// Whether paths outside `public_paths` require an authenticated
    /// session. Ignored for `Auth` (never gated as a namespace) and
    /// `Api` (the gate is bypassed entirely).
    pub requires_auth: bool,
    /// Paths reachable without a session, matched exactly or as a `/`
    /// separated prefix.
    pub public_paths: Vec<String>,
    /// Internal path prefix prepended on rewrite, e.g. `/app`.
    pub rewrite_prefix: String,
}

/// The startup-frozen policy table for all enabled tenants, plus the
/// static-asset prefix list.
#[derive(Debug, Clone)]
pub struct RouteTable {
    policies: Vec<TenantPolicy>,
    static_prefixes: Vec<String>,
}

impl RouteTable {
    /// Builds the table from validated per-tenant policies and asset
    /// prefixes. Rejects duplicate tenants and rewrite prefixes that do
    /// not start with `/`.
    pub fn new(policies: Vec<TenantPolicy>, static_prefixes: Vec<String>) -> Result<Self> {
        for (i, policy) in policies.iter().enumerate() {
            if !policy.rewrite_prefix.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "rewrite prefix for tenant \"{}\" must start with '/': {}",
                    policy.tenant, policy.rewrite_prefix
                )));
            }
            if policies[..i].iter().any(|p| p.tenant == policy.tenant) {
                return Err(GatewayError::Config(format!(
                    "tenant \"{}\" is configured more than once",
                    policy.tenant
                )));
            }
        }
        Ok(Self {
            policies,
            static_prefixes,
        })
    }

    /// The tenants enabled in this table, in configuration order.
    pub fn enabled_tenants(&self) -> Vec<Tenant> {
        self.policies.iter().map(|p| p.tenant).collect()
    }

    /// Looks up the policy for a tenant. `None` for tenants that were
    /// not enabled, and always for `Root` and `Unknown`.
    pub fn policy(&self, tenant: Tenant) -> Option<&TenantPolicy> {
        self.policies.iter().find(|p| p.tenant == tenant)
    }

    /// Whether paths on this tenant outside its public set need a
    /// session. Tenants without a policy entry never require one.
    pub fn requires_auth(&self, tenant: Tenant) -> bool {
        self.policy(tenant).is_some_and(|p| p.requires_auth)
    }

    /// Prefix match against the configured static-asset list.
    pub fn is_static_asset(&self, path: &str) -> bool {
        self.static_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether `path` is public for `tenant`: an exact match against a
    /// configured entry, or a prefix match on a `/` boundary so that
    /// `/login` covers `/login/sso` but not `/login-bypass`.
    pub fn is_public_path(&self, tenant: Tenant, path: &str) -> bool {
        let Some(policy) = self.policy(tenant) else {
            return false;
        };
        policy.public_paths.iter().any(|public| {
            path == public
                || (path.len() > public.len()
                    && path.starts_with(public.as_str())
                    && path.as_bytes()[public.len()] == b'/')
        })
    }
}
