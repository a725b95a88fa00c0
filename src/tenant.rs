//! Tenant identity and host classification.
//!
//! Every inbound request is mapped from its `Host` header to one of a
//! closed set of tenant identifiers. The classifier only ever produces
//! tenants that were enabled in configuration at startup; any other
//! hostname, including spoofed or malformed ones, collapses to
//! [`Tenant::Unknown`]. No raw subdomain string from the wire is ever
//! carried past this boundary into a rewrite or redirect target.

use std::fmt;

use crate::{GatewayError, Result};

/// A logical application reachable under its own subdomain of the root
/// domain, plus the two sentinel values for the apex (`Root`) and for
/// hosts that match nothing (`Unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tenant {
    /// The apex domain itself (and its `www` alias).
    Root,
    /// Sign-in, sign-up, and password-reset pages.
    Auth,
    /// The JSON API surface. Routes enforce their own authorization.
    Api,
    /// The operations panel.
    Admin,
    /// The main learner-facing application.
    App,
    /// Account and profile management.
    Accounts,
    /// Credits and payments.
    Wallet,
    /// Host did not match the apex or any enabled tenant.
    Unknown,
}

impl Tenant {
    /// All tenants that can be enabled through configuration.
    ///
    /// `Root` and `Unknown` are classification results, not configurable
    /// entries, so they are not part of this set.
    pub const CONFIGURABLE: [Tenant; 6] = [
        Tenant::Auth,
        Tenant::Api,
        Tenant::Admin,
        Tenant::App,
        Tenant::Accounts,
        Tenant::Wallet,
    ];

    /// Resolves a subdomain label to its tenant, if the label is known.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "auth" => Some(Self::Auth),
            "api" => Some(Self::Api),
            "admin" => Some(Self::Admin),
            "app" => Some(Self::App),
            "accounts" => Some(Self::Accounts),
            "wallet" => Some(Self::Wallet),
            _ => None,
        }
    }

    /// The subdomain label (and log label) for this tenant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Auth => "auth",
            Self::Api => "api",
            Self::Admin => "admin",
            Self::App => "app",
            Self::Accounts => "accounts",
            Self::Wallet => "wallet",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps `Host` header values to [`Tenant`]s against a fixed root domain.
///
/// Built once at startup from the validated configuration and shared
/// read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct HostClassifier {
    /// Lowercased root domain with any `:port` removed.
    root: String,
    /// Tenants enabled in the route table. Labels resolving to a tenant
    /// outside this set still classify as `Unknown`.
    enabled: Vec<Tenant>,
}

impl HostClassifier {
    /// Creates a classifier for the given root domain and enabled tenant
    /// set. The root domain must be non-empty once its port is stripped.
    pub fn new(root_domain: &str, enabled: Vec<Tenant>) -> Result<Self> {
        let root = strip_port(root_domain).to_ascii_lowercase();
        if root.is_empty() {
            return Err(GatewayError::Config(
                "root_domain must not be empty".into(),
            ));
        }
        Ok(Self { root, enabled })
    }

    /// The normalized root domain this classifier was built with.
    pub fn root_domain(&self) -> &str {
        &self.root
    }

    /// Classifies a raw `Host` header value.
    ///
    /// Ports are ignored on both sides. The apex domain and its `www`
    /// alias classify as [`Tenant::Root`]. A single-label subdomain of
    /// the root classifies to its tenant when that tenant is enabled.
    /// Everything else, including an empty hostname, an empty subdomain
    /// label, multi-label subdomains, and hosts outside the root domain
    /// entirely, is [`Tenant::Unknown`]. Never fails: a hostile `Host`
    /// header is expected input, not an error.
    pub fn classify(&self, hostname: &str) -> Tenant {
        let host = strip_port(hostname).to_ascii_lowercase();
        if host.is_empty() {
            return Tenant::Unknown;
        }
        if host == self.root {
            return Tenant::Root;
        }

        let label = match host
            .strip_suffix(&self.root)
            .and_then(|prefix| prefix.strip_suffix('.'))
        {
            Some(label) => label,
            None => return Tenant::Unknown,
        };

        if label.is_empty() {
            return Tenant::Unknown;
        }
        if label == "www" {
            return Tenant::Root;
        }

        match Tenant::from_label(label) {
            Some(tenant) if self.enabled.contains(&tenant) => tenant,
            _ => Tenant::Unknown,
        }
    }
}

/// Removes a trailing `:port` from a host string, leaving IPv6 literals
/// without a port untouched.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> HostClassifier {
        HostClassifier::new(
            "example.com",
            vec![Tenant::Auth, Tenant::Api, Tenant::App, Tenant::Wallet],
        )
        .unwrap()
    }

    #[test]
    fn apex_classifies_as_root() {
        assert_eq!(classifier().classify("example.com"), Tenant::Root);
    }

    #[test]
    fn www_is_an_apex_alias() {
        assert_eq!(classifier().classify("www.example.com"), Tenant::Root);
    }

    #[test]
    fn enabled_tenants_classify_by_label() {
        let c = classifier();
        assert_eq!(c.classify("auth.example.com"), Tenant::Auth);
        assert_eq!(c.classify("api.example.com"), Tenant::Api);
        assert_eq!(c.classify("app.example.com"), Tenant::App);
        assert_eq!(c.classify("wallet.example.com"), Tenant::Wallet);
    }

    #[test]
    fn known_label_not_enabled_is_unknown() {
        // "admin" is a known tenant but absent from this classifier's
        // enabled set, so it must not classify.
        assert_eq!(classifier().classify("admin.example.com"), Tenant::Unknown);
    }

    #[test]
    fn arbitrary_label_is_unknown() {
        assert_eq!(classifier().classify("evil.example.com"), Tenant::Unknown);
    }

    #[test]
    fn foreign_domain_is_unknown() {
        let c = classifier();
        assert_eq!(c.classify("example.org"), Tenant::Unknown);
        assert_eq!(c.classify("auth.example.org"), Tenant::Unknown);
        assert_eq!(c.classify("attacker.com"), Tenant::Unknown);
    }

    #[test]
    fn suffix_without_dot_boundary_is_unknown() {
        assert_eq!(classifier().classify("badexample.com"), Tenant::Unknown);
    }

    #[test]
    fn empty_hostname_is_unknown() {
        assert_eq!(classifier().classify(""), Tenant::Unknown);
    }

    #[test]
    fn empty_subdomain_label_is_unknown() {
        assert_eq!(classifier().classify(".example.com"), Tenant::Unknown);
    }

    #[test]
    fn multi_label_subdomain_is_unknown() {
        assert_eq!(
            classifier().classify("app.staging.example.com"),
            Tenant::Unknown
        );
    }

    #[test]
    fn ports_are_ignored_on_input() {
        let c = classifier();
        assert_eq!(c.classify("example.com:8443"), Tenant::Root);
        assert_eq!(c.classify("app.example.com:8080"), Tenant::App);
    }

    #[test]
    fn port_is_ignored_on_configured_root() {
        let c = HostClassifier::new("example.com:8443", vec![Tenant::App]).unwrap();
        assert_eq!(c.classify("example.com"), Tenant::Root);
        assert_eq!(c.classify("app.example.com"), Tenant::App);
    }

    #[test]
    fn classification_is_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify("APP.Example.COM"), Tenant::App);
        assert_eq!(c.classify("Example.Com"), Tenant::Root);
    }

    #[test]
    fn empty_root_domain_is_rejected() {
        assert!(HostClassifier::new("", vec![]).is_err());
    }

    #[test]
    fn ipv6_literal_without_port_is_not_truncated() {
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn from_label_round_trips_configurable_tenants() {
        for tenant in Tenant::CONFIGURABLE {
            assert_eq!(Tenant::from_label(tenant.as_str()), Some(tenant));
        }
        assert_eq!(Tenant::from_label("root"), None);
        assert_eq!(Tenant::from_label("unknown"), None);
    }
}
