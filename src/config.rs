//! Configuration loading, validation, and pre-compiled runtime state.
//!
//! The gateway reads its YAML configuration exactly once at startup.
//! Everything request handling needs is validated and pre-compiled
//! here: the host classifier, the per-tenant route table, the filter
//! signatures, and the security header set. A bad configuration is
//! rejected before the listener binds; the hot path never sees a raw
//! config value.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::headers::SecurityHeaderSet;
use crate::policy::{RouteTable, TenantPolicy, DEFAULT_STATIC_PREFIXES};
use crate::tenant::{HostClassifier, Tenant};
use crate::waf::UrlFilter;
use crate::{GatewayError, Result};

/// Default socket address the gateway binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8100";

/// Default scheme used when rebuilding client-facing URLs. The gateway
/// itself speaks plain HTTP behind the TLS terminator.
pub const DEFAULT_EXTERNAL_SCHEME: &str = "https";

/// Default tenant an authenticated user is forwarded to when no valid
/// `redirect` parameter accompanies the request.
pub const DEFAULT_LANDING_TENANT: Tenant = Tenant::App;

/// Default path of the login page on the auth tenant.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Default session cookie name.
pub const DEFAULT_SESSION_COOKIE: &str = "session";

/// Default per-call timeout for session verification lookups.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default per-client request budget per rate-limit window.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Default rate-limit window length.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Default total request timeout covering the entire origin round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout for pooled origin connections before they are
/// closed.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum number of idle connections kept for the origin.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 32;

/// Default maximum number of concurrent in-flight requests the gateway
/// will handle before returning 503 Service Unavailable.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 1000;

/// Raw configuration as deserialized from the YAML file.
///
/// This struct maps directly to the on-disk schema. After loading, it
/// is transformed into a [`RuntimeConfig`] that holds the compiled
/// classifier, route table, filter, and header set.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Socket address the gateway listens on (default `"127.0.0.1:8100"`).
    #[serde(default)]
    pub listen: Option<String>,
    /// The apex domain all tenant subdomains hang off, e.g.
    /// `"example.com"`. Required.
    #[serde(default)]
    pub root_domain: Option<String>,
    /// The single origin all traffic is forwarded to, e.g.
    /// `"http://127.0.0.1:3000"`. Required.
    #[serde(default)]
    pub origin: Option<String>,
    /// Scheme used when rebuilding client-facing URLs for redirects
    /// (default `"https"`).
    #[serde(default)]
    pub external_scheme: Option<String>,
    /// Per-tenant routing policies. When the key is absent entirely,
    /// the standard six-tenant table applies; an explicit empty list
    /// enables no subdomains at all.
    #[serde(default)]
    pub tenants: Option<Vec<TenantConfig>>,
    /// Tenant label an authenticated user is forwarded to from public
    /// auth pages when no usable `redirect` parameter is present
    /// (default `"app"`).
    #[serde(default)]
    pub default_landing: Option<String>,
    /// Path of the login page on the auth tenant (default `"/login"`).
    #[serde(default)]
    pub login_path: Option<String>,
    /// Path prefixes served as static assets, bypassing filtering,
    /// rate limiting, and the auth gate.
    #[serde(default)]
    pub static_assets: Option<Vec<String>>,
    /// URL filtering configuration. Absent means the built-in
    /// signature set with no extras.
    #[serde(default)]
    pub waf: Option<WafConfig>,
    /// Per-client rate limiting configuration. When absent, rate
    /// limiting is disabled.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Security headers stamped on every response. Absent means the
    /// built-in set; an explicit empty list disables injection.
    #[serde(default)]
    pub security_headers: Option<Vec<HeaderPair>>,
    /// Session cookie and verification endpoint configuration.
    #[serde(default)]
    pub session: Option<SessionConfig>,
    /// Total request timeout in milliseconds covering the entire origin
    /// round-trip (default: 30000). Requests exceeding this receive 504.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Idle timeout in milliseconds for pooled origin connections
    /// (default: 60000).
    #[serde(default)]
    pub pool_idle_timeout_ms: Option<u64>,
    /// Maximum idle connections kept for the origin (default: 32).
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    /// Maximum concurrent in-flight requests before returning 503
    /// Service Unavailable (default: 1000).
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,
}

/// Configuration for a single tenant subdomain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    /// The subdomain label. Must be one of the known tenant labels;
    /// anything else is rejected at startup.
    pub name: String,
    /// Whether paths outside `public_paths` require an authenticated
    /// session.
    #[serde(default)]
    pub requires_auth: bool,
    /// Paths reachable without a session, matched exactly or on `/`
    /// segment boundaries.
    #[serde(default)]
    pub public_paths: Vec<String>,
    /// Internal path prefix prepended when forwarding to the origin.
    /// Defaults to `/{name}`.
    #[serde(default)]
    pub rewrite_prefix: Option<String>,
}

impl TenantConfig {
    fn named(name: &str, requires_auth: bool, public_paths: &[&str]) -> Self {
        Self {
            name: name.into(),
            requires_auth,
            public_paths: public_paths.iter().map(|p| p.to_string()).collect(),
            rewrite_prefix: None,
        }
    }
}

/// The standard tenant table used when the config file does not carry
/// a `tenants` key: every known subdomain enabled, the application
/// tenants session-gated with a public health endpoint, the auth pages
/// open.
fn default_tenants() -> Vec<TenantConfig> {
    vec![
        TenantConfig::named("auth", false, &["/login", "/signup", "/password-reset"]),
        TenantConfig::named("api", false, &[]),
        TenantConfig::named("admin", true, &[]),
        TenantConfig::named("app", true, &["/health"]),
        TenantConfig::named("accounts", true, &["/health"]),
        TenantConfig::named("wallet", true, &["/health"]),
    ]
}

/// URL filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WafConfig {
    /// Whether filtering runs at all (default: true).
    #[serde(default = "default_waf_enabled")]
    pub enabled: bool,
    /// Additional regex patterns checked alongside the built-in
    /// signature set.
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_waf_enabled() -> bool {
    true
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            enabled: default_waf_enabled(),
            extra_patterns: Vec::new(),
        }
    }
}

/// Per-client rate limiting configuration.
///
/// When present, the gateway counts requests per client IP in fixed
/// windows. Requests exceeding the budget receive a 429 Too Many
/// Requests response with a `Retry-After` header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Requests admitted per client per window (default: 100).
    #[serde(default = "default_rate_limit_max")]
    pub max_requests: u32,
    /// Window length in seconds (default: 60).
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit_max() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW.as_secs()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// One response header in the configured security set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

/// Session cookie and verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Cookie carrying the session token (default `"session"`).
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,
    /// Endpoint the gateway calls to verify a presented token. When
    /// absent, every request is treated as unauthenticated.
    #[serde(default)]
    pub verify_url: Option<String>,
    /// Per-lookup timeout in milliseconds (default: 1500). Expiry is
    /// treated as a verification failure, not a missing session.
    #[serde(default = "default_session_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_session_cookie() -> String {
    DEFAULT_SESSION_COOKIE.into()
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT.as_millis() as u64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            verify_url: None,
            timeout_ms: default_session_timeout_ms(),
        }
    }
}

/// Validated session settings ready for the verifier.
#[derive(Debug, Clone)]
pub struct SessionRuntime {
    /// Cookie carrying the session token.
    pub cookie_name: String,
    /// Parsed verification endpoint. `None` means sessions are never
    /// verified and every request counts as unauthenticated.
    pub verify_uri: Option<hyper::Uri>,
    /// Per-lookup timeout.
    pub timeout: Duration,
}

/// Fully validated, ready-to-use configuration.
///
/// Created once at startup and shared across all request handlers via
/// `Arc`. Contains every value the gateway needs at runtime without
/// touching the filesystem or compiling regexes on the hot path.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Socket address the gateway binds to.
    pub listen: SocketAddr,
    /// The validated origin URI all traffic forwards to.
    pub origin: hyper::Uri,
    /// Scheme used when rebuilding client-facing URLs.
    pub external_scheme: String,
    /// Maps request hosts to tenants.
    pub classifier: HostClassifier,
    /// Per-tenant routing policies and static-asset prefixes.
    pub routes: RouteTable,
    /// Tenant an authenticated user lands on absent a `redirect`
    /// parameter.
    pub default_landing: Tenant,
    /// Path of the login page on the auth tenant.
    pub login_path: String,
    /// Compiled URL filter. `None` means filtering is disabled.
    pub url_filter: Option<UrlFilter>,
    /// Rate limiting settings. `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    /// Headers stamped on every response.
    pub security_headers: SecurityHeaderSet,
    /// Session cookie and verification settings.
    pub session: SessionRuntime,
    /// Total request timeout for the origin round-trip. Expiry yields 504.
    pub request_timeout: Duration,
    /// Idle timeout for pooled origin connections.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept for the origin.
    pub pool_max_idle_per_host: usize,
    /// Maximum concurrent in-flight requests. Overflow yields 503.
    pub max_concurrent_requests: usize,
}

/// Validates an address that must be an absolute http(s) URI with an
/// authority, such as the origin or the session verification endpoint.
fn validate_absolute_uri(address: &str, what: &str) -> Result<hyper::Uri> {
    if address.is_empty() {
        return Err(GatewayError::Config(format!("{what} must not be empty")));
    }

    let uri = address
        .parse::<hyper::Uri>()
        .map_err(|e| GatewayError::Config(format!("invalid {what} \"{address}\": {e}")))?;

    uri.authority().ok_or_else(|| {
        GatewayError::Config(format!("{what} URI has no authority: {address}"))
    })?;

    match uri.scheme_str() {
        Some("http") | Some("https") => Ok(uri),
        _ => Err(GatewayError::Config(format!(
            "{what} URI must be http or https: {address}"
        ))),
    }
}

fn validate_rooted(value: &str, what: &str) -> Result<()> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(GatewayError::Config(format!(
            "{what} must start with '/': {value}"
        )))
    }
}

impl Config {
    /// Loads configuration from a YAML file at the given path.
    ///
    /// Returns a [`GatewayError::Config`] if the file cannot be opened
    /// or its contents fail YAML deserialization.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            GatewayError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        serde_yaml::from_reader(file)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {e}")))
    }

    /// Validates all fields and compiles the classifier, route table,
    /// filter, and header set, producing a [`RuntimeConfig`] suitable
    /// for the gateway hot path.
    ///
    /// The root domain and origin must be configured.
    pub fn into_runtime(self) -> Result<RuntimeConfig> {
        let root_domain = self
            .root_domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| GatewayError::Config("root_domain must be configured".into()))?;

        let origin = validate_absolute_uri(self.origin.as_deref().unwrap_or_default(), "origin")?;

        let external_scheme = self
            .external_scheme
            .unwrap_or_else(|| DEFAULT_EXTERNAL_SCHEME.into());
        if external_scheme != "http" && external_scheme != "https" {
            return Err(GatewayError::Config(format!(
                "external_scheme must be http or https: {external_scheme}"
            )));
        }

        let listen_str = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen = listen_str.parse::<SocketAddr>().map_err(|e| {
            GatewayError::Config(format!("invalid listen address \"{listen_str}\": {e}"))
        })?;

        let tenants = self.tenants.unwrap_or_else(default_tenants);
        let policies = tenants
            .into_iter()
            .map(|t| {
                let tenant = Tenant::from_label(&t.name).ok_or_else(|| {
                    GatewayError::Config(format!("unknown tenant \"{}\"", t.name))
                })?;
                for path in &t.public_paths {
                    validate_rooted(path, "public path")?;
                }
                let rewrite_prefix = t
                    .rewrite_prefix
                    .unwrap_or_else(|| format!("/{}", tenant.as_str()));
                Ok(TenantPolicy {
                    tenant,
                    requires_auth: t.requires_auth,
                    public_paths: t.public_paths,
                    rewrite_prefix,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let static_prefixes = self.static_assets.unwrap_or_else(|| {
            DEFAULT_STATIC_PREFIXES.iter().map(|p| p.to_string()).collect()
        });
        for prefix in &static_prefixes {
            validate_rooted(prefix, "static asset prefix")?;
        }

        let enabled = policies.iter().map(|p| p.tenant).collect();
        let classifier = HostClassifier::new(root_domain, enabled)?;
        let routes = RouteTable::new(policies, static_prefixes)?;

        let landing_label = self.default_landing.as_deref().map(str::to_ascii_lowercase);
        let default_landing = match landing_label.as_deref() {
            Some(label) => Tenant::from_label(label).ok_or_else(|| {
                GatewayError::Config(format!("unknown default_landing tenant \"{label}\""))
            })?,
            None => DEFAULT_LANDING_TENANT,
        };

        let login_path = self.login_path.unwrap_or_else(|| DEFAULT_LOGIN_PATH.into());
        validate_rooted(&login_path, "login_path")?;

        let waf = self.waf.unwrap_or_default();
        let url_filter = if waf.enabled {
            Some(UrlFilter::with_extra_patterns(&waf.extra_patterns)?)
        } else {
            None
        };

        if let Some(rl) = &self.rate_limit {
            if rl.max_requests == 0 {
                return Err(GatewayError::Config(
                    "rate_limit.max_requests must be non-zero".into(),
                ));
            }
            if rl.window_secs == 0 {
                return Err(GatewayError::Config(
                    "rate_limit.window_secs must be non-zero".into(),
                ));
            }
        }

        let security_headers = match self.security_headers {
            None => SecurityHeaderSet::built_in(),
            Some(pairs) => {
                let pairs: Vec<(String, String)> =
                    pairs.into_iter().map(|h| (h.name, h.value)).collect();
                SecurityHeaderSet::from_pairs(&pairs)?
            }
        };

        let session_raw = self.session.unwrap_or_default();
        if session_raw.cookie_name.is_empty() {
            return Err(GatewayError::Config(
                "session.cookie_name must not be empty".into(),
            ));
        }
        let verify_uri = session_raw
            .verify_url
            .as_deref()
            .map(|url| validate_absolute_uri(url, "session.verify_url"))
            .transpose()?;
        let session = SessionRuntime {
            cookie_name: session_raw.cookie_name,
            verify_uri,
            timeout: Duration::from_millis(session_raw.timeout_ms),
        };

        let request_timeout = self
            .request_timeout_ms
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis);

        let pool_idle_timeout = self
            .pool_idle_timeout_ms
            .map_or(DEFAULT_POOL_IDLE_TIMEOUT, Duration::from_millis);

        let pool_max_idle_per_host = self
            .pool_max_idle_per_host
            .unwrap_or(DEFAULT_POOL_MAX_IDLE_PER_HOST);

        let max_concurrent_requests = self
            .max_concurrent_requests
            .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS);

        Ok(RuntimeConfig {
            listen,
            origin,
            external_scheme,
            classifier,
            routes,
            default_landing,
            login_path,
            url_filter,
            rate_limit: self.rate_limit,
            security_headers,
            session,
            request_timeout,
            pool_idle_timeout,
            pool_max_idle_per_host,
            max_concurrent_requests,
        })
    }
}
