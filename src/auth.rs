//! Session gating and redirect URL construction.
//!
//! Decides, per tenant and path, whether a request may proceed with the
//! authentication verdict it carries. The verdict itself comes from the
//! session collaborator upstream of this module; nothing here inspects
//! credentials. Redirect targets are built only from configuration and
//! the validated original URL, and an inbound `redirect` parameter is
//! honored only when it stays on this deployment's domains.

use crate::config::RuntimeConfig;
use crate::tenant::Tenant;

/// The gate's verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Proceed to the tenant rewrite.
    Allow,
    /// Unauthenticated on a protected path. Carries the login URL with
    /// the original request URL percent-encoded in `redirect`.
    RedirectToLogin(String),
    /// An authenticated user asked for a public auth page; send them
    /// onward instead of showing the login form again.
    RedirectForward(String),
    /// The tenant is outside session gating.
    NotApplicable,
}

/// Applies the gate rules for `tenant` and `path`.
///
/// The API tenant, the apex, and unknown hosts are never gated. The
/// auth tenant's namespace needs no session, but an authenticated user
/// on one of its public pages is forwarded onward. For application
/// tenants: no policy or `requires_auth = false` allows everything, a
/// public path allows regardless of the verdict, and everything else
/// requires `authenticated`.
pub fn decide(
    config: &RuntimeConfig,
    tenant: Tenant,
    path: &str,
    query: Option<&str>,
    authenticated: bool,
    original_url: &str,
) -> AuthDecision {
    match tenant {
        Tenant::Api | Tenant::Root | Tenant::Unknown => AuthDecision::NotApplicable,
        Tenant::Auth => {
            if authenticated && config.routes.is_public_path(Tenant::Auth, path) {
                AuthDecision::RedirectForward(forward_target(config, query))
            } else {
                AuthDecision::Allow
            }
        }
        tenant => {
            if !config.routes.requires_auth(tenant) {
                return AuthDecision::Allow;
            }
            if config.routes.is_public_path(tenant, path) {
                return AuthDecision::Allow;
            }
            if authenticated {
                AuthDecision::Allow
            } else {
                AuthDecision::RedirectToLogin(login_redirect_url(config, original_url))
            }
        }
    }
}

/// Whether dispatching this request needs the session collaborator's
/// verdict at all. The pipeline skips the session lookup, and the
/// access log records no consultation, when this is `false`.
pub fn needs_session(config: &RuntimeConfig, tenant: Tenant, path: &str) -> bool {
    match tenant {
        Tenant::Api | Tenant::Root | Tenant::Unknown => false,
        Tenant::Auth => config.routes.is_public_path(Tenant::Auth, path),
        tenant => {
            config.routes.requires_auth(tenant) && !config.routes.is_public_path(tenant, path)
        }
    }
}

/// The fully-qualified URL the client requested, rebuilt from the
/// external scheme and the original host, path, and query.
pub fn original_url(config: &RuntimeConfig, host: &str, path_and_query: &str) -> String {
    format!("{}://{host}{path_and_query}", config.external_scheme)
}

/// The login page URL with `original_url` percent-encoded into the
/// `redirect` query parameter.
pub fn login_redirect_url(config: &RuntimeConfig, original_url: &str) -> String {
    format!(
        "{}://{}.{}{}?redirect={}",
        config.external_scheme,
        Tenant::Auth,
        config.classifier.root_domain(),
        config.login_path,
        urlencoding::encode(original_url),
    )
}

/// The root page of the configured default landing tenant.
pub fn default_landing_url(config: &RuntimeConfig) -> String {
    format!(
        "{}://{}.{}/",
        config.external_scheme,
        config.default_landing,
        config.classifier.root_domain(),
    )
}

/// Where to send an already-authenticated user who hit a public auth
/// page: the request's own `redirect` parameter when it passes the
/// same-site check, else the default landing page.
fn forward_target(config: &RuntimeConfig, query: Option<&str>) -> String {
    query
        .and_then(redirect_param)
        .and_then(|target| same_site_target(config, &target))
        .unwrap_or_else(|| default_landing_url(config))
}

/// First non-empty `redirect` parameter in the raw query string,
/// percent-decoded.
fn redirect_param(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name != "redirect" || value.is_empty() {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

/// Accepts a decoded redirect target only when it stays on this
/// deployment: a rooted relative path, or an absolute http(s) URL whose
/// host classifies to a known tenant or the apex. Everything else is
/// discarded so the login flow can never become an open redirect.
fn same_site_target(config: &RuntimeConfig, target: &str) -> Option<String> {
    if target.starts_with('/') && !target.starts_with("//") {
        return Some(target.to_owned());
    }

    let uri = target.parse::<hyper::Uri>().ok()?;
    let scheme = uri.scheme_str()?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = uri.host()?;
    (config.classifier.classify(host) != Tenant::Unknown).then(|| target.to_owned())
}
