//! Tenant routing: one priority-ordered match from classified tenant to
//! gateway decision.
//!
//! The routing policy lives in this single `match` so it can be audited
//! as a table rather than reconstructed from scattered conditionals.
//! Decisions are values; the only `Err` out of here is a policy lookup
//! failing for a classified tenant, which the pipeline boundary turns
//! into an opaque 500.

use crate::auth::{self, AuthDecision};
use crate::config::RuntimeConfig;
use crate::tenant::Tenant;
use crate::{GatewayError, Result};

/// What the gateway does with a classified request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Forward to the origin with the path untouched (apex traffic).
    PassThrough,
    /// Forward to the origin under the tenant's internal prefix. The
    /// client-visible URL does not change.
    Rewrite(String),
    /// Answer 302 with this `Location`.
    Redirect(String),
    /// Host matched nothing; answer 404.
    NotFound,
}

impl RouteAction {
    /// Label for the access log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::Rewrite(_) => "rewrite",
            Self::Redirect(_) => "redirect",
            Self::NotFound => "not_found",
        }
    }
}

/// Maps a classified tenant to its gateway decision, first match wins:
///
/// 1. `Api` rewrites under its prefix with no session gating at all.
/// 2. `Auth` rewrites under its prefix, except that an authenticated
///    user on a public auth page is redirected onward.
/// 3. Application tenants consult the gate, then rewrite or redirect
///    to login.
/// 4. The apex passes through unmodified.
/// 5. Unknown hosts get 404.
pub fn dispatch(
    config: &RuntimeConfig,
    tenant: Tenant,
    path: &str,
    query: Option<&str>,
    authenticated: bool,
    original_url: &str,
) -> Result<RouteAction> {
    match tenant {
        Tenant::Api => Ok(RouteAction::Rewrite(rewrite_path(config, Tenant::Api, path)?)),

        Tenant::Auth => {
            match auth::decide(config, Tenant::Auth, path, query, authenticated, original_url) {
                AuthDecision::RedirectForward(url) => Ok(RouteAction::Redirect(url)),
                _ => Ok(RouteAction::Rewrite(rewrite_path(
                    config,
                    Tenant::Auth,
                    path,
                )?)),
            }
        }

        Tenant::Admin | Tenant::App | Tenant::Accounts | Tenant::Wallet => {
            match auth::decide(config, tenant, path, query, authenticated, original_url) {
                AuthDecision::RedirectToLogin(url) | AuthDecision::RedirectForward(url) => {
                    Ok(RouteAction::Redirect(url))
                }
                AuthDecision::Allow | AuthDecision::NotApplicable => {
                    Ok(RouteAction::Rewrite(rewrite_path(config, tenant, path)?))
                }
            }
        }

        Tenant::Root => Ok(RouteAction::PassThrough),

        Tenant::Unknown => Ok(RouteAction::NotFound),
    }
}

/// Prepends the tenant's internal prefix to the request path.
///
/// A classified tenant always has a policy entry (classification only
/// produces enabled tenants); a missing entry here means the table and
/// classifier disagree and must surface as an internal error, not a
/// guessed route.
fn rewrite_path(config: &RuntimeConfig, tenant: Tenant, path: &str) -> Result<String> {
    let policy = config.routes.policy(tenant).ok_or_else(|| {
        GatewayError::Internal(format!(
            "no route policy for classified tenant \"{tenant}\""
        ))
    })?;
    Ok(format!("{}{path}", policy.rewrite_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> RuntimeConfig {
        Config {
            root_domain: Some("example.com".into()),
            origin: Some("http://127.0.0.1:3000".into()),
            ..Default::default()
        }
        .into_runtime()
        .unwrap()
    }

    #[test]
    fn api_rewrites_without_gating() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::Api,
            "/users",
            None,
            false,
            "https://api.example.com/users",
        )
        .unwrap();
        assert_eq!(action, RouteAction::Rewrite("/api/users".into()));
    }

    #[test]
    fn auth_tenant_rewrites_for_the_unauthenticated() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::Auth,
            "/login",
            None,
            false,
            "https://auth.example.com/login",
        )
        .unwrap();
        assert_eq!(action, RouteAction::Rewrite("/auth/login".into()));
    }

    #[test]
    fn auth_tenant_forwards_the_already_authenticated() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::Auth,
            "/login",
            None,
            true,
            "https://auth.example.com/login",
        )
        .unwrap();
        assert_eq!(
            action,
            RouteAction::Redirect("https://app.example.com/".into())
        );
    }

    #[test]
    fn protected_tenant_redirects_the_unauthenticated() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::App,
            "/dashboard",
            None,
            false,
            "https://app.example.com/dashboard",
        )
        .unwrap();
        assert_eq!(
            action,
            RouteAction::Redirect(
                "https://auth.example.com/login?redirect=https%3A%2F%2Fapp.example.com%2Fdashboard"
                    .into()
            )
        );
    }

    #[test]
    fn protected_tenant_rewrites_the_authenticated() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::Wallet,
            "/balance",
            None,
            true,
            "https://wallet.example.com/balance",
        )
        .unwrap();
        assert_eq!(action, RouteAction::Rewrite("/wallet/balance".into()));
    }

    #[test]
    fn root_passes_through() {
        let cfg = config();
        let action = dispatch(&cfg, Tenant::Root, "/", None, false, "https://example.com/").unwrap();
        assert_eq!(action, RouteAction::PassThrough);
    }

    #[test]
    fn unknown_is_not_found() {
        let cfg = config();
        let action = dispatch(
            &cfg,
            Tenant::Unknown,
            "/",
            None,
            false,
            "https://nope.example.com/",
        )
        .unwrap();
        assert_eq!(action, RouteAction::NotFound);
    }

    #[test]
    fn rewrite_keeps_the_root_path() {
        let cfg = config();
        let action = dispatch(&cfg, Tenant::Api, "/", None, false, "https://api.example.com/")
            .unwrap();
        assert_eq!(action, RouteAction::Rewrite("/api/".into()));
    }

    #[test]
    fn classified_tenant_without_policy_is_an_internal_error() {
        let cfg = Config {
            root_domain: Some("example.com".into()),
            origin: Some("http://127.0.0.1:3000".into()),
            tenants: Some(vec![]),
            ..Default::default()
        }
        .into_runtime()
        .unwrap();

        let result = dispatch(
            &cfg,
            Tenant::App,
            "/dashboard",
            None,
            true,
            "https://app.example.com/dashboard",
        );
        assert!(result.is_err());
    }

    #[test]
    fn action_kinds_label_the_access_log() {
        assert_eq!(RouteAction::PassThrough.kind(), "pass_through");
        assert_eq!(RouteAction::Rewrite("/x".into()).kind(), "rewrite");
        assert_eq!(RouteAction::Redirect("u".into()).kind(), "redirect");
        assert_eq!(RouteAction::NotFound.kind(), "not_found");
    }
}
