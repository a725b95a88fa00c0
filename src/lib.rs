//! A multi-tenant edge gateway in front of a single origin.
//!
//! The gateway terminates client traffic for a family of subdomains
//! (`auth.example.com`, `api.example.com`, `app.example.com`, ...) and
//! decides per request whether to forward, rewrite, redirect, or answer
//! directly:
//!
//! - [`tenant`] maps the request host to one of a closed set of tenants.
//! - [`waf`] rejects requests whose URL matches a known attack signature.
//! - [`rate_limit`] counts requests per client IP in fixed windows.
//! - [`auth`] decides whether a tenant path needs a live session and
//!   where to redirect when it has none.
//! - [`session`] resolves the session cookie against the verify
//!   endpoint.
//! - [`dispatch`] turns the tenant and gate verdict into a route action.
//! - [`pipeline`] runs the stages in order and forwards to the origin.
//! - [`headers`] carries the proxy header hygiene and the security
//!   header set stamped on every response.
//! - [`access_log`] writes one JSON line per handled request.
//!
//! Configuration is YAML loaded once at startup ([`Config`]) and
//! validated into a [`RuntimeConfig`] shared by all handlers.

pub mod access_log;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod tenant;
pub mod waf;

pub use access_log::{AccessLog, AccessRecord};
pub use config::{Config, RuntimeConfig};
pub use error::GatewayError;
pub use pipeline::{BoxBody, HttpClient, build_client, handle_request};
pub use rate_limit::FixedWindowLimiter;
pub use server::{ServerState, serve, shutdown_signal};
pub use session::{HttpSessionVerifier, NullVerifier, SessionVerifier};
pub use tenant::{HostClassifier, Tenant};

/// Crate-wide result alias over [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;
