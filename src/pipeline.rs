//! Core request pipeline: filtering, rate limiting, classification,
//! session gating, dispatch, and origin forwarding.
//!
//! Every inbound request is assigned a monotonically increasing request
//! ID and wrapped in a [`tracing::Span`] carrying structured fields for
//! observability. The outer handler is infallible: whatever happens
//! inside, the client gets a response carrying the security header set
//! and the access log gets exactly one line.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, warn};

use crate::access_log::{AccessLog, AccessRecord, now_ms};
use crate::auth;
use crate::dispatch::{self, RouteAction};
use crate::headers;
use crate::rate_limit::FixedWindowLimiter;
use crate::session::{SessionVerifier, session_token};
use crate::{GatewayError, Result, RuntimeConfig};

/// An alias to simplify the calls to `Box<dyn std::error::Error + Send + Sync>`.
pub type StdError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased body used for both request forwarding and response
/// streaming.
///
/// Wraps any body implementation behind a single boxed trait object,
/// allowing the handler to accept requests with arbitrary body types
/// (e.g. `Incoming`, `Full<Bytes>`, `Empty<Bytes>`) and return a uniform
/// response type regardless of whether the gateway answered directly or
/// forwarded to the origin.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, StdError>;

/// The HTTP client type for origin connections.
pub type HttpClient = Client<HttpConnector, BoxBody>;

/// Global monotonic counter for assigning unique request IDs.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Constructs the pooled [`HttpClient`] for origin connections.
pub fn build_client(config: &RuntimeConfig) -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .build(HttpConnector::new())
}

/// Access-log fields accumulated while a request moves through the
/// stages.
struct RouteOutcome {
    tenant: &'static str,
    decision: &'static str,
    auth: Option<bool>,
}

/// Processes a single inbound request through the gateway pipeline.
///
/// The pipeline performs the following steps in order:
///
/// 1. **Request smuggling defense** — Rejects requests carrying both
///    `Content-Length` and `Transfer-Encoding` headers (RFC 7230
///    §3.3.3) with 400.
/// 2. **Static asset short-circuit** — Paths under the configured asset
///    prefixes are forwarded unmodified, skipping filtering, rate
///    limiting, and the auth gate.
/// 3. **URL filtering** — The raw path and query are checked against
///    the compiled signature set. Matches receive 403; the matched rule
///    name goes to the diagnostic log, never to the client.
/// 4. **Rate limiting** — The client IP is counted against its fixed
///    window. Over-budget requests receive 429 with a `Retry-After`
///    header.
/// 5. **Host classification** — The request host is mapped to a tenant.
///    Unknown hosts end as 404 after dispatch.
/// 6. **Session resolution** — Only when the tenant and path make the
///    verdict matter, the session cookie is resolved against the
///    verifier. Verification failures count as unauthenticated.
/// 7. **Dispatch** — The tenant decides pass-through, prefix rewrite,
///    redirect, or 404.
/// 8. **Forwarding** — Proxied requests get hop-by-hop stripping,
///    `X-Forwarded-*` injection, and a `Host` rewrite before the origin
///    leg; expiry yields 504 and transport errors 502.
///
/// Whatever the outcome, the response leaves with the security header
/// set and an `x-request-id`, and one access record is written.
pub async fn handle_request<B, C>(
    req: Request<B>,
    client: Client<C, BoxBody>,
    config: Arc<RuntimeConfig>,
    limiter: Option<&FixedWindowLimiter>,
    verifier: &dyn SessionVerifier,
    access_log: &AccessLog,
    client_addr: SocketAddr,
) -> Response<BoxBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let method = req.method().clone();
    let uri = req.uri().clone();

    let span = tracing::info_span!(
        "request",
        id = request_id,
        method = %method,
        uri = %uri,
        client = %client_addr,
    );

    async move {
        let ip = headers::client_ip(req.headers(), client_addr);
        let path = uri.path().to_owned();

        let mut outcome = RouteOutcome {
            tenant: "-",
            decision: "error",
            auth: None,
        };
        let result = route(
            req,
            &client,
            &config,
            limiter,
            verifier,
            client_addr,
            ip,
            &mut outcome,
        )
        .await;

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "request failed");
                outcome.decision = "error";
                err.into_response()
            }
        };

        config.security_headers.apply(response.headers_mut());
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-request-id"), value);
        }

        access_log.record(&AccessRecord {
            ts_ms: now_ms(),
            id: request_id,
            method: method.as_str(),
            tenant: outcome.tenant,
            path: &path,
            decision: outcome.decision,
            client: ip.to_string(),
            status: response.status().as_u16(),
            auth: outcome.auth,
        });

        response
    }
    .instrument(span)
    .await
}

/// The fallible part of the pipeline. Updates `outcome` as stages run
/// so the caller can log what was decided even when a later stage
/// fails.
#[allow(clippy::too_many_arguments)]
async fn route<B, C>(
    req: Request<B>,
    client: &Client<C, BoxBody>,
    config: &RuntimeConfig,
    limiter: Option<&FixedWindowLimiter>,
    verifier: &dyn SessionVerifier,
    client_addr: SocketAddr,
    ip: std::net::IpAddr,
    outcome: &mut RouteOutcome,
) -> Result<Response<BoxBody>>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    if headers::is_smuggling_attempt(req.headers()) {
        warn!("conflicting framing headers; rejecting request");
        outcome.decision = "blocked";
        return bad_request();
    }

    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".into());
    let host = request_host(&req);

    if config.routes.is_static_asset(&path) {
        outcome.decision = "static";
        return forward(req, client, config, client_addr, None).await;
    }

    if let Some(filter) = &config.url_filter {
        if let Some(rule) = filter.matched_rule(&path_and_query) {
            warn!(rule, "request blocked by url filter");
            outcome.decision = "blocked";
            return forbidden();
        }
    }

    if let Some(limiter) = limiter {
        let verdict = limiter.check(&ip.to_string());
        if !verdict.allowed {
            debug!(client = %ip, "rate limit exceeded");
            outcome.decision = "rate_limited";
            return too_many_requests(verdict.retry_after_secs());
        }
    }

    let tenant = config.classifier.classify(&host);
    outcome.tenant = tenant.as_str();

    let authenticated = if auth::needs_session(config, tenant, &path) {
        let verified = match session_token(req.headers(), &config.session.cookie_name) {
            Some(token) => match verifier.is_authenticated(token).await {
                Ok(verified) => verified,
                Err(err) => {
                    warn!(error = %err, "session verification failed; treating as unauthenticated");
                    false
                }
            },
            None => false,
        };
        outcome.auth = Some(verified);
        verified
    } else {
        false
    };

    let original_url = auth::original_url(config, &host, &path_and_query);
    let action = dispatch::dispatch(
        config,
        tenant,
        &path,
        query.as_deref(),
        authenticated,
        &original_url,
    )?;
    outcome.decision = action.kind();

    match action {
        RouteAction::PassThrough => forward(req, client, config, client_addr, None).await,
        RouteAction::Rewrite(rewritten) => {
            forward(req, client, config, client_addr, Some(rewritten)).await
        }
        RouteAction::Redirect(location) => redirect(&location),
        RouteAction::NotFound => not_found(),
    }
}

/// Forwards the request to the origin, optionally with a rewritten
/// path. The query string always survives a rewrite.
async fn forward<B, C>(
    req: Request<B>,
    client: &Client<C, BoxBody>,
    config: &RuntimeConfig,
    client_addr: SocketAddr,
    rewritten_path: Option<String>,
) -> Result<Response<BoxBody>>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let (mut parts, body) = req.into_parts();

    let path_and_query = forward_path(&parts.uri, rewritten_path);
    let target = origin_uri(&config.origin, &path_and_query)?;

    headers::strip_hop_by_hop(&mut parts.headers);
    headers::inject_forwarding_headers(&mut parts.headers, client_addr, &config.external_scheme);
    headers::rewrite_host(
        &mut parts.headers,
        config
            .origin
            .authority()
            .ok_or_else(|| GatewayError::Internal("origin has no authority".into()))?,
    );

    parts.uri = target;

    debug!(origin_uri = %parts.uri, "forwarding request");

    let start = std::time::Instant::now();
    let boxed_body = body.map_err(|e| e.into()).boxed();
    let origin_req = Request::from_parts(parts, boxed_body);

    let origin_result = timeout(config.request_timeout, client.request(origin_req)).await;

    let mut response = match origin_result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(
                error = %e,
                latency_ms = start.elapsed().as_millis() as u64,
                "origin request failed"
            );
            return Err(GatewayError::Origin(e.to_string()));
        }
        Err(_elapsed) => {
            warn!(
                timeout = ?config.request_timeout,
                latency_ms = start.elapsed().as_millis() as u64,
                "origin request timed out"
            );
            return Err(GatewayError::Timeout(config.request_timeout));
        }
    };

    info!(
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "origin responded"
    );

    headers::strip_hop_by_hop(response.headers_mut());

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(
        parts,
        body.map_err(|e| -> StdError { Box::new(e) }).boxed(),
    ))
}

/// The request host as classification sees it: the `Host` header when
/// present, else the URI authority for absolute-form requests.
fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// The path-and-query string for the origin leg.
fn forward_path(original: &Uri, rewritten_path: Option<String>) -> String {
    match rewritten_path {
        Some(path) => match original.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        },
        None => original
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".into()),
    }
}

/// Builds the origin-facing URI from the configured origin's scheme and
/// authority plus the forwarded path and query.
fn origin_uri(origin: &Uri, path_and_query: &str) -> Result<Uri> {
    let authority = origin
        .authority()
        .ok_or_else(|| GatewayError::Internal("origin has no authority".into()))?;

    let scheme = origin
        .scheme()
        .ok_or_else(|| GatewayError::Internal("origin has no scheme".into()))?;

    Uri::builder()
        .scheme(scheme.clone())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::Internal(format!("failed to build origin URI: {e}")))
}

fn json_body(value: serde_json::Value) -> BoxBody {
    Full::new(Bytes::from(value.to_string()))
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// 400 for requests the gateway refuses to parse further.
fn bad_request() -> Result<Response<BoxBody>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("content-type", "application/json")
        .body(json_body(serde_json::json!({
            "error": "bad_request",
            "message": "malformed request",
        })))
        .map_err(Into::into)
}

/// 403 with a body that reveals nothing about what matched.
fn forbidden() -> Result<Response<BoxBody>> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header("content-type", "application/json")
        .body(json_body(serde_json::json!({
            "error": "forbidden",
            "message": "request blocked",
        })))
        .map_err(Into::into)
}

/// 429 carrying the seconds until the client's window resets.
fn too_many_requests(retry_after_secs: u64) -> Result<Response<BoxBody>> {
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("retry-after", retry_after_secs.to_string())
        .header("content-type", "application/json")
        .body(json_body(serde_json::json!({
            "error": "rate_limited",
            "message": "too many requests",
        })))
        .map_err(Into::into)
}

/// 404 for hosts that classify to no tenant.
fn not_found() -> Result<Response<BoxBody>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("content-type", "application/json")
        .body(json_body(serde_json::json!({
            "error": "not_found",
            "message": "unknown host",
        })))
        .map_err(Into::into)
}

/// 302 to the given location.
fn redirect(location: &str) -> Result<Response<BoxBody>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("location", location)
        .body(empty_body())
        .map_err(Into::into)
}
