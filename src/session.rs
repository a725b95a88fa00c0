//! Session verification against the external session service.
//!
//! The gateway never validates credentials itself. It extracts the
//! session cookie, hands the token to a [`SessionVerifier`], and
//! receives a plain boolean back. The trait seam keeps the pipeline
//! independent of the transport; production uses the HTTP verifier
//! below, tests substitute stubs. Verifier failures are the caller's to
//! treat as unauthenticated.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::debug;

use crate::{GatewayError, Result};

/// Answers whether a session token belongs to a live session.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// `Ok(true)` for a live session, `Ok(false)` for a missing or
    /// rejected one, `Err` when the verdict could not be obtained.
    async fn is_authenticated(&self, token: &str) -> Result<bool>;
}

/// Extracts the value of the named cookie from a `Cookie` header.
///
/// Returns `None` when the header is absent, unreadable, or does not
/// carry a non-empty value for `cookie_name`.
pub fn session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let cookies = headers.get(hyper::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name && !value.is_empty()).then_some(value)
    })
}

/// Production verifier: forwards the session cookie to the session
/// service's verify endpoint over a pooled HTTP client.
///
/// A 2xx response means authenticated, 401/403 mean not; any other
/// status, transport error, or timeout is an error so the pipeline can
/// fail closed.
#[derive(Debug, Clone)]
pub struct HttpSessionVerifier {
    client: Client<HttpConnector, Empty<Bytes>>,
    verify_uri: Uri,
    cookie_name: String,
    timeout: Duration,
}

impl HttpSessionVerifier {
    /// Creates a verifier calling `verify_uri`, re-presenting the token
    /// under `cookie_name`, bounded by `request_timeout` per call.
    pub fn new(verify_uri: Uri, cookie_name: impl Into<String>, request_timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            verify_uri,
            cookie_name: cookie_name.into(),
            timeout: request_timeout,
        }
    }
}

/// Verifier used when no verify endpoint is configured: every request
/// counts as unauthenticated, so gated tenants always redirect to
/// login.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVerifier;

#[async_trait]
impl SessionVerifier for NullVerifier {
    async fn is_authenticated(&self, _token: &str) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl SessionVerifier for HttpSessionVerifier {
    async fn is_authenticated(&self, token: &str) -> Result<bool> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(self.verify_uri.clone())
            .header(
                hyper::header::COOKIE,
                format!("{}={token}", self.cookie_name),
            )
            .body(Empty::<Bytes>::new())
            .map_err(|e| GatewayError::Internal(format!("failed to build verify request: {e}")))?;

        let response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
            .map_err(|e| GatewayError::Session(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "session verify responded");

        if status.is_success() {
            return Ok(true);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            other => Err(GatewayError::Session(format!(
                "verify endpoint returned {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_named_cookie() {
        let headers = headers_with_cookie("session=abc123");
        assert_eq!(session_token(&headers, "session"), Some("abc123"));
    }

    #[test]
    fn extracts_among_multiple_cookies() {
        let headers = headers_with_cookie("theme=dark; session=tok-42; lang=en");
        assert_eq!(session_token(&headers, "session"), Some("tok-42"));
    }

    #[test]
    fn missing_cookie_header_yields_none() {
        assert_eq!(session_token(&HeaderMap::new(), "session"), None);
    }

    #[test]
    fn other_cookie_names_do_not_match() {
        let headers = headers_with_cookie("sessionx=abc; xsession=def");
        assert_eq!(session_token(&headers, "session"), None);
    }

    #[test]
    fn empty_value_yields_none() {
        let headers = headers_with_cookie("session=");
        assert_eq!(session_token(&headers, "session"), None);
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let headers = headers_with_cookie("session=a=b=c");
        assert_eq!(session_token(&headers, "session"), Some("a=b=c"));
    }

    #[tokio::test]
    async fn null_verifier_never_authenticates() {
        assert!(!NullVerifier.is_authenticated("any-token").await.unwrap());
    }
}
