//! HTTP header processing: hop-by-hop removal, forwarding header
//! injection, host rewriting, client IP extraction, and the security
//! header set stamped onto every response.
//!
//! Implements the header-level requirements of RFC 7230 Section 6.1
//! (hop-by-hop header handling) and the de-facto `X-Forwarded-*`
//! convention for reverse proxies.

use std::net::{IpAddr, SocketAddr};

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::Authority;

use crate::{GatewayError, Result};

/// Headers applied to every outgoing response when the configuration
/// does not supply its own table.
pub const DEFAULT_SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    (
        "permissions-policy",
        "geolocation=(), microphone=(), camera=()",
    ),
];

/// Removes all hop-by-hop headers from the given header map.
///
/// Strips the standard set defined in RFC 7230 Section 6.1 (`Connection`,
/// `Keep-Alive`, `Proxy-Authenticate`, `Proxy-Authorization`, `TE`,
/// `Trailers`, `Transfer-Encoding`, `Upgrade`), plus any additional
/// header names declared in the `Connection` header value.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let conn: Vec<HeaderName> = headers
        .get("connection")
        .and_then(|val| val.to_str().ok())
        .map(|val| {
            val.split(',')
                .filter_map(|s| HeaderName::from_bytes(s.trim().as_bytes()).ok())
                .collect()
        })
        .unwrap_or_default();

    conn.iter().for_each(|name| {
        headers.remove(name);
    });

    [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ]
    .iter()
    .for_each(|name| {
        headers.remove(*name);
    });
}

/// Injects `X-Forwarded-For`, `X-Forwarded-Proto`, and `X-Forwarded-Host`
/// headers into the given header map before the origin leg.
///
/// - `X-Forwarded-For` is appended to any existing value (preserving
///   upstream proxy chains) with the client's socket address.
/// - `X-Forwarded-Proto` is set to the external scheme clients used.
/// - `X-Forwarded-Host` is set to the original `Host` header value, if
///   present.
pub fn inject_forwarding_headers(headers: &mut HeaderMap, client_addr: SocketAddr, scheme: &str) {
    let client_ip = client_addr.ip().to_string();

    let xff_value = headers
        .get("x-forwarded-for")
        .and_then(|existing| existing.to_str().ok())
        .map(|existing| format!("{existing}, {client_ip}"))
        .unwrap_or_else(|| client_ip);

    if let Ok(val) = HeaderValue::from_str(&xff_value) {
        headers.insert("x-forwarded-for", val);
    }
    if let Ok(val) = HeaderValue::from_str(scheme) {
        headers.insert("x-forwarded-proto", val);
    }
    if let Some(host) = headers.get(hyper::header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
}

/// Rewrites the `Host` header to the origin authority so the origin
/// server sees itself addressed, regardless of which tenant host the
/// client used. The original host survives in `X-Forwarded-Host`.
pub fn rewrite_host(headers: &mut HeaderMap, origin_auth: &Authority) {
    if let Ok(val) = HeaderValue::from_str(origin_auth.as_str()) {
        headers.insert(hyper::header::HOST, val);
    }
}

/// Extracts the client IP for rate-limit keying and logging: the first
/// comma-separated `X-Forwarded-For` element when present and parseable,
/// otherwise the peer socket address. Behind the platform edge the peer
/// is the edge itself, so the forwarded header is authoritative there.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

/// Returns `true` if the request contains both `Content-Length` and
/// `Transfer-Encoding` headers, which is a request smuggling indicator
/// per RFC 7230 Section 3.3.3.
pub fn is_smuggling_attempt(headers: &HeaderMap) -> bool {
    headers.contains_key(hyper::header::CONTENT_LENGTH)
        && headers.contains_key(hyper::header::TRANSFER_ENCODING)
}

/// The fixed header table stamped onto every response the gateway
/// produces, including errors and redirects.
///
/// Uses insert semantics, so applying the set twice leaves the same
/// headers as applying it once, and origin-supplied values for the same
/// names are overwritten rather than duplicated.
#[derive(Debug, Clone)]
pub struct SecurityHeaderSet {
    pairs: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaderSet {
    /// The built-in hardening table ([`DEFAULT_SECURITY_HEADERS`]).
    pub fn built_in() -> Self {
        let pairs = DEFAULT_SECURITY_HEADERS
            .iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        Self { pairs }
    }

    /// Builds a replacement table from configured name/value pairs,
    /// validating each at startup.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self> {
        let pairs = pairs
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    GatewayError::Config(format!("invalid security header name \"{name}\": {e}"))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    GatewayError::Config(format!("invalid security header value for {name}: {e}"))
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pairs })
    }

    /// Stamps the table onto `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.pairs {
            headers.insert(name.clone(), value.clone());
        }
    }

    /// Number of headers in the table.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
