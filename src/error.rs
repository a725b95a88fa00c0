//! Error types and HTTP status code mapping.
//!
//! Every variant carries the detail an operator needs, but client
//! responses built from these errors are deliberately generic: the
//! message goes to the diagnostic log, never onto the wire.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};

use crate::pipeline::BoxBody;

/// Every failure the gateway can produce, each mapping to a specific
/// HTTP status.
#[derive(Debug)]
pub enum GatewayError {
    /// The configuration file could not be loaded, parsed, or validated.
    Config(String),
    /// The origin returned a transport-level error or was unreachable.
    Origin(String),
    /// The origin round-trip exceeded the configured deadline.
    Timeout(Duration),
    /// Session verification failed in a way that is neither
    /// authenticated nor anonymous.
    Session(String),
    /// The concurrency limit was reached before the request entered
    /// the pipeline.
    Overloaded {
        /// The configured concurrent-request ceiling.
        limit: usize,
    },
    /// An internal error that does not fit other categories.
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Origin(msg) => write!(f, "origin error: {msg}"),
            Self::Timeout(limit) => write!(f, "origin timed out after {limit:?}"),
            Self::Session(msg) => write!(f, "session verification error: {msg}"),
            Self::Overloaded { limit } => {
                write!(f, "concurrency limit of {limit} in-flight requests reached")
            }
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Returns the HTTP status code corresponding to this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Session(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Origin(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable kind for the response body.
    fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Session(_) | Self::Internal(_) => "internal_error",
            Self::Origin(_) => "bad_gateway",
            Self::Timeout(_) => "gateway_timeout",
            Self::Overloaded { .. } => "service_unavailable",
        }
    }

    /// The only message clients ever see for this error. Variant detail
    /// stays in the diagnostic log.
    fn public_message(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Session(_) | Self::Internal(_) => {
                "the gateway could not process this request"
            }
            Self::Origin(_) => "the origin could not be reached",
            Self::Timeout(_) => "the origin did not respond in time",
            Self::Overloaded { .. } => "the gateway is at capacity",
        }
    }

    /// Converts this error into an HTTP response with a generic JSON
    /// body.
    pub fn into_response(self) -> Response<BoxBody> {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.public_message(),
        });

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(
                Full::new(Bytes::from(body.to_string()))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(
                        Full::new(Bytes::new())
                            .map_err(|never| match never {})
                            .boxed(),
                    )
                    .expect("building fallback response must not fail")
            })
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        Self::Origin(err.to_string())
    }
}

impl From<hyper::http::Error> for GatewayError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
