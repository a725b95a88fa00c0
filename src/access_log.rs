//! Structured access logging: one JSON object per request, one line
//! per object, emitted after the response is decided.
//!
//! The access log is the gateway's audit trail and is kept separate
//! from the `tracing` diagnostics: diagnostics go wherever the
//! subscriber points them, access records go to a single sink that
//! downstream collectors can tail. Logging must never take a request
//! down with it, so every write failure is swallowed after a
//! diagnostic.

use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// One request, after the gateway has decided its response.
///
/// `auth` is present only when a session lookup actually ran; requests
/// that never consult the gate (API traffic, apex traffic, blocked
/// requests) omit the field entirely rather than logging a misleading
/// `false`.
#[derive(Debug, Serialize)]
pub struct AccessRecord<'a> {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u64,
    /// Request id assigned at ingress, mirrored in `x-request-id`.
    pub id: u64,
    pub method: &'a str,
    /// Tenant label, or `-` when the request was answered before
    /// classification.
    pub tenant: &'a str,
    pub path: &'a str,
    /// What the gateway did: `static`, `blocked`, `rate_limited`,
    /// `pass_through`, `rewrite`, `redirect`, `not_found`, `error`.
    pub decision: &'static str,
    pub client: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<bool>,
}

/// Serializes access records to a shared sink.
pub struct AccessLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AccessLog {
    /// Logs to standard output, the default for container deployments.
    pub fn stdout() -> Self {
        Self::to_writer(std::io::stdout())
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// Writes one record as a single JSON line.
    ///
    /// Failures are reported through `tracing` and otherwise ignored;
    /// the response has already been decided and a full log disk must
    /// not turn into client-facing errors.
    pub fn record(&self, record: &AccessRecord<'_>) {
        let line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize access record");
                return;
            }
        };

        let Ok(mut sink) = self.sink.lock() else {
            tracing::warn!("access log sink poisoned; dropping record");
            return;
        };
        if let Err(err) = sink
            .write_all(&line)
            .and_then(|()| sink.write_all(b"\n"))
            .and_then(|()| sink.flush())
        {
            tracing::warn!(error = %err, "failed to write access record");
        }
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}

/// Milliseconds since the Unix epoch, for [`AccessRecord::ts_ms`].
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
