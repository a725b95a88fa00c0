//! Server accept loop and graceful shutdown.
//!
//! Contains the runtime infrastructure that sits between the TCP
//! listener and the per-request pipeline. This module is intentionally
//! decoupled from `main()` so that the server logic remains testable
//! and reusable without pulling in process-level concerns like signal
//! handling or `std::process::exit`.

use std::future::Future;
use std::sync::Arc;

use hyper::Response;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::access_log::AccessLog;
use crate::pipeline::{BoxBody, handle_request};
use crate::rate_limit::FixedWindowLimiter;
use crate::session::SessionVerifier;
use crate::{GatewayError, RuntimeConfig};

/// Runtime state shared across the accept loop.
pub struct ServerState {
    /// Validated gateway configuration shared by all handlers.
    pub config: Arc<RuntimeConfig>,
    /// Per-client request limiter. `None` disables rate limiting.
    pub limiter: Option<FixedWindowLimiter>,
    /// Session verifier consulted for gated tenants.
    pub verifier: Arc<dyn SessionVerifier>,
    /// Access log receiving one record per pipelined request.
    pub access_log: Arc<AccessLog>,
    /// Bounds the number of concurrent in-flight requests.
    pub semaphore: Arc<Semaphore>,
    /// Cached value of the semaphore capacity, used in error messages.
    pub concurrency_limit: usize,
}

/// Accepts connections on `listener` and dispatches them through the
/// gateway pipeline using the given `client` and shared `state`.
/// Generic over the client connector type so tests can substitute their
/// own.
///
/// Runs until `shutdown` resolves, then stops accepting new connections
/// and returns. In-flight requests on already-spawned tasks continue to
/// completion independently.
///
/// Requests rejected at the concurrency gate never enter the pipeline:
/// they get a 503 carrying the security header set but no access
/// record.
pub async fn serve<C>(
    listener: TcpListener,
    client: hyper_util::client::legacy::Client<C, BoxBody>,
    state: ServerState,
    shutdown: impl Future<Output = ()>,
) where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let ServerState {
        config,
        limiter,
        verifier,
        access_log,
        semaphore,
        concurrency_limit,
    } = state;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, client_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%e, "failed to accept connection");
                        continue;
                    }
                };

                let client = client.clone();
                let config = Arc::clone(&config);
                let semaphore = Arc::clone(&semaphore);
                let limiter = limiter.clone();
                let verifier = Arc::clone(&verifier);
                let access_log = Arc::clone(&access_log);

                tokio::spawn(async move {
                    let svc = service_fn(move |req: hyper::Request<Incoming>| {
                        let client = client.clone();
                        let config = Arc::clone(&config);
                        let semaphore = Arc::clone(&semaphore);
                        let limiter = limiter.clone();
                        let verifier = Arc::clone(&verifier);
                        let access_log = Arc::clone(&access_log);
                        async move {
                            let _permit = match semaphore.try_acquire() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        limit = concurrency_limit,
                                        "concurrency limit reached, rejecting request"
                                    );
                                    let mut response = GatewayError::Overloaded {
                                        limit: concurrency_limit,
                                    }
                                    .into_response();
                                    config.security_headers.apply(response.headers_mut());
                                    return Ok::<Response<BoxBody>, std::convert::Infallible>(
                                        response,
                                    );
                                }
                            };

                            let response = handle_request(
                                req,
                                client,
                                config,
                                limiter.as_ref(),
                                verifier.as_ref(),
                                &access_log,
                                client_addr,
                            )
                            .await;
                            Ok::<Response<BoxBody>, std::convert::Infallible>(response)
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        warn!(%e, "connection error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutting down, no longer accepting connections");
                break;
            }
        }
    }
}

/// Awaits a shutdown signal (SIGINT or SIGTERM on Unix, Ctrl+C on all
/// platforms). Returns once the first signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, initiating graceful shutdown");
    }
}
