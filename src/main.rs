use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portcullis::access_log::AccessLog;
use portcullis::{
    Config, FixedWindowLimiter, HttpSessionVerifier, NullVerifier, ServerState, SessionVerifier,
    build_client, serve, shutdown_signal,
};

const CONFIG_FILE_PATH: &str = "./Config.yml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_FILE_PATH.into());

    let config = Config::load_from_file(&config_path)
        .and_then(|c| c.into_runtime())
        .unwrap_or_else(|e| {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        });
    let config = Arc::new(config);

    let limiter = config
        .rate_limit
        .as_ref()
        .map(FixedWindowLimiter::from_config)
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        });

    let verifier: Arc<dyn SessionVerifier> = match &config.session.verify_uri {
        Some(uri) => Arc::new(HttpSessionVerifier::new(
            uri.clone(),
            config.session.cookie_name.clone(),
            config.session.timeout,
        )),
        None => {
            warn!("no session verify endpoint configured; treating every request as unauthenticated");
            Arc::new(NullVerifier)
        }
    };

    let listener = TcpListener::bind(config.listen).await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to bind {}: {e}", config.listen);
        std::process::exit(1);
    });

    let client = build_client(&config);
    let state = ServerState {
        config: Arc::clone(&config),
        limiter,
        verifier,
        access_log: Arc::new(AccessLog::stdout()),
        semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
        concurrency_limit: config.max_concurrent_requests,
    };

    info!(
        listen = %config.listen,
        origin = %config.origin,
        root_domain = config.classifier.root_domain(),
        tenants = config.routes.enabled_tenants().len(),
        "gateway listening"
    );

    serve(listener, client, state, shutdown_signal()).await;
}
