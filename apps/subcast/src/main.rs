use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subcast::config::Config;
use subcast::subscriptions::PassthroughExecutor;
use subcast::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("invalid configuration");
    let port = config.port;

    tracing::info!(
        storage = config.storage.driver.name(),
        backend = ?config.storage.backend,
        broadcaster = %config.broadcaster.driver,
        iterator = ?config.delivery.iterator,
        fields = ?config.definitions.fields,
        "subcast configured"
    );

    if config.definitions.fields.is_empty() {
        tracing::warn!("SUBSCRIPTIONS_FIELDS is empty; every subscription field will be unknown");
    }

    // No schema is linked into the standalone server; embedders pass their own executor.
    let state = AppState::connect(config, Arc::new(PassthroughExecutor))
        .await
        .expect("failed to initialise subscription state");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let subscriptions = state.subscriptions.clone();

    let app = Router::new()
        .merge(subcast::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "subcast listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Requests have stopped; let broadcasts they queued finish delivering.
    let outstanding = subscriptions.drain_queued().await;
    tracing::info!(outstanding, "queued broadcasts drained");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
}
