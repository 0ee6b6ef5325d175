pub mod error;
pub mod handlers;
pub mod session;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use log::info;

use crate::config::AppConfig;
use crate::core::engine::{EngineSettings, ScanEngine};
use crate::modules::SourceRegistry;

pub use error::{ApiError, ApiResult};

/// Shared state behind every route.
pub struct AppState {
    pub engine: ScanEngine,
}

impl AppState {
    pub fn new(engine: ScanEngine) -> Self {
        Self { engine }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let registry = SourceRegistry::from_config(config).context("failed to build source clients")?;
        Ok(Self::new(ScanEngine::new(registry, EngineSettings::from_config(config))))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/scan", post(handlers::scan))
        .route("/host", post(handlers::host))
        .route("/leaks", post(handlers::leaks))
        .route("/{service}/scans", post(handlers::submit_job))
        .route("/{service}/scans/{id}", get(handlers::job_status))
        .route("/{service}/scans/{id}/result", get(handlers::job_result))
        .route_layer(middleware::from_fn(session::require_session));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected);

    Router::new().nest("/api", api).with_state(state)
}

/// Binds `addr` and serves the API until the process is stopped.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("intelscan API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("API server stopped unexpectedly")
}
