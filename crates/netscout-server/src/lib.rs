//! NetScout HTTP surface
//!
//! Adapts the scanning engine onto axum: JSON endpoints for async tasks
//! and history, an SSE stream for live scans, and a WebSocket channel
//! that carries the pre-scan consent loop. The transport owns nothing --
//! it forwards the scheduler's event stream and maps engine errors onto
//! the wire shape `{error, message, request_id}`.

mod error;
mod routes;
mod ws;

pub use error::ApiError;

use netscout_core::{QueueConfig, Result, ServerConfig};
use netscout_scanner::{MemorySink, ScanEngine, ScanSink, SqliteSink, TaskQueue};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handle behind every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ScanEngine>,
    pub queue: Arc<TaskQueue>,
}

impl AppState {
    pub fn new(engine: Arc<ScanEngine>, queue_config: QueueConfig) -> Self {
        let queue = Arc::new(TaskQueue::new(Arc::clone(&engine), queue_config));
        Self { engine, queue }
    }
}

/// Build the full API router
pub fn build_router(state: AppState) -> axum::Router {
    routes::api_router(state).layer(TraceLayer::new_for_http())
}

/// Wire the engine from config and serve until shutdown
pub async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;

    let sink: Arc<dyn ScanSink> = match &config.database_path {
        Some(path) => Arc::new(SqliteSink::new(path).await?),
        None => Arc::new(MemorySink::new()),
    };

    let engine = Arc::new(
        ScanEngine::builder()
            .cache(Arc::new(netscout_scanner::ScanCache::new(
                config.cache.clone(),
            )))
            .sink(sink)
            .build(),
    );

    let state = AppState::new(engine, config.queue.clone());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("netscout listening on {}", config.bind);
    axum::serve(listener, router)
        .await
        .map_err(|e| netscout_core::Error::Network(format!("server error: {}", e)))?;
    Ok(())
}
