//! JSON and SSE route handlers

use crate::error::ApiError;
use crate::ws;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use netscout_core::{ChannelSink, PortSet, ScanConfig, ScanEvent};
use netscout_scanner::{ScanRequest, ScanSink as _};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub(crate) fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/stream/scan/{target}", get(stream_scan))
        .route("/api/scan", post(submit_scan))
        .route("/api/scan/{task_id}", get(poll_task))
        .route("/api/scans", get(recent_scans))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/ws/scan/{target}", get(ws::ws_scan))
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Query parameters accepted wherever a scan is described inline
#[derive(Debug, Deserialize)]
pub(crate) struct StreamParams {
    pub ports: Option<String>,
    pub enhanced_service_detection: Option<bool>,
    pub force: Option<bool>,
}

/// Default port window when the caller names none
const DEFAULT_PORTS: &str = "1-1000";

pub(crate) fn build_request(
    target: &str,
    params: &StreamParams,
    original_command: String,
) -> Result<ScanRequest, ApiError> {
    let ports = PortSet::parse(params.ports.as_deref().unwrap_or(DEFAULT_PORTS))
        .map_err(ApiError::from)?;
    let mut request = ScanRequest::new(target, ports);
    request.config.enhanced_service_detection = params.enhanced_service_detection.unwrap_or(true);
    if params.force.unwrap_or(false) {
        // On the HTTP surface the force flag carries the consent the
        // WebSocket channel expresses separately
        request.config.force = true;
        request.consent = true;
    }
    request.original_command = Some(original_command);
    Ok(request)
}

async fn stream_scan(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = build_request(
        &target,
        &params,
        format!("GET /api/stream/scan/{}", target),
    )?;
    // Reject bad targets with a 4xx before the stream opens
    state.engine.resolve(&target).await.map_err(ApiError::from)?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx.clone()));
    let engine = Arc::clone(&state.engine);

    tokio::spawn(async move {
        let outcome = engine.scan(request, sink, CancellationToken::new()).await;
        if let Err(e) = outcome {
            // Scheduler-level failures already produced scan_error and the
            // gate produced pre_scan_warning; only pre-stream validation
            // faults still need a frame here
            if e.is_client_error() {
                let _ = tx.send(ScanEvent::ScanError {
                    message: e.to_string(),
                });
            }
            debug!("stream scan ended with error: {}", e);
        }
    });

    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Async scan submission body
#[derive(Debug, Deserialize)]
struct SubmitBody {
    target: String,
    ports: String,
    #[serde(default)]
    config: Option<ScanConfig>,
    #[serde(default)]
    force: Option<bool>,
    #[serde(default)]
    consent: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: Uuid,
    scan_id: Uuid,
    status: &'static str,
}

async fn submit_scan(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let ports = PortSet::parse(&body.ports).map_err(ApiError::from)?;
    let mut request = ScanRequest::new(body.target.clone(), ports);
    if let Some(config) = body.config {
        request.config = config;
    }
    if body.force.unwrap_or(false) {
        request.config.force = true;
    }
    request.consent = body.consent.unwrap_or(false);
    request.original_command = Some(format!("POST /api/scan {}", body.target));

    state.engine.validate(&request).map_err(ApiError::from)?;

    let (task_id, scan_id) = state.queue.submit(request);
    Ok(Json(SubmitResponse {
        task_id,
        scan_id,
        status: "queued",
    }))
}

async fn poll_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<netscout_scanner::TaskRecord>, ApiError> {
    state
        .queue
        .poll(task_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no task {}", task_id)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn recent_scans(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<netscout_scanner::ScanSummary>>, ApiError> {
    let limit = params.limit.unwrap_or(20).min(500);
    let summaries = state
        .engine
        .sink()
        .recent_scans(limit)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(summaries))
}

async fn cache_stats(State(state): State<AppState>) -> Json<netscout_scanner::CacheStats> {
    Json(state.engine.cache().stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use netscout_core::QueueConfig;
    use netscout_scanner::ScanEngine;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let engine = Arc::new(ScanEngine::builder().build());
        AppState::new(engine, QueueConfig::default())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let router = api_router(test_state());
        let response = router
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_cache_stats_shape() {
        let router = api_router(test_state());
        let response = router
            .oneshot(Request::get("/api/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.get("hits").is_some());
        assert!(json.get("misses").is_some());
        assert!(json.get("hit_rate").is_some());
        assert!(json.get("stored").is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_ports() {
        let router = api_router(test_state());
        let body = serde_json::json!({ "target": "127.0.0.1", "ports": "99999" });
        let response = router
            .oneshot(
                Request::post("/api/scan")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_port_spec");
        assert!(json.get("request_id").is_some());
    }

    #[tokio::test]
    async fn test_submit_and_poll_round_trip() {
        let router = api_router(test_state());
        let body = serde_json::json!({
            "target": "127.0.0.1",
            "ports": "56000-56002",
            "config": {
                "timeout_s": 0.25,
                "initial_concurrency": 10,
                "max_concurrency": 50,
                "min_timeout_s": 0.1,
                "enhanced_service_detection": false,
                "adaptive": true,
                "force": false
            }
        });

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/scan")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "queued");
        let task_id = json["task_id"].as_str().unwrap().to_string();

        let response = router
            .oneshot(
                Request::get(format!("/api/scan/{}", task_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.get("state").is_some());
        assert!(json.get("progress").is_some());
    }

    #[tokio::test]
    async fn test_poll_unknown_task_is_404() {
        let router = api_router(test_state());
        let response = router
            .oneshot(
                Request::get(format!("/api/scan/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_rejects_placeholder_target() {
        let router = api_router(test_state());
        let response = router
            .oneshot(
                Request::get("/api/stream/scan/example.com?ports=22")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "placeholder_target");
    }

    #[tokio::test]
    async fn test_recent_scans_empty() {
        let router = api_router(test_state());
        let response = router
            .oneshot(Request::get("/api/scans?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.as_array().unwrap().is_empty());
    }
}
