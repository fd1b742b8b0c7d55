//! WebSocket scan channel
//!
//! Carries the same event stream as SSE plus the interactive pre-scan
//! consent loop. The client drives with control frames:
//!
//! ```json
//! { "command": "scan", "ports": "22,80,443", "force": false }
//! ```
//!
//! When the gate holds a scan the server forwards `pre_scan_warning` and
//! keeps the socket open; the client resumes by repeating the command
//! with `force: true, consent: true`. Consent is never remembered
//! server-side -- every frame is judged on its own flags.

use crate::routes::{build_request, StreamParams};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use netscout_core::{ChannelSink, ScanEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ControlFrame {
    command: String,
    ports: Option<String>,
    enhanced_service_detection: Option<bool>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    consent: bool,
}

pub(crate) async fn ws_scan(
    State(state): State<AppState>,
    Path(target): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, target))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, target: String) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };

        let frame: ControlFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = send_error(&mut socket, &format!("bad control frame: {}", e)).await;
                continue;
            }
        };

        if frame.command != "scan" {
            let _ = send_error(&mut socket, &format!("unknown command {:?}", frame.command)).await;
            continue;
        }

        let params = StreamParams {
            ports: frame.ports.clone(),
            enhanced_service_detection: frame.enhanced_service_detection,
            force: None,
        };
        let mut request = match build_request(
            &target,
            &params,
            format!("ws scan {}", target),
        ) {
            Ok(request) => request,
            Err(e) => {
                let _ = send_error(&mut socket, &e.message).await;
                continue;
            }
        };
        request.config.force = frame.force;
        request.consent = frame.consent;

        if run_scan(&mut socket, &state, request).await.is_err() {
            // Socket gone; nothing left to do
            return;
        }
        // Gate suspensions fall through here: the loop waits for the
        // client's consent frame on the same socket
    }
    debug!("websocket for {} closed", target);
}

/// Run one scan attempt, forwarding events until the stream drains
///
/// Returns `Err(())` only when the socket itself is dead.
async fn run_scan(
    socket: &mut WebSocket,
    state: &AppState,
    request: netscout_scanner::ScanRequest,
) -> Result<(), ()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ScanEvent>();
    let sink = Arc::new(ChannelSink::new(tx));
    let cancel = CancellationToken::new();

    let engine = Arc::clone(&state.engine);
    let scan_cancel = cancel.clone();
    let scan = tokio::spawn(async move {
        let outcome = engine.scan(request, sink, scan_cancel).await;
        if let Err(e) = &outcome {
            debug!("websocket scan ended: {}", e);
        }
        outcome
    });

    let socket_alive = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    let data = serde_json::to_string(&event)
                        .unwrap_or_else(|_| "{}".to_string());
                    if socket.send(Message::Text(data.into())).await.is_err() {
                        cancel.cancel();
                        break false;
                    }
                }
                // Engine finished and dropped its sink
                None => break true,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    cancel.cancel();
                    break false;
                }
                // Interim frames during a running scan are ignored
                Some(Ok(_)) => {}
            },
        }
    };

    let _ = scan.await;
    if socket_alive {
        Ok(())
    } else {
        Err(())
    }
}

async fn send_error(socket: &mut WebSocket, message: &str) -> Result<(), axum::Error> {
    let event = ScanEvent::ScanError {
        message: message.to_string(),
    };
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(data.into())).await
}
