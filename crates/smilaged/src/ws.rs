//! `/ws/video`: one capture session per connection.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use smilage_engine::messages::{messages_for, ControlMessage};
use smilage_engine::session::run_camera;
use smilage_engine::{CaptureSession, FrameReport, SessionControls, SessionError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound frames buffered ahead of a slow client. The capture loop blocks
/// when this fills, which paces it to the socket.
const WS_SEND_BUFFER_SIZE: usize = 4;

pub async fn ws_video(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("video client connected");

    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(WS_SEND_BUFFER_SIZE);
    let controls = Arc::new(SessionControls::new(state.config.smile_threshold));

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut capture = {
        let state = state.clone();
        let controls = Arc::clone(&controls);
        tokio::task::spawn_blocking(move || run_capture(&state, controls, tx))
    };

    let mut capture_done = false;
    loop {
        tokio::select! {
            result = &mut capture => {
                log_capture_exit(result);
                capture_done = true;
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(command) = ControlMessage::parse(&text) {
                        command.apply(&controls);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "websocket receive failed");
                    break;
                }
            },
        }
    }

    controls.stop();
    if !capture_done {
        log_capture_exit(capture.await);
    }
    let _ = send_task.await;

    tracing::info!("video client disconnected");
}

/// Runs on a blocking thread for the life of the connection.
fn run_capture(
    state: &AppState,
    controls: Arc<SessionControls>,
    tx: mpsc::Sender<String>,
) -> Result<(), SessionError> {
    let mut session =
        CaptureSession::from_config(&state.config, Arc::clone(&state.models), controls)?;
    run_camera(&mut session, &state.config, |report| forward(&tx, &report))
}

/// Queue the messages for one frame. Returns false once the client is gone.
fn forward(tx: &mpsc::Sender<String>, report: &FrameReport) -> bool {
    let messages = match messages_for(report) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode frame");
            return true;
        }
    };

    for message in messages {
        match message.to_json() {
            Ok(json) => {
                if tx.blocking_send(json).is_err() {
                    return false;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize message"),
        }
    }
    true
}

fn log_capture_exit(result: Result<Result<(), SessionError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => tracing::debug!("capture session ended"),
        Ok(Err(e)) => tracing::error!(error = %e, "capture session failed"),
        Err(e) => tracing::error!(error = %e, "capture thread panicked"),
    }
}
