//! WebSocket stream: relays the broadcast channel to the client and
//! accepts a small set of inbound client messages (`identify`,
//! `voice_command`). A heartbeat keeps idle connections alive.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SNOOZE_MINUTES: u32 = 10;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Identify {
        user_id: String,
    },
    VoiceCommand {
        command_type: VoiceCommandType,
        task_id: Option<Uuid>,
        minutes: Option<u32>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum VoiceCommandType {
    StartTask,
    CompleteTask,
    SnoozeReminder,
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut outbound = state.outbound.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = outbound.recv() => {
                match event {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client fell behind the event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                let ping = json!({ "type": "heartbeat", "timestamp": chrono::Utc::now().to_rfc3339() });
                if socket.send(Message::Text(ping.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_client_message(&text, &state).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatches `voice_command` the same way the REST surface handles its
/// `start`/`complete` task transitions and snoozing, via the shared
/// [`AppState`] methods — a voice assistant and the HTTP client end up
/// at the same kernel operation.
async fn handle_client_message(raw: &str, state: &Arc<AppState>) {
    match serde_json::from_str::<ClientMessage>(raw) {
        Ok(ClientMessage::Identify { user_id }) => {
            debug!(user_id, "websocket client identified");
        }
        Ok(ClientMessage::VoiceCommand { command_type, task_id, minutes }) => {
            let Some(task_id) = task_id else {
                debug!(?command_type, "voice command missing task_id, ignoring");
                return;
            };

            let result = match command_type {
                VoiceCommandType::StartTask => state.start_task(task_id).await.map(|_| ()),
                VoiceCommandType::CompleteTask => state.complete_task(task_id).await.map(|_| ()),
                VoiceCommandType::SnoozeReminder => {
                    state.snooze_task(task_id, minutes.unwrap_or(DEFAULT_SNOOZE_MINUTES)).await.map(|_| ())
                }
            };

            if let Err(err) = result {
                warn!(error = %err, task_id = %task_id, ?command_type, "voice command failed");
            }
        }
        Err(err) => {
            debug!(error = %err, raw, "ignoring malformed websocket client message");
        }
    }
}
