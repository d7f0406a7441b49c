use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::SharedState;
use super::models::StatusKind;
use super::registry::{ChannelSink, ConnectionId, Frame};

// ── WebSocket message types ──────────────────────────────────────────

/// Frames the relay sends to subscribers.
///
/// Payloads are carried as opaque JSON: the relay forwards whatever the
/// producer submitted without validating it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    NewEvent(Value),
    AgentUpdate(Value),
    ProjectUpdate(Value),
}

impl WsMessage {
    pub fn status(kind: StatusKind, payload: Value) -> Self {
        match kind {
            StatusKind::Agent => Self::AgentUpdate(payload),
            StatusKind::Project => Self::ProjectUpdate(payload),
        }
    }

    /// Wire name of the channel this message travels on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::NewEvent(_) => "new_event",
            Self::AgentUpdate(_) => "agent_update",
            Self::ProjectUpdate(_) => "project_update",
        }
    }
}

/// Frames a producer may send to the relay over the same socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProducerMessage {
    AgentEvent(Value),
    AgentStatus(Value),
    ProjectStatus(Value),
}

/// Ping cadence and dead-peer cutoff for subscriber sockets.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Register the socket with the relay for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Frame>(state.connection_queue);
    let id = state.relay.next_connection_id();
    state.relay.on_connect(id, Arc::new(ChannelSink::new(tx)));

    run_socket_loop(id, sender, receiver, rx, &state).await;

    state.relay.on_disconnect(id);
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards queued relay frames, dispatches producer frames, and pings the
/// peer every [`Keepalive::ping_interval`]. If no Pong arrives within
/// [`Keepalive::pong_timeout`] the connection is considered dead.
async fn run_socket_loop(
    id: ConnectionId,
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<Frame>,
    state: &SharedState,
) {
    let keepalive = state.keepalive;
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > keepalive.pong_timeout {
                    tracing::info!(connection = id, "No pong received, dropping subscriber");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    // Evicted from the registry.
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_producer_frame(state, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection = id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

/// Dispatch one text frame received from a producer.
///
/// `agent_event` is broadcast verbatim before anything else happens, then
/// queued on the state's recorder for storage. Frames that do not parse are
/// ignored.
pub(crate) fn handle_producer_frame(state: &SharedState, text: &str) {
    let msg: ProducerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognised producer frame");
            return;
        }
    };

    match msg {
        ProducerMessage::AgentEvent(event) => {
            state.relay.on_producer_event(event.clone());
            state.recorder.record(event);
        }
        ProducerMessage::AgentStatus(status) => {
            state.relay.on_status_update(StatusKind::Agent, status);
        }
        ProducerMessage::ProjectStatus(status) => {
            state.relay.on_status_update(StatusKind::Project, status);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
