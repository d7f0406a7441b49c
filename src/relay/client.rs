//! Subscriber and producer clients for a running relay.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::live::{Applied, LiveStore};
use super::models::{NewEvent, RealtimeEvent, Snapshot, StatusKind};
use super::ws::{ProducerMessage, WsMessage};
use crate::errors::ClientError;

/// HTTP + WebSocket client for one relay server.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    ws_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    /// `server_url` is the HTTP base, e.g. `http://127.0.0.1:3000`.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base_url = server_url.trim().trim_end_matches('/').to_string();
        let ws_url = ws_url_for(&base_url)?;
        Ok(Self {
            base_url,
            ws_url,
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Initial state for a dashboard, fetched once before subscribing.
    pub async fn fetch_snapshot(&self, limit: u32) -> Result<Snapshot, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/snapshot", self.base_url))
            .query(&[("limit", limit)])
            .send()
            .await?;
        read_json(resp).await
    }

    /// Submit an event over HTTP. The relay stores it and broadcasts it.
    pub async fn post_event(&self, event: &NewEvent) -> Result<RealtimeEvent, ClientError> {
        self.post_json("/api/events", event).await
    }

    /// Submit a status update over HTTP. Returns how many subscribers it reached.
    pub async fn post_status(&self, kind: StatusKind, status: &Value) -> Result<u64, ClientError> {
        let path = match kind {
            StatusKind::Agent => "/api/status/agents",
            StatusKind::Project => "/api/status/projects",
        };
        let body: Value = self.post_json(path, status).await?;
        Ok(body["delivered"].as_u64().unwrap_or(0))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }

    /// Open a WebSocket subscription. Only messages broadcast after the
    /// upgrade completes are received.
    pub async fn connect(&self) -> Result<Subscription, ClientError> {
        let (stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(ClientError::Connect)?;
        tracing::debug!(url = %self.ws_url, "Subscribed to relay");
        Ok(Subscription { stream })
    }

    /// Subscribe and feed every message into `store` until the connection ends.
    ///
    /// `connected` is true for the lifetime of the session and false after it;
    /// the event buffer is left as is. No reconnect is attempted.
    pub async fn run<F>(&self, store: &LiveStore, mut on_applied: F) -> Result<(), ClientError>
    where
        F: FnMut(&LiveStore, &Applied),
    {
        let mut subscription = self.connect().await?;
        store.set_connected(true);

        let result = loop {
            match subscription.next_message().await {
                Some(Ok(msg)) => {
                    let applied = store.apply(msg);
                    on_applied(store, &applied);
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };

        store.set_connected(false);
        result
    }
}

fn ws_url_for(base_url: &str) -> Result<String, ClientError> {
    let invalid = |message: &str| ClientError::InvalidUrl {
        url: base_url.to_string(),
        message: message.to_string(),
    };
    let (scheme, rest) = base_url
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let ws_scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("expected http, https, ws or wss")),
    };
    if rest.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok(format!("{}://{}/ws", ws_scheme, rest))
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

/// A live relay subscription.
pub struct Subscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Subscription {
    /// Next relay message. Non-text frames and unrecognised payloads are
    /// skipped; `None` means the connection closed.
    pub async fn next_message(&mut self) -> Option<Result<WsMessage, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(text.as_str()) {
                    Ok(msg) => return Some(Ok(msg)),
                    Err(e) => tracing::debug!(error = %e, "Skipping unrecognised relay frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(ClientError::Transport(e))),
            }
        }
    }

    /// Send a producer frame on this socket.
    pub async fn send(&mut self, msg: &ProducerMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(msg)?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(ClientError::Transport)
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
