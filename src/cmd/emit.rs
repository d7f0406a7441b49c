//! Producer commands: `agentboard emit` and `agentboard status`.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use agentboard::relay::client::RelayClient;
use agentboard::relay::models::{NewEvent, StatusKind};

pub async fn cmd_emit(
    server_url: &str,
    event_type: String,
    agent: Option<String>,
    project: Option<String>,
    message: Option<String>,
    metadata: Option<String>,
) -> Result<()> {
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).context("--metadata must be valid JSON")?,
        None => json!({}),
    };
    let mut event = NewEvent::new(event_type)
        .message(message.unwrap_or_default())
        .metadata(metadata);
    event.agent_name = agent;
    event.project_name = project;

    let client = RelayClient::new(server_url)?;
    let stored = client.post_event(&event).await?;
    match stored.id {
        Some(id) => println!("Event {} created ({})", id, stored.event_type),
        None => println!("Event created ({})", stored.event_type),
    }
    Ok(())
}

pub async fn cmd_status(server_url: &str, kind: StatusKind, payload: Value) -> Result<()> {
    let client = RelayClient::new(server_url)?;
    let delivered = client.post_status(kind, &payload).await?;
    println!(
        "{} status sent to {} subscriber(s)",
        kind.as_str(),
        delivered
    );
    Ok(())
}
