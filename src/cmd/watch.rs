//! Live feed viewer for `agentboard watch`.

use anyhow::Result;
use chrono::{DateTime, Local};

use agentboard::relay::client::RelayClient;
use agentboard::relay::live::{Applied, LiveStore};
use agentboard::relay::models::RealtimeEvent;

pub async fn cmd_watch(server_url: &str, snapshot_limit: u32, buffer_capacity: usize) -> Result<()> {
    let client = RelayClient::new(server_url)?;
    let store = LiveStore::new(buffer_capacity);

    let snapshot = client.fetch_snapshot(snapshot_limit).await?;
    store.seed(snapshot);

    let agents = store.agents();
    let active = agents.iter().filter(|a| a.is_active).count();
    println!(
        "{} agents ({} active), {} projects",
        agents.len(),
        active,
        store.projects().len()
    );

    // Oldest first so the newest line ends up at the bottom of the terminal.
    for event in store.events().iter().rev() {
        println!("{}", format_event(event));
    }
    println!("-- live (connected to {}) --", client.ws_url());

    client
        .run(&store, |store, applied| match applied {
            Applied::EventAdded => {
                if let Some(event) = store.lock().events.front() {
                    println!("{}", format_event(event));
                }
            }
            Applied::AgentUpdated(name) => {
                let active = store
                    .agents()
                    .iter()
                    .find(|a| &a.name == name)
                    .map(|a| a.is_active)
                    .unwrap_or_default();
                println!("   agent {} is now {}", name, if active { "active" } else { "inactive" });
            }
            Applied::ProjectUpdated(name) => {
                let status = store
                    .projects()
                    .iter()
                    .find(|p| &p.name == name)
                    .and_then(|p| p.status.clone())
                    .unwrap_or_default();
                println!("   project {} is now {}", name, status);
            }
            Applied::AgentsReplaced => println!("   agent list refreshed"),
            Applied::ProjectsReplaced => println!("   project list refreshed"),
            Applied::Ignored => {}
        })
        .await?;

    println!("-- disconnected, {} events buffered --", store.events().len());
    Ok(())
}

/// One feed line: `[HH:MM:SS] type agent@project: message`.
fn format_event(event: &RealtimeEvent) -> String {
    let time = event
        .created_at
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Local))
        .unwrap_or_else(Local::now)
        .format("%H:%M:%S");

    let source = match (&event.agent_name, &event.project_name) {
        (Some(agent), Some(project)) => format!(" {}@{}", agent, project),
        (Some(agent), None) => format!(" {}", agent),
        (None, Some(project)) => format!(" @{}", project),
        (None, None) => String::new(),
    };

    if event.message.is_empty() {
        format!("[{}] {}{}", time, event.event_type, source)
    } else {
        format!("[{}] {}{}: {}", time, event.event_type, source, event.message)
    }
}
