//! Relay server commands: `agentboard serve` and `agentboard init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use agentboard::config::AppConfig;
use agentboard::relay::db::DashboardDb;
use agentboard::relay::server::{self, ServerConfig};

pub async fn cmd_serve(
    config: &AppConfig,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
) -> Result<()> {
    let mut server_config = ServerConfig::from(config);
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    if let Some(db_path) = db_path {
        server_config.db_path = db_path;
    }

    server::start_server(server_config).await
}

pub fn cmd_init(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    DashboardDb::new(db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
