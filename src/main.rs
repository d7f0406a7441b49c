use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use agentboard::config::{AppConfig, DEFAULT_CONFIG_FILE};
use agentboard::relay::models::StatusKind;

mod cmd;

#[derive(Parser)]
#[command(name = "agentboard")]
#[command(version, about = "Real-time event relay for AI agent dashboards")]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server and REST API
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create the database and exit
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print the live event feed of a running relay
    Watch {
        /// Relay base URL
        #[arg(long)]
        url: Option<String>,

        /// Events to load from the snapshot before going live
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Submit an event to a running relay
    Emit {
        /// Event type, e.g. task_started
        #[arg(short = 't', long)]
        event_type: String,

        #[arg(short, long)]
        agent: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(short, long)]
        message: Option<String>,

        /// Arbitrary JSON attached to the event
        #[arg(long)]
        metadata: Option<String>,

        /// Relay base URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Broadcast an agent or project status change
    Status {
        #[command(subcommand)]
        command: StatusCommands,

        /// Relay base URL
        #[arg(long, global = true)]
        url: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum StatusCommands {
    /// Mark an agent active or inactive
    Agent {
        name: String,

        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Set a project's lifecycle status
    Project { name: String, status: String },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "agentboard=debug,tower_http=debug"
    } else {
        "agentboard=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::resolve(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
        } => cmd::cmd_serve(&config, host, port, db_path).await?,
        Commands::Init { db_path } => {
            let db_path = db_path.unwrap_or_else(|| config.server.db_path.clone());
            cmd::cmd_init(&db_path)?;
        }
        Commands::Watch { url, limit } => {
            let url = url.unwrap_or_else(|| config.client.server_url.clone());
            let limit = limit.unwrap_or(config.client.snapshot_limit);
            cmd::cmd_watch(&url, limit, config.client.event_buffer_capacity).await?;
        }
        Commands::Emit {
            event_type,
            agent,
            project,
            message,
            metadata,
            url,
        } => {
            let url = url.unwrap_or_else(|| config.client.server_url.clone());
            cmd::cmd_emit(&url, event_type, agent, project, message, metadata).await?;
        }
        Commands::Status { command, url } => {
            let url = url.unwrap_or_else(|| config.client.server_url.clone());
            let (kind, payload) = match command {
                StatusCommands::Agent { name, active } => {
                    (StatusKind::Agent, json!({"name": name, "is_active": active}))
                }
                StatusCommands::Project { name, status } => {
                    (StatusKind::Project, json!({"name": name, "status": status}))
                }
            };
            cmd::cmd_status(&url, kind, payload).await?;
        }
    }

    Ok(())
}
