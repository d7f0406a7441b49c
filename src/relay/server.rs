use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::db::{DashboardDb, DbHandle};
use super::hub::Relay;
use super::ingest::EventRecorder;
use super::ws::{self, Keepalive};
use crate::config::AppConfig;

/// Configuration for the relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_permissive: bool,
    pub connection_queue: usize,
    pub keepalive: Keepalive,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            cors_permissive: config.server.cors_permissive,
            connection_queue: config.relay.connection_queue,
            keepalive: Keepalive {
                ping_interval: config.relay.ping_interval(),
                pong_timeout: config.relay.pong_timeout(),
            },
        }
    }
}

/// Build the full application router: REST API plus the `/ws` relay endpoint.
pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database and build the shared state.
pub fn open_state(config: &ServerConfig) -> Result<SharedState> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = DashboardDb::new(&config.db_path).context("Failed to initialize dashboard database")?;
    Ok(state_with_db(db, config))
}

/// Build the shared state around an open database. Starts the event
/// recorder task, so it must run inside a tokio runtime.
pub fn state_with_db(db: DashboardDb, config: &ServerConfig) -> SharedState {
    let db = DbHandle::new(db);
    Arc::new(AppState {
        recorder: EventRecorder::spawn(db.clone()),
        db,
        relay: Arc::new(Relay::new()),
        connection_queue: config.connection_queue,
        keepalive: config.keepalive,
    })
}

/// A bound but not yet running server.
pub struct Server {
    listener: TcpListener,
    app: Router,
    state: SharedState,
}

impl Server {
    /// Bind `config.host:config.port` and prepare the router around `state`.
    pub async fn bind(config: &ServerConfig, state: SharedState) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let app = build_router(state.clone(), config.cors_permissive);
        Ok(Self {
            listener,
            app,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")
    }
}

/// Start the relay server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = open_state(&config)?;
    let server = Server::bind(&config, state).await?;

    let local_addr = server.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %config.db_path.display(),
        "agentboard relay listening"
    );
    println!("agentboard relay running at http://{}", local_addr);

    server.run_until(shutdown_signal()).await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
