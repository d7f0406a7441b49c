//! Real-time event relay for the agent dashboard.
//!
//! ## Overview
//!
//! Producers (agents, automation scripts, the REST API itself) submit events
//! and status changes. The relay stores events in SQLite and fans every
//! message out to all connected WebSocket subscribers. Each subscriber keeps
//! a bounded, most-recent-first buffer of the events it has seen.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP    ┌──────────────────────────────────────────────┐
//! │ Producer │ ────────> │  server.rs  (Router, ServerConfig, Server)   │
//! └──────────┘           │    ├─ api.rs     (REST handlers, AppState)   │
//!                        │    │    └─ ingest.rs (store + EventRecorder) │
//! ┌──────────┐ WebSocket │    └─ ws.rs      (socket loop, WsMessage)    │
//! │Subscriber│ <───────> │         │                                    │
//! │ client.rs│           │         v                                    │
//! │ live.rs  │           │  hub.rs  (Relay: on_connect / publish)       │
//! └──────────┘           │         │                                    │
//!                        │         v                                    │
//!                        │  registry.rs (ConnectionRegistry, sinks)     │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `models`  | Shared types: `RealtimeEvent`, `Agent`, `Project`, `Snapshot` |
//! | `db`      | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)         |
//! | `buffer`  | `EventBuffer`, the fixed-capacity most-recent-first list    |
//! | `live`    | `LiveStore`, a subscriber's buffer plus cached entities     |
//!
//! ## Delivery Rules
//!
//! - A subscriber only receives messages broadcast while it is registered.
//!   Late joiners get history from `GET /api/snapshot`, never from the socket.
//! - Each connection has its own bounded queue. A connection that cannot take
//!   a frame, closed or full, is evicted during that broadcast and its socket
//!   is closed. It never silently misses a frame while registered.
//! - Frames reach a given connection in the order they were broadcast.
//! - Socket-submitted events are stored by one writer task, in arrival order.

pub mod api;
pub mod buffer;
pub mod client;
pub mod db;
pub mod hub;
pub mod ingest;
pub mod live;
pub mod models;
pub mod registry;
pub mod server;
pub mod ws;
