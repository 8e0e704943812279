//! WebSocket Signaling Relay Library
//!
//! A small relay that lets up to four endpoints per room exchange opaque
//! negotiation messages (SDP offers, ICE candidates, ...) to set up a
//! peer-to-peer session. Built with tokio-tungstenite.
//!
//! # Features
//! - Rooms created on first reference, dropped once empty
//! - At most 4 clients per room
//! - Registration of a client id to a live socket, at most once
//! - Best-effort relay to every other client of the room; messages to
//!   clients that have not registered yet are dropped
//! - Eviction of clients that do not register within a timeout
//! - Optional bye notification to a room server on eviction
//!
//! # Architecture
//! Shared state behind short-lived locks:
//! - `RoomRegistry` owns all rooms behind one mutex, held for the whole
//!   of each registry operation so rooms are never dropped while in use
//! - Each `Room` guards its clients with its own mutex, taken after the
//!   registry's; eviction timers take only the room lock for their check
//! - Messages are written through per-socket channels after every lock
//!   is released, so a slow socket never stalls a room
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//! use signal_relay::{serve, Dashboard, RegistryConfig, RoomRegistry, SessionContext};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let ctx = SessionContext {
//!         registry: RoomRegistry::new(RegistryConfig::default()),
//!         dashboard: Arc::new(Dashboard::new()),
//!         register_timeout: Duration::from_secs(10),
//!     };
//!     serve(listener, ctx).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod error;
pub mod handler;
pub mod message;
pub mod notify;
pub mod registry;
pub mod room;
pub mod server;
pub mod timer;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, ClientInstance};
pub use config::Config;
pub use connection::{Connection, Inbox, Outbox};
pub use dashboard::{Dashboard, StatusReport};
pub use error::{AppError, RelayError, SendError};
pub use handler::{handle_connection, SessionContext};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use registry::{RegistryConfig, RoomRegistry, RoomStatus};
pub use room::{EvictionHandler, Room, MAX_ROOM_CAPACITY};
pub use server::{log_status, serve};
pub use timer::EvictionTimer;
pub use types::{ClientId, ConnectionId, RoomId};
