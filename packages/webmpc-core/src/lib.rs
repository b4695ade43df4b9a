//! webmpc core - one MPD connection shared by many browser sessions.
//!
//! The bridge keeps a single long-lived connection to a Music Player Daemon
//! and multiplexes it across any number of WebSocket sessions. Commands from
//! every session are serialized onto the connection; changes the daemon
//! reports through `idle` are re-queried and pushed to all sessions.
//!
//! # Architecture
//!
//! - [`mpd`]: daemon wire protocol and the exclusively owned [`DaemonLink`]
//! - [`services`]: the command serializer, its link worker, and the change
//!   notifier
//! - [`api`]: session registry, message translation and the WebSocket handler
//! - [`events`]: broadcast events and the diagnostic log stream
//! - [`bridge`]: the [`Bridge`] facade that wires everything together
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`CommandExecutor`](mpd::CommandExecutor): runs one daemon command
//! - [`EventEmitter`](events::EventEmitter): fans out state updates

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod mpd;
pub mod protocol_constants;
pub mod services;

// Re-export commonly used types at the crate root
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ErrorCode};
pub use events::{BroadcastEvent, DiagnosticLog, EventEmitter, LogEvent, LogLevel};
pub use mpd::{AckError, ChangeSet, DaemonLink, LinkState, ProtocolError, Record, Response, StateSnapshot};

// Re-export API types
pub use api::{router, SessionId, SessionRegistry};
