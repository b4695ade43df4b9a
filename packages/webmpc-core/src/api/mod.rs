//! WebSocket API layer.
//!
//! Thin handlers that delegate to the bridge's services: the session
//! registry tracks who is connected, the message module translates frames,
//! and the command queue does the rest.

use axum::routing::get;
use axum::Router;

use crate::bridge::Bridge;
use crate::protocol_constants::WS_PATH;

pub mod messages;
pub mod session_registry;
pub mod ws;

pub use messages::{Inbound, ReplyKind, WsIncoming};
pub use session_registry::{SessionGuard, SessionId, SessionOutbox, SessionRegistry};
pub use ws::{dispatch_inbound, handle_session, ws_handler};

/// Builds the session router: the bridge endpoint at `/ws`.
///
/// Hosts merge this with their own routes (static files, health checks).
pub fn router(bridge: Bridge) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .with_state(bridge)
}
