//! WebSocket handler for browser sessions.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::future::{self, BoxFuture, FutureExt};
use futures::sink::SinkExt;
use futures::stream::{FuturesOrdered, StreamExt};

use super::messages::{render_error, render_reply, to_message, Inbound};
use super::session_registry::SessionId;
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::protocol_constants::WS_SUBPROTOCOL;
use crate::services::{CommandQueue, Origin};

/// Reply to one inbound frame, resolving once its command has run.
pub type ReplyFuture = BoxFuture<'static, Utf8Bytes>;

/// WebSocket upgrade handler.
///
/// Selects the `soap` subprotocol the browser UI asks for. Refuses new
/// sessions once the bridge has shut down.
pub async fn ws_handler(ws: WebSocketUpgrade, State(bridge): State<Bridge>) -> Response {
    if bridge.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "bridge shut down").into_response();
    }
    ws.protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_session(socket, bridge))
        .into_response()
}

/// Turns one inbound text frame into a pending reply.
///
/// The command is submitted before this returns, so frames from one session
/// reach the daemon in arrival order. Frames that cannot be translated are
/// answered locally without touching the daemon.
pub fn dispatch_inbound(commands: &CommandQueue, session: SessionId, text: &str) -> ReplyFuture {
    let parsed = Inbound::parse(text).and_then(|inbound| {
        let command = inbound.to_command()?;
        Ok((inbound.reply_kind(), command))
    });

    match parsed {
        Ok((kind, command)) => {
            let reply = commands.submit(Origin::Session(session), command);
            async move { render_reply(kind, reply.await) }.boxed()
        }
        Err(err) => {
            log::debug!("[WS] {} sent an unusable frame: {}", session, err);
            future::ready(render_error(&err)).boxed()
        }
    }
}

/// Runs one session until the client leaves, the transport fails, or the
/// session is evicted or closed by shutdown.
pub async fn handle_session(socket: WebSocket, bridge: Bridge) {
    let (guard, mut outbox) = bridge.sessions().register();
    let cancel = guard.cancel_token().clone();
    let id = guard.id();
    let commands = bridge.commands().clone();

    let (mut sender, mut receiver) = socket.split();
    if cancel.is_cancelled() {
        log::debug!("[WS] {} arrived after shutdown", id);
        drop(guard);
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    let mut replies: FuturesOrdered<ReplyFuture> = FuturesOrdered::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[WS] {} closed by bridge", id);
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    replies.push_back(dispatch_inbound(&commands, id, text.as_str()));
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = BridgeError::Session("binary frames are not supported".into());
                    replies.push_back(future::ready(render_error(&err)).boxed());
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::debug!("[WS] {} disconnected", id);
                    break;
                }
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("[WS] {} receive error: {}", id, e);
                    break;
                }
            },
            Some(frame) = replies.next(), if !replies.is_empty() => {
                if sender.send(to_message(frame)).await.is_err() {
                    log::debug!("[WS] {} send failed", id);
                    break;
                }
            }
            frame = outbox.recv() => match frame {
                Some(frame) => {
                    if sender.send(to_message(frame)).await.is_err() {
                        log::debug!("[WS] {} send failed", id);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Unregister before the (possibly slow) close handshake.
    drop(guard);
    let _ = sender.send(Message::Close(None)).await;
}
