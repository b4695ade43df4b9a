//! Centralized error types for the webmpc core library.
//!
//! This module provides the bridge-wide error taxonomy:
//! - [`BridgeError`] for everything the bridge surfaces to callers and sessions
//! - [`ErrorCode`] for stable machine-readable codes sent to sessions
//!
//! Daemon-level protocol failures are defined next to the parser in
//! [`crate::mpd::protocol`] and wrapped here.

use thiserror::Error;

use crate::mpd::protocol::ProtocolError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for session replies.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Ack(_) => "daemon_ack",
            Self::Malformed(_) => "malformed_response",
            Self::InvalidCommand(_) => "invalid_command",
        }
    }
}

/// Bridge-wide error type.
///
/// Errors are `Clone` because one link failure fans out to every queued
/// command; I/O errors are therefore captured as their rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The daemon could not be reached (socket failure, bad greeting).
    #[error("Cannot connect to daemon at {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The daemon rejected the configured credential.
    #[error("Daemon rejected credential: {0}")]
    Auth(String),

    /// Malformed or unexpected daemon response, or a daemon `ACK`.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Transient failure during an operation, or the link is recovering.
    #[error("Daemon link unavailable: {0}")]
    Link(String),

    /// A session sent a message that could not be turned into a command.
    #[error("Invalid session message: {0}")]
    Session(String),

    /// A session's delivery queue overflowed and the session was dropped.
    #[error("Session {0} delivery queue is full")]
    Capacity(String),

    /// Invalid bridge configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Returns true if the error leaves the daemon link unusable.
    ///
    /// Command-local failures (a daemon `ACK`, a rejected command line) keep
    /// the connection healthy; everything else requires a reconnect.
    #[must_use]
    pub fn breaks_link(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::Ack(_)) | Self::Protocol(ProtocolError::InvalidCommand(_)) => {
                false
            }
            Self::Protocol(ProtocolError::Malformed(_))
            | Self::Connect { .. }
            | Self::Auth(_)
            | Self::Link(_) => true,
            Self::Session(_) | Self::Capacity(_) | Self::Config(_) => false,
        }
    }

    /// Builds a [`BridgeError::Link`] from an I/O-level failure.
    pub(crate) fn link(err: impl std::fmt::Display) -> Self {
        Self::Link(err.to_string())
    }
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect_error",
            Self::Auth(_) => "auth_error",
            Self::Protocol(inner) => inner.code(),
            Self::Link(_) => "link_error",
            Self::Session(_) => "session_error",
            Self::Capacity(_) => "capacity_error",
            Self::Config(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for bridge-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
