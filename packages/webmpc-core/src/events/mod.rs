//! Event system for real-time session communication.
//!
//! This module provides:
//! - [`BroadcastEvent`], the state updates fanned out to every session
//! - [`EventEmitter`] trait the change notifier emits through
//! - [`DiagnosticLog`], the bridge's human-readable log stream

mod diagnostics;
mod emitter;

pub use diagnostics::{DiagnosticLog, LogEvent, LogLevel};
pub use emitter::EventEmitter;

use serde::Serialize;

use crate::mpd::{Record, StateSnapshot};

/// Events broadcast to sessions.
///
/// Serialized as `{"Type": ..., "Data": ...}`, the envelope the browser UI
/// dispatches on. The same shapes answer the matching session queries, so a
/// client handles a broadcast `Status` and a requested one identically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "Type", content = "Data")]
pub enum BroadcastEvent {
    /// Full `status` snapshot.
    Status(StateSnapshot),

    /// The song currently playing (empty when stopped with an empty queue).
    CurrentSong(Record),

    /// The whole play queue.
    Playlist(Vec<Record>),

    /// Every file path in the database.
    Files(Vec<String>),
}

impl BroadcastEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "Status",
            Self::CurrentSong(_) => "CurrentSong",
            Self::Playlist(_) => "Playlist",
            Self::Files(_) => "Files",
        }
    }
}
