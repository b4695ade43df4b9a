//! Event emitter abstraction for decoupling the notifier from transport.
//!
//! The change notifier depends on the [`EventEmitter`] trait rather than on
//! the session registry, enabling testing and alternative fan-out targets.

use super::BroadcastEvent;
use crate::mpd::{Record, StateSnapshot};

/// Trait for emitting daemon state updates without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct Notifier {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl Notifier {
///     fn on_status(&self, snapshot: StateSnapshot) {
///         self.emitter.emit_status(snapshot);
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits one event to every current subscriber.
    fn emit(&self, event: BroadcastEvent);

    /// Emits a fresh `status` snapshot.
    fn emit_status(&self, snapshot: StateSnapshot) {
        self.emit(BroadcastEvent::Status(snapshot));
    }

    /// Emits the current song.
    fn emit_current_song(&self, song: Record) {
        self.emit(BroadcastEvent::CurrentSong(song));
    }

    /// Emits the play queue.
    fn emit_playlist(&self, tracks: Vec<Record>) {
        self.emit(BroadcastEvent::Playlist(tracks));
    }

    /// Emits the database file listing.
    fn emit_files(&self, files: Vec<String>) {
        self.emit(BroadcastEvent::Files(files));
    }
}
