//! Change notification service.
//!
//! Responsibilities:
//! - Mapping the subsystems of an `idle` [`ChangeSet`] to refresh queries
//! - Running those queries in the link's own execution slot
//! - Emitting the fresh state to every session
//!
//! A cycle whose queries do not all succeed broadcasts nothing.
//!
//! Queries never go through the session queue: the notifier is called by the
//! link worker between commands, so it already holds the connection.

use std::sync::Arc;

use crate::error::BridgeError;
use crate::events::{DiagnosticLog, EventEmitter};
use crate::mpd::{ChangeSet, CommandExecutor, Record, Response, StateSnapshot};
use crate::protocol_constants::FILE_KEY;

/// Which queries one change cycle needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub status: bool,
    pub current_song: bool,
    pub playlist: bool,
    pub files: bool,
}

impl RefreshPlan {
    /// Maps changed subsystems to the queries that observe them.
    ///
    /// Subsystems no session view depends on (`output`, `sticker`,
    /// `message`, ...) map to nothing.
    pub fn for_changes(changes: &ChangeSet) -> Self {
        let mut plan = Self::default();
        for subsystem in changes.iter() {
            match subsystem {
                "player" => {
                    plan.status = true;
                    plan.current_song = true;
                }
                "mixer" | "options" => plan.status = true,
                "playlist" => {
                    plan.playlist = true;
                    plan.status = true;
                }
                "database" | "update" => plan.files = true,
                other => log::trace!("[Notifier] Ignoring subsystem {}", other),
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Query results of one change cycle.
#[derive(Default)]
struct Fresh {
    playlist: Option<Vec<Record>>,
    files: Option<Vec<String>>,
    status: Option<StateSnapshot>,
    current_song: Option<Record>,
}

/// Turns daemon change reports into broadcasts.
pub struct ChangeNotifier {
    emitter: Arc<dyn EventEmitter>,
    log: DiagnosticLog,
}

impl ChangeNotifier {
    pub fn new(emitter: Arc<dyn EventEmitter>, log: DiagnosticLog) -> Self {
        Self { emitter, log }
    }

    /// Refreshes and broadcasts everything `changes` affects.
    ///
    /// Every query runs before anything is emitted, so a cycle either
    /// broadcasts all of its events or none. A failed query is logged and
    /// cancels the cycle's broadcast; the next change cycle starts afresh.
    /// Events go out in a fixed order: Playlist, Files, Status, CurrentSong.
    ///
    /// Returns the number of events emitted.
    pub async fn refresh<E>(&self, exec: &mut E, changes: &ChangeSet) -> usize
    where
        E: CommandExecutor + ?Sized,
    {
        let plan = RefreshPlan::for_changes(changes);
        if plan.is_empty() {
            return 0;
        }
        log::debug!("[Notifier] Changes {} -> {:?}", changes, plan);

        let fresh = match self.gather(exec, &plan).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.log.warn(format!(
                    "[Notifier] No broadcast for changes {}: {}",
                    changes, e
                ));
                return 0;
            }
        };

        let mut emitted = 0;
        if let Some(tracks) = fresh.playlist {
            self.emitter.emit_playlist(tracks);
            emitted += 1;
        }
        if let Some(files) = fresh.files {
            self.emitter.emit_files(files);
            emitted += 1;
        }
        if let Some(status) = fresh.status {
            self.emitter.emit_status(status);
            emitted += 1;
        }
        if let Some(song) = fresh.current_song {
            self.emitter.emit_current_song(song);
            emitted += 1;
        }
        emitted
    }

    /// Runs the plan's queries, stopping at the first failure.
    async fn gather<E>(&self, exec: &mut E, plan: &RefreshPlan) -> Result<Fresh, BridgeError>
    where
        E: CommandExecutor + ?Sized,
    {
        let mut fresh = Fresh::default();
        if plan.playlist {
            fresh.playlist = Some(self.query(exec, "playlistinfo").await?.into_records(FILE_KEY));
        }
        if plan.files {
            let listing = self.query(exec, "listall").await?;
            fresh.files = Some(listing.values(FILE_KEY).map(str::to_string).collect());
        }
        if plan.status {
            fresh.status = Some(self.query(exec, "status").await?.into_record());
        }
        if plan.current_song {
            fresh.current_song = Some(self.query(exec, "currentsong").await?.into_record());
        }
        Ok(fresh)
    }

    async fn query<E>(&self, exec: &mut E, command: &str) -> Result<Response, BridgeError>
    where
        E: CommandExecutor + ?Sized,
    {
        exec.execute(command).await.map_err(|e| {
            self.log
                .warn(format!("[Notifier] Refresh query {} failed: {}", command, e));
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeResult;
    use crate::events::BroadcastEvent;
    use crate::mpd::{AckError, ProtocolError};
    use crate::protocol_constants::ACK_ERROR_PERMISSION;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Executor answering from a fixed table and recording what was asked.
    struct ScriptedExecutor {
        replies: HashMap<&'static str, BridgeResult<Response>>,
        asked: Vec<String>,
    }

    impl ScriptedExecutor {
        fn new(replies: Vec<(&'static str, BridgeResult<Response>)>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                asked: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(&mut self, command: &str) -> BridgeResult<Response> {
            self.asked.push(command.to_string());
            self.replies
                .get(command)
                .cloned()
                .unwrap_or_else(|| Ok(Response::default()))
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<BroadcastEvent>>,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit(&self, event: BroadcastEvent) {
            self.events.lock().push(event);
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Response {
        Response::new(
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn notifier() -> (ChangeNotifier, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::default());
        let notifier = ChangeNotifier::new(
            Arc::clone(&emitter) as Arc<dyn EventEmitter>,
            DiagnosticLog::new(16),
        );
        (notifier, emitter)
    }

    #[test]
    fn plan_maps_subsystems() {
        let plan = RefreshPlan::for_changes(&ChangeSet::from_iter(["mixer"]));
        assert_eq!(
            plan,
            RefreshPlan {
                status: true,
                ..Default::default()
            }
        );

        let plan = RefreshPlan::for_changes(&ChangeSet::from_iter(["player", "database"]));
        assert!(plan.status && plan.current_song && plan.files && !plan.playlist);

        assert!(RefreshPlan::for_changes(&ChangeSet::from_iter(["sticker"])).is_empty());
    }

    #[tokio::test]
    async fn mixer_change_broadcasts_new_volume() {
        let (notifier, emitter) = notifier();
        let mut exec = ScriptedExecutor::new(vec![(
            "status",
            Ok(pairs(&[("volume", "80"), ("state", "play")])),
        )]);

        let emitted = notifier
            .refresh(&mut exec, &ChangeSet::from_iter(["mixer"]))
            .await;

        assert_eq!(emitted, 1);
        assert_eq!(exec.asked, vec!["status"]);
        let events = emitter.events.lock();
        match &events[0] {
            BroadcastEvent::Status(snapshot) => assert_eq!(snapshot["volume"], "80"),
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shared_queries_run_once_in_stable_order() {
        let (notifier, emitter) = notifier();
        let mut exec = ScriptedExecutor::new(vec![(
            "playlistinfo",
            Ok(pairs(&[("file", "a.mp3"), ("Id", "1"), ("file", "b.mp3"), ("Id", "2")])),
        )]);

        notifier
            .refresh(
                &mut exec,
                &ChangeSet::from_iter(["player", "playlist", "mixer", "database"]),
            )
            .await;

        assert_eq!(
            exec.asked,
            vec!["playlistinfo", "listall", "status", "currentsong"]
        );
        let kinds: Vec<&str> = emitter.events.lock().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["Playlist", "Files", "Status", "CurrentSong"]);
        match &emitter.events.lock()[0] {
            BroadcastEvent::Playlist(tracks) => assert_eq!(tracks.len(), 2),
            other => panic!("expected playlist, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn failed_query_suppresses_the_whole_cycle() {
        let (notifier, emitter) = notifier();
        let ack = AckError {
            code: ACK_ERROR_PERMISSION,
            index: 0,
            command: "listall".into(),
            message: "you don't have permission".into(),
        };
        let mut exec = ScriptedExecutor::new(vec![
            ("playlistinfo", Ok(pairs(&[("file", "a.flac")]))),
            ("listall", Err(ProtocolError::Ack(ack).into())),
            ("status", Ok(pairs(&[("state", "stop")]))),
        ]);

        let emitted = notifier
            .refresh(&mut exec, &ChangeSet::from_iter(["database", "playlist"]))
            .await;

        assert_eq!(emitted, 0);
        assert!(emitter.events.lock().is_empty());
        assert_eq!(exec.asked, vec!["playlistinfo", "listall"]);

        // The next cycle is unaffected.
        let emitted = notifier
            .refresh(&mut exec, &ChangeSet::from_iter(["options"]))
            .await;
        assert_eq!(emitted, 1);
        let kinds: Vec<&str> = emitter.events.lock().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["Status"]);
    }

    #[tokio::test]
    async fn link_failure_abandons_the_cycle() {
        let (notifier, emitter) = notifier();
        let mut exec = ScriptedExecutor::new(vec![(
            "playlistinfo",
            Err(BridgeError::Link("connection reset".into())),
        )]);

        let emitted = notifier
            .refresh(&mut exec, &ChangeSet::from_iter(["playlist"]))
            .await;

        assert_eq!(emitted, 0);
        assert_eq!(exec.asked, vec!["playlistinfo"]);
        assert!(emitter.events.lock().is_empty());
    }
}
