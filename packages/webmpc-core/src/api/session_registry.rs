//! Session tracking and broadcast fan-out.
//!
//! - [`SessionRegistry`]: every live session, its outbound queue and its
//!   cancellation token
//! - [`SessionGuard`]: RAII handle that unregisters the session on drop
//!
//! Broadcasting never awaits: each session has a bounded queue and a session
//! that cannot keep up is dropped rather than allowed to stall the others.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::events::{BroadcastEvent, DiagnosticLog, EventEmitter};

/// Opaque, process-unique session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Receiving end of a session's broadcast queue.
pub type SessionOutbox = mpsc::Receiver<Utf8Bytes>;

struct SessionEntry {
    outbox: mpsc::Sender<Utf8Bytes>,
    cancel: CancellationToken,
}

/// All live sessions.
///
/// Thread-safe; registration, removal and broadcast each touch the map only
/// for short, non-awaiting sections.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    next_id: AtomicU64,
    /// Parent of every session token. Stays cancelled after
    /// [`close_all`](Self::close_all).
    global_cancel: CancellationToken,
    queue_capacity: usize,
    log: DiagnosticLog,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize, log: DiagnosticLog) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: CancellationToken::new(),
            queue_capacity: queue_capacity.max(1),
            log,
        }
    }

    /// Registers a session.
    ///
    /// Returns the guard that unregisters it on drop and the queue its
    /// broadcasts arrive on. After [`close_all`](Self::close_all) the guard's
    /// token is already cancelled and the session is never listed.
    pub fn register(self: &Arc<Self>) -> (SessionGuard, SessionOutbox) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.global_cancel.child_token();
        let (outbox, rx) = mpsc::channel(self.queue_capacity);

        let guard = SessionGuard {
            id,
            registry: Arc::clone(self),
            cancel: cancel.clone(),
        };
        if cancel.is_cancelled() {
            log::debug!("[Sessions] {} refused, registry closed", id);
            return (guard, rx);
        }

        self.sessions.insert(id, SessionEntry { outbox, cancel });
        // close_all ran between the check and the insert.
        if self.global_cancel.is_cancelled() {
            self.sessions.remove(&id);
            return (guard, rx);
        }
        self.log.info(format!(
            "[Sessions] {} registered (total: {})",
            id,
            self.sessions.len()
        ));
        (guard, rx)
    }

    /// Removes a session. Unknown ids are ignored.
    pub fn unregister(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            self.log.info(format!(
                "[Sessions] {} unregistered (remaining: {})",
                id,
                self.sessions.len()
            ));
        }
    }

    /// Removes a session that cannot keep up and signals its task to stop.
    fn evict(&self, id: SessionId) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            entry.cancel.cancel();
            self.log
                .warn(format!("[Sessions] {}", BridgeError::Capacity(id.to_string())));
        }
    }

    /// Queues `event` for every session live right now.
    ///
    /// The event is serialized once. Sessions whose queue is full are
    /// evicted; sessions whose task already ended are unregistered.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn broadcast(&self, event: &BroadcastEvent) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                log::error!("[Sessions] Failed to serialize {}: {}", event.kind(), e);
                return 0;
            }
        };

        let targets: Vec<(SessionId, mpsc::Sender<Utf8Bytes>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().outbox.clone()))
            .collect();

        let mut delivered = 0;
        for (id, outbox) in targets {
            match outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => self.evict(id),
                Err(TrySendError::Closed(_)) => self.unregister(id),
            }
        }
        log::debug!(
            "[Sessions] Broadcast {} to {} session(s)",
            event.kind(),
            delivered
        );
        delivered
    }

    /// Signals every session to close and refuses sessions registered later.
    ///
    /// Returns the number of sessions signalled.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        self.global_cancel.cancel();
        if count > 0 {
            self.log
                .info(format!("[Sessions] Closing {} session(s)", count));
        }
        count
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl EventEmitter for SessionRegistry {
    fn emit(&self, event: BroadcastEvent) {
        self.broadcast(&event);
    }
}

/// RAII guard that unregisters a session when dropped.
pub struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Cancelled when the session is evicted or the bridge shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
