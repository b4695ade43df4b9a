//! Bridge facade and service wiring.
//!
//! [`Bridge::start`] is the composition root: it builds the diagnostic log,
//! the session registry, the daemon link and its worker, and wires the
//! change notifier to broadcast through the registry. Hosts hold a cloneable
//! [`Bridge`] handle and mount [`Bridge::router`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::api::{self, SessionRegistry};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{DiagnosticLog, EventEmitter, LogEvent};
use crate::mpd::{DaemonLink, LinkState, Response};
use crate::protocol_constants::SHUTDOWN_GRACE_MS;
use crate::services::{ChangeNotifier, CommandQueue, LinkWorker, Origin, PendingReply};

struct BridgeInner {
    config: BridgeConfig,
    commands: CommandQueue,
    sessions: Arc<SessionRegistry>,
    log: DiagnosticLog,
    link_state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        // Last handle gone without shutdown(): stop the worker anyway.
        self.cancel.cancel();
    }
}

/// Handle to a running bridge. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Starts the bridge and connects to the daemon.
    ///
    /// An unreachable daemon is not fatal: the failure is logged and the
    /// link worker keeps retrying with backoff.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an invalid configuration and
    /// [`BridgeError::Auth`] when the daemon rejects the credential.
    pub async fn start(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;

        let log = DiagnosticLog::new(config.log_capacity);
        let sessions = Arc::new(SessionRegistry::new(config.session_queue_capacity, log.clone()));

        let mut link = DaemonLink::new(&config, log.clone());
        let link_state = link.watch_state();
        match link.connect().await {
            Ok(()) => {}
            Err(err @ BridgeError::Auth(_)) => {
                log.error(format!("[Bridge] {}", err));
                return Err(err);
            }
            Err(err) => {
                log.warn(format!("[Bridge] Initial connect failed, will retry: {}", err));
            }
        }

        let (commands, receiver) = CommandQueue::channel();
        let notifier = ChangeNotifier::new(
            Arc::clone(&sessions) as Arc<dyn EventEmitter>,
            log.clone(),
        );
        let cancel = CancellationToken::new();
        let worker = LinkWorker::new(
            link,
            receiver,
            notifier,
            config.idle_timeout(),
            cancel.clone(),
            log.clone(),
        );
        let handle = tokio::spawn(worker.run());

        log.info(format!("[Bridge] Started for daemon at {}", config.address));

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                commands,
                sessions,
                log,
                link_state,
                cancel,
                worker: Mutex::new(Some(handle)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// The session router (`/ws`), ready to merge into a host router.
    pub fn router(&self) -> Router {
        api::router(self.clone())
    }

    /// Queues a command on behalf of the host rather than a session.
    pub fn submit(&self, command: impl Into<String>) -> PendingReply {
        self.inner.commands.submit(Origin::Internal, command)
    }

    /// Runs one command and waits for its result.
    pub async fn execute(&self, command: impl Into<String>) -> BridgeResult<Response> {
        self.submit(command).await
    }

    pub fn commands(&self) -> &CommandQueue {
        &self.inner.commands
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.session_count()
    }

    pub fn link_state(&self) -> LinkState {
        *self.inner.link_state.borrow()
    }

    /// Receiver observing every link state transition.
    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.inner.link_state.clone()
    }

    /// Returns the retained diagnostic backlog and a receiver for what follows.
    pub fn subscribe_logs(&self) -> (Vec<LogEvent>, broadcast::Receiver<LogEvent>) {
        self.inner.log.subscribe()
    }

    /// Diagnostic events as a stream, backlog first.
    pub fn log_stream(&self) -> impl Stream<Item = LogEvent> + Send + 'static {
        self.inner.log.stream()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stops the bridge. Safe to call more than once.
    ///
    /// Cancels the link worker (interrupting an `idle` wait or a reconnect
    /// backoff), closes every session, and waits briefly for the worker to
    /// release the daemon connection before aborting it.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let log = &self.inner.log;
        log.info("[Bridge] Beginning shutdown");

        self.inner.cancel.cancel();
        let closed = self.inner.sessions.close_all();

        let handle = self.inner.worker.lock().take();
        if let Some(mut handle) = handle {
            let grace = Duration::from_millis(SHUTDOWN_GRACE_MS);
            match time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log.warn(format!("[Bridge] Link worker ended abnormally: {}", e)),
                Err(_) => {
                    handle.abort();
                    log.warn(format!(
                        "[Bridge] Link worker did not stop within {}ms, aborted",
                        SHUTDOWN_GRACE_MS
                    ));
                }
            }
        }

        log.info(format!("[Bridge] Shutdown complete ({} session(s) closed)", closed));
    }
}
