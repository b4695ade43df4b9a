//! Command serialization onto the single daemon connection.
//!
//! Responsibilities:
//! - Accepting command submissions from any session task ([`CommandQueue`])
//! - Executing them one at a time, FIFO, on the link worker ([`LinkWorker`])
//! - Alternating command execution with `idle` change detection
//! - Recovering the link with bounded backoff after failures
//!
//! The queue is an unbounded mpsc channel plus a [`Notify`] that cuts an
//! `idle` wait short whenever something is enqueued. The worker is the only
//! owner of the [`DaemonLink`]; nothing else ever touches the socket.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::api::SessionId;
use crate::error::{BridgeError, BridgeResult};
use crate::events::DiagnosticLog;
use crate::mpd::{AwaitOutcome, DaemonLink, Response};
use crate::services::ChangeNotifier;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Session(SessionId),
    /// Issued by the bridge itself.
    Internal,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "{}", id),
            Self::Internal => f.write_str("bridge"),
        }
    }
}

/// One queued unit of work. Its result slot is fulfilled exactly once.
pub struct PendingCommand {
    pub command: String,
    pub origin: Origin,
    reply: oneshot::Sender<BridgeResult<Response>>,
}

impl PendingCommand {
    /// Delivers the outcome. A requester that already went away is logged once.
    fn resolve(self, result: BridgeResult<Response>) {
        if self.reply.send(result).is_err() {
            log::debug!(
                "[Queue] Result of {:?} discarded, {} disconnected",
                self.command,
                self.origin
            );
        }
    }
}

/// Future resolving to the result of a submitted command.
pub struct PendingReply {
    rx: oneshot::Receiver<BridgeResult<Response>>,
}

impl Future for PendingReply {
    type Output = BridgeResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(BridgeError::Link("command dropped before completion".into())))
        })
    }
}

/// Submission side of the serializer. Cheap to clone; safe from any task.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<PendingCommand>,
    wake: Arc<Notify>,
}

/// Receiving side, moved into the [`LinkWorker`].
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<PendingCommand>,
    wake: Arc<Notify>,
}

impl CommandReceiver {
    /// Consumes a wake-up left by submissions that are already queued.
    ///
    /// Called right before the queue is checked: anything submitted earlier
    /// is about to be seen by `try_recv`, so only later submissions may
    /// interrupt the next `idle`.
    fn clear_wakeup(&self) {
        let _ = self.wake.notified().now_or_never();
    }
}

#[cfg(test)]
impl CommandReceiver {
    /// Takes every queued command text without executing anything.
    pub(crate) fn drain_commands(&mut self) -> Vec<String> {
        let mut commands = Vec::new();
        while let Ok(pending) = self.rx.try_recv() {
            commands.push(pending.command);
        }
        commands
    }
}

impl CommandQueue {
    /// Creates a connected queue/receiver pair.
    pub fn channel() -> (CommandQueue, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        (
            CommandQueue {
                tx,
                wake: Arc::clone(&wake),
            },
            CommandReceiver { rx, wake },
        )
    }

    /// Enqueues a command. Commands run in submission order across all origins.
    ///
    /// Never blocks. If the worker has stopped the reply resolves to
    /// [`BridgeError::Link`] immediately.
    pub fn submit(&self, origin: Origin, command: impl Into<String>) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        let pending = PendingCommand {
            command: command.into(),
            origin,
            reply,
        };
        match self.tx.send(pending) {
            // A stored permit also covers a submit that lands just before
            // the worker starts waiting.
            Ok(()) => self.wake.notify_one(),
            Err(mpsc::error::SendError(pending)) => {
                pending.resolve(Err(BridgeError::Link("bridge shut down".into())));
            }
        }
        PendingReply { rx }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link Worker
// ─────────────────────────────────────────────────────────────────────────────

/// The task that owns the daemon link.
pub struct LinkWorker {
    link: DaemonLink,
    queue: CommandReceiver,
    notifier: ChangeNotifier,
    idle_timeout: Duration,
    cancel: CancellationToken,
    log: DiagnosticLog,
}

impl LinkWorker {
    pub fn new(
        link: DaemonLink,
        queue: CommandReceiver,
        notifier: ChangeNotifier,
        idle_timeout: Duration,
        cancel: CancellationToken,
        log: DiagnosticLog,
    ) -> Self {
        Self {
            link,
            queue,
            notifier,
            idle_timeout,
            cancel,
            log,
        }
    }

    /// Runs until cancelled or every [`CommandQueue`] handle is dropped.
    ///
    /// Each turn either executes one queued command or performs one `idle`
    /// cycle; a failed link is recovered before either is attempted.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.link.is_ready() {
                if !self.recover().await {
                    break;
                }
                continue;
            }
            self.queue.clear_wakeup();
            match self.queue.rx.try_recv() {
                Ok(pending) => self.execute(pending).await,
                Err(TryRecvError::Empty) => self.watch_changes().await,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        self.queue.rx.close();
        self.fail_queued(&BridgeError::Link("bridge shut down".into()));
        self.link.close().await;
        log::debug!("[Queue] Link worker stopped");
    }

    async fn execute(&mut self, pending: PendingCommand) {
        if pending.reply.is_closed() {
            log::debug!(
                "[Queue] Skipping {:?}, {} disconnected before it ran",
                pending.command,
                pending.origin
            );
            return;
        }

        let result = self.link.execute(&pending.command).await;
        let broken = matches!(&result, Err(e) if e.breaks_link());
        if let Err(ref e) = result {
            log::debug!("[Queue] {:?} from {} failed: {}", pending.command, pending.origin, e);
        }
        pending.resolve(result);

        if broken {
            let err = self.link.unavailable();
            self.fail_queued(&err);
        }
    }

    async fn watch_changes(&mut self) {
        let wake = Arc::clone(&self.queue.wake);
        let cancel = self.cancel.clone();
        let interrupt = async move {
            tokio::select! {
                _ = wake.notified() => {}
                _ = cancel.cancelled() => {}
            }
        };

        match self.link.await_change(self.idle_timeout, interrupt).await {
            Ok(AwaitOutcome::Changed(changes)) => {
                self.notifier.refresh(&mut self.link, &changes).await;
            }
            Ok(AwaitOutcome::Timeout) | Ok(AwaitOutcome::Interrupted) => {}
            Err(err) => {
                if err.breaks_link() {
                    let err = self.link.unavailable();
                    self.fail_queued(&err);
                } else {
                    self.log
                        .warn(format!("[Queue] Change detection failed: {}", err));
                }
            }
        }
    }

    /// Waits out the backoff delay, then reconnects once.
    ///
    /// Commands arriving meanwhile fail immediately instead of piling up.
    /// Returns `false` when the worker should stop.
    async fn recover(&mut self) -> bool {
        let delay = self.link.next_retry_delay();
        self.log.info(format!(
            "[Queue] Reconnecting to {} in {}ms",
            self.link.address(),
            delay.as_millis()
        ));

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => break,
                pending = self.queue.rx.recv() => match pending {
                    Some(pending) => pending.resolve(Err(self.link.unavailable())),
                    None => return false,
                },
            }
        }

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            result = self.link.connect() => {
                if let Err(err) = result {
                    self.log.warn(format!("[Queue] Reconnect failed: {}", err));
                }
                true
            }
        }
    }

    /// Resolves everything currently queued with `err`.
    fn fail_queued(&mut self, err: &BridgeError) {
        let mut failed = 0;
        while let Ok(pending) = self.queue.rx.try_recv() {
            pending.resolve(Err(err.clone()));
            failed += 1;
        }
        if failed > 0 {
            self.log
                .warn(format!("[Queue] Failed {} queued command(s): {}", failed, err));
        }
    }
}
