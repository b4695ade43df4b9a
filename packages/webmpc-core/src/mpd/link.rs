//! The exclusive connection to the daemon.
//!
//! [`DaemonLink`] owns the one socket to MPD. It is never shared: the link
//! worker in [`crate::services::command_queue`] holds it by value and is the
//! only caller of its methods, so no lock guards the socket.
//!
//! Line framing uses `tokio_util`'s [`LinesCodec`]. Reading the next frame is
//! cancel-safe, which is what lets an `idle` wait be abandoned mid-flight and
//! resumed after `noidle` without losing lines.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tokio_util::codec::{Framed, LinesCodec};

use super::backoff::Backoff;
use super::protocol::{
    parse_greeting, parse_line, quote_arg, validate_command, ChangeSet, Line, ProtocolError,
    Response,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::DiagnosticLog;
use crate::protocol_constants::{CLOSE_TIMEOUT_MS, MAX_LINE_LENGTH};

type DaemonStream = Framed<TcpStream, LinesCodec>;

/// Lifecycle of the daemon connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Connected, no command outstanding (possibly inside `idle`).
    Idle,
    /// One command outstanding.
    Busy,
    Failed,
}

/// How an [`DaemonLink::await_change`] cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// The daemon reported changed subsystems.
    Changed(ChangeSet),
    /// The wait hit its timeout with nothing to report.
    Timeout,
    /// The caller's interrupt fired with nothing to report.
    Interrupted,
}

/// Anything that can run one daemon command.
///
/// The change notifier is written against this so it can be driven by a
/// scripted executor in tests.
#[async_trait]
pub trait CommandExecutor: Send {
    async fn execute(&mut self, command: &str) -> BridgeResult<Response>;
}

/// The single owned connection to the daemon.
pub struct DaemonLink {
    address: String,
    password: Option<String>,
    command_timeout: Duration,
    conn: Option<DaemonStream>,
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    last_error: Option<BridgeError>,
    attempts: u32,
    version: Option<String>,
    backoff: Backoff,
    log: DiagnosticLog,
}

impl DaemonLink {
    /// Creates a disconnected link. Nothing touches the network until
    /// [`connect`](Self::connect).
    pub fn new(config: &BridgeConfig, log: DiagnosticLog) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            address: config.address.clone(),
            password: config.password.clone(),
            command_timeout: config.command_timeout(),
            conn: None,
            state: LinkState::Disconnected,
            state_tx,
            last_error: None,
            attempts: 0,
            version: None,
            backoff: Backoff::new(config.reconnect_min(), config.reconnect_max()),
            log,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Returns a receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// True when a command can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.conn.is_some() && matches!(self.state, LinkState::Idle | LinkState::Busy)
    }

    /// Connect attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Protocol version announced by the daemon, once connected.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the delay to wait before the next reconnect attempt.
    pub fn next_retry_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            log::trace!("[Link] {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Drops the socket and records why.
    fn fail(&mut self, err: &BridgeError) {
        self.conn = None;
        self.last_error = Some(err.clone());
        self.set_state(LinkState::Failed);
        self.log.warn(format!("[Link] Daemon link failed: {}", err));
    }

    /// The error handed to operations attempted while not connected.
    pub fn unavailable(&self) -> BridgeError {
        match &self.last_error {
            Some(err) => BridgeError::Link(format!("{:?} after: {}", self.state, err)),
            None => BridgeError::Link(format!("{:?}", self.state)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connect / Close
    // ─────────────────────────────────────────────────────────────────────────

    /// Opens the socket, reads the greeting and authenticates if a credential
    /// is configured.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connect`] on socket failure, timeout or an unexpected
    /// greeting; [`BridgeError::Auth`] if the daemon rejects the credential.
    pub async fn connect(&mut self) -> BridgeResult<()> {
        self.conn = None;
        self.attempts += 1;
        self.set_state(LinkState::Connecting);
        self.log.info(format!(
            "[Link] Connecting to {} (attempt {})",
            self.address, self.attempts
        ));

        let address = self.address.clone();
        let result = match time::timeout(self.command_timeout, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Connect {
                address,
                reason: format!("timed out after {}ms", self.command_timeout.as_millis()),
            }),
        };

        match result {
            Ok(conn) => {
                self.conn = Some(conn);
                self.last_error = None;
                self.attempts = 0;
                self.backoff.reset();
                self.set_state(LinkState::Idle);
                self.log.info(format!(
                    "[Link] Connected to MPD {} at {}",
                    self.version.as_deref().unwrap_or("?"),
                    self.address
                ));
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn open(&mut self) -> BridgeResult<DaemonStream> {
        let address = self.address.clone();
        let connect_err = move |reason: String| BridgeError::Connect {
            address: address.clone(),
            reason,
        };

        let stream = TcpStream::connect(self.address.as_str())
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Link] set_nodelay failed: {}", e);
        }
        let mut conn = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        let greeting = match conn.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(connect_err(e.to_string())),
            None => return Err(connect_err("closed before greeting".into())),
        };
        let version = parse_greeting(&greeting)
            .ok_or_else(|| connect_err(format!("unexpected greeting {:?}", greeting)))?
            .to_string();

        if let Some(password) = self.password.clone() {
            self.set_state(LinkState::Authenticating);
            let command = format!("password {}", quote_arg(&password));
            match exchange(&mut conn, &command).await {
                Ok(_) => {}
                Err(BridgeError::Protocol(ProtocolError::Ack(ack))) => {
                    return Err(BridgeError::Auth(ack.message));
                }
                Err(err) => return Err(connect_err(err.to_string())),
            }
        }

        self.version = Some(version);
        Ok(conn)
    }

    /// Releases the socket. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // Courtesy only: the daemon also cleans up on EOF.
            let _ = time::timeout(
                Duration::from_millis(CLOSE_TIMEOUT_MS),
                conn.send("close"),
            )
            .await;
            self.log.info(format!("[Link] Closed connection to {}", self.address));
        }
        self.set_state(LinkState::Disconnected);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends one command and reads its complete response.
    ///
    /// A daemon `ACK` fails only this command. I/O errors, malformed lines and
    /// timeouts fail the link as well, since the response stream can no
    /// longer be trusted.
    pub async fn execute(&mut self, command: &str) -> BridgeResult<Response> {
        validate_command(command)?;
        let Some(mut conn) = self.conn.take() else {
            return Err(self.unavailable());
        };
        self.set_state(LinkState::Busy);

        let result = match time::timeout(self.command_timeout, exchange(&mut conn, command)).await
        {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Link(format!(
                "no response to {:?} within {}ms",
                command_name(command),
                self.command_timeout.as_millis()
            ))),
        };

        self.settle(conn, result)
    }

    /// Waits for the daemon to report a change.
    ///
    /// Sends `idle` and waits until the daemon answers, `timeout` elapses, or
    /// `interrupt` completes. In the latter two cases `noidle` is sent and the
    /// reply drained; changes that raced the cancellation are still returned.
    pub async fn await_change<F>(&mut self, timeout: Duration, interrupt: F) -> BridgeResult<AwaitOutcome>
    where
        F: Future<Output = ()>,
    {
        let Some(mut conn) = self.conn.take() else {
            return Err(self.unavailable());
        };
        self.set_state(LinkState::Idle);

        let mut response = Response::default();
        let result = wait_idle(
            &mut conn,
            &mut response,
            timeout,
            self.command_timeout,
            interrupt,
        )
        .await;

        let result = result.map(|cancelled| {
            let changes = ChangeSet::from_response(&response);
            match cancelled {
                _ if !changes.is_empty() => AwaitOutcome::Changed(changes),
                Some(outcome) => outcome,
                None => AwaitOutcome::Changed(changes),
            }
        });
        self.settle(conn, result)
    }

    /// Puts the connection back after an exchange, or fails the link.
    fn settle<T>(&mut self, conn: DaemonStream, result: BridgeResult<T>) -> BridgeResult<T> {
        match result {
            Err(err) if err.breaks_link() => {
                drop(conn);
                self.fail(&err);
                Err(err)
            }
            other => {
                self.conn = Some(conn);
                self.set_state(LinkState::Idle);
                other
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for DaemonLink {
    async fn execute(&mut self, command: &str) -> BridgeResult<Response> {
        DaemonLink::execute(self, command).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First word of a command, for log and error messages.
fn command_name(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

/// Reads the next line; EOF and codec errors become link errors.
async fn next_line(conn: &mut DaemonStream) -> BridgeResult<String> {
    match conn.next().await {
        Some(Ok(line)) => Ok(line),
        Some(Err(e)) => Err(BridgeError::link(e)),
        None => Err(BridgeError::Link("daemon closed the connection".into())),
    }
}

/// Feeds one line into `response`. Returns `true` once the response is complete.
fn absorb(response: &mut Response, line: &str) -> BridgeResult<bool> {
    match parse_line(line)? {
        Line::Ok => Ok(true),
        Line::Ack(ack) => Err(ProtocolError::Ack(ack).into()),
        Line::Pair(key, value) => {
            response.push(key, value);
            Ok(false)
        }
    }
}

async fn read_response(conn: &mut DaemonStream, response: &mut Response) -> BridgeResult<()> {
    loop {
        let line = next_line(conn).await?;
        if absorb(response, &line)? {
            return Ok(());
        }
    }
}

/// Writes one request and reads its response.
async fn exchange(conn: &mut DaemonStream, command: &str) -> BridgeResult<Response> {
    conn.send(command).await.map_err(BridgeError::link)?;
    let mut response = Response::default();
    read_response(conn, &mut response).await?;
    Ok(response)
}

/// Runs one `idle` round trip, accumulating `changed:` lines into `response`.
///
/// Returns `Some(outcome)` if the wait was cut short by timeout or interrupt,
/// `None` if the daemon ended it.
async fn wait_idle<F>(
    conn: &mut DaemonStream,
    response: &mut Response,
    timeout: Duration,
    drain_timeout: Duration,
    interrupt: F,
) -> BridgeResult<Option<AwaitOutcome>>
where
    F: Future<Output = ()>,
{
    conn.send("idle").await.map_err(BridgeError::link)?;

    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);
    tokio::pin!(interrupt);

    let cancelled = loop {
        tokio::select! {
            line = next_line(conn) => {
                if absorb(response, &line?)? {
                    return Ok(None);
                }
            }
            _ = &mut interrupt => break AwaitOutcome::Interrupted,
            _ = &mut deadline => break AwaitOutcome::Timeout,
        }
    };

    // If the daemon already queued its answer, `noidle` is ignored and the
    // pending `OK` below is the idle reply itself.
    conn.send("noidle").await.map_err(BridgeError::link)?;
    match time::timeout(drain_timeout, read_response(conn, response)).await {
        Ok(result) => result?,
        Err(_) => return Err(BridgeError::Link("no reply to noidle".into())),
    }
    Ok(Some(cancelled))
}
