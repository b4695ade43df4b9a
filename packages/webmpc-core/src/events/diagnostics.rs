//! Diagnostic event stream.
//!
//! Human-readable log lines describing what the bridge is doing (connect
//! attempts, parse failures, session join/leave). Every component receives a
//! [`DiagnosticLog`] handle at construction; the facade exposes the stream to
//! whoever hosts the bridge.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// One immutable diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level, self.message)
    }
}

struct LogState {
    history: VecDeque<LogEvent>,
    capacity: usize,
}

/// Append-only diagnostic channel.
///
/// Recent events are retained so a subscriber that attaches after start-up
/// (the usual case for the process log sink) still sees the initial connect
/// attempt. Recording and subscribing share one short critical section, so a
/// subscriber sees every event exactly once.
#[derive(Clone)]
pub struct DiagnosticLog {
    tx: broadcast::Sender<LogEvent>,
    state: Arc<Mutex<LogState>>,
}

impl DiagnosticLog {
    /// Creates a log retaining up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            state: Arc::new(Mutex::new(LogState {
                history: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    fn record(&self, level: LogLevel, message: String) {
        let event = LogEvent {
            timestamp: now_millis(),
            level,
            message,
        };

        let mut state = self.state.lock();
        if state.history.len() == state.capacity {
            state.history.pop_front();
        }
        state.history.push_back(event.clone());
        // No receivers is normal before the host subscribes.
        let _ = self.tx.send(event);
    }

    /// Returns the retained backlog and a receiver for everything after it.
    pub fn subscribe(&self) -> (Vec<LogEvent>, broadcast::Receiver<LogEvent>) {
        let state = self.state.lock();
        let rx = self.tx.subscribe();
        (state.history.iter().cloned().collect(), rx)
    }

    /// Returns the backlog followed by live events as a stream.
    ///
    /// A subscriber that falls behind skips the events it missed rather than
    /// ending the stream.
    pub fn stream(&self) -> impl Stream<Item = LogEvent> + Send + 'static {
        let (backlog, rx) = self.subscribe();
        let live = BroadcastStream::new(rx).filter_map(|item| async move { item.ok() });
        stream::iter(backlog).chain(live)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_subscriber_receives_backlog() {
        let log = DiagnosticLog::new(8);
        log.info("[Link] connecting");
        log.warn("[Link] refused");

        let (backlog, _rx) = log.subscribe();
        let messages: Vec<&str> = backlog.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["[Link] connecting", "[Link] refused"]);
        assert_eq!(backlog[1].level, LogLevel::Warn);
    }

    #[test]
    fn backlog_is_bounded() {
        let log = DiagnosticLog::new(2);
        log.info("one");
        log.info("two");
        log.info("three");

        let (backlog, _rx) = log.subscribe();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].message, "two");
    }

    #[tokio::test]
    async fn stream_yields_backlog_then_live_events() {
        let log = DiagnosticLog::new(8);
        log.info("before");

        let mut events = Box::pin(log.stream());
        log.error("after");

        assert_eq!(events.next().await.unwrap().message, "before");
        let live = events.next().await.unwrap();
        assert_eq!(live.message, "after");
        assert_eq!(live.level, LogLevel::Error);
    }

    #[test]
    fn display_prefixes_level() {
        let event = LogEvent {
            timestamp: 0,
            level: LogLevel::Info,
            message: "[WS] session-1 joined".into(),
        };
        assert_eq!(event.to_string(), "info [WS] session-1 joined");
    }
}
