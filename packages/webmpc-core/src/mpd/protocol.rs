//! MPD wire protocol: line classification, response assembly and quoting.
//!
//! The daemon speaks UTF-8 lines. A successful response is zero or more
//! `key: value` lines followed by `OK`; a failure is a single line of the form
//! `ACK [code@index] {command} message`. Nothing in here performs I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{
    CHANGED_KEY, COMMAND_LIST_BEGIN, COMMAND_LIST_END, COMMAND_LIST_OK_BEGIN, GREETING_PREFIX,
    RESERVED_COMMANDS, RESPONSE_ACK_PREFIX, RESPONSE_OK,
};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// A structured daemon error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckError {
    /// MPD error code (`ACK_ERROR_*`).
    pub code: u32,
    /// Index of the failing command within a command list.
    pub index: u32,
    /// Name of the command that failed (may be empty).
    pub command: String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ACK [{}@{}] {{{}}} {}",
            self.code, self.index, self.command, self.message
        )
    }
}

/// Errors that can occur while talking the daemon protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The daemon answered with an `ACK` line.
    #[error("Daemon error: {0}")]
    Ack(AckError),

    /// A response line matched none of the protocol's line shapes.
    #[error("Malformed response line: {0:?}")]
    Malformed(String),

    /// Command text that must not be written to the socket.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Line Classification
// ─────────────────────────────────────────────────────────────────────────────

/// One classified response line.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// Terminating `OK`.
    Ok,
    /// Terminating `ACK`.
    Ack(AckError),
    /// A `key: value` pair.
    Pair(&'a str, &'a str),
}

/// Classifies a single response line (without its trailing newline).
pub fn parse_line(line: &str) -> Result<Line<'_>, ProtocolError> {
    if line == RESPONSE_OK {
        return Ok(Line::Ok);
    }
    if let Some(rest) = line.strip_prefix(RESPONSE_ACK_PREFIX) {
        return parse_ack(rest)
            .map(Line::Ack)
            .ok_or_else(|| ProtocolError::Malformed(line.to_string()));
    }
    match line.split_once(": ") {
        Some((key, value)) if !key.is_empty() => Ok(Line::Pair(key, value)),
        _ => Err(ProtocolError::Malformed(line.to_string())),
    }
}

/// Parses the part of an `ACK` line after the `ACK ` prefix:
/// `[code@index] {command} message`.
fn parse_ack(rest: &str) -> Option<AckError> {
    let rest = rest.strip_prefix('[')?;
    let (numbers, rest) = rest.split_once(']')?;
    let (code, index) = numbers.split_once('@')?;
    let rest = rest.trim_start().strip_prefix('{')?;
    let (command, message) = rest.split_once('}')?;

    Some(AckError {
        code: code.trim().parse().ok()?,
        index: index.trim().parse().ok()?,
        command: command.to_string(),
        message: message.trim_start().to_string(),
    })
}

/// Extracts the protocol version from the connect greeting.
pub fn parse_greeting(line: &str) -> Option<&str> {
    line.strip_prefix(GREETING_PREFIX)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Flat field map of one daemon object (a song, the player status).
pub type Record = BTreeMap<String, String>;

/// The daemon's observable status, as returned by `status`.
pub type StateSnapshot = BTreeMap<String, String>;

/// A successful response: the ordered `key: value` pairs before `OK`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Response {
    pairs: Vec<(String, String)>,
}

impl Response {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub(crate) fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Collapses the response into a single map; later keys win.
    pub fn into_record(self) -> Record {
        self.pairs.into_iter().collect()
    }

    /// Splits a list response into records, each starting at `first_key`.
    ///
    /// Pairs before the first `first_key` (e.g. `directory:` lines in
    /// `listall`) are skipped.
    pub fn into_records(self, first_key: &str) -> Vec<Record> {
        let mut records = Vec::new();
        let mut current: Option<Record> = None;

        for (key, value) in self.pairs {
            if key == first_key {
                if let Some(done) = current.take() {
                    records.push(done);
                }
                current = Some(Record::new());
            }
            if let Some(record) = current.as_mut() {
                record.insert(key, value);
            }
        }
        records.extend(current);
        records
    }
}

/// Subsystems reported as changed by one `idle` cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    subsystems: BTreeSet<String>,
}

impl ChangeSet {
    /// Builds a change set from the `changed:` lines of an idle response.
    pub fn from_response(response: &Response) -> Self {
        response.values(CHANGED_KEY).map(str::to_string).collect()
    }

    pub fn contains(&self, subsystem: &str) -> bool {
        self.subsystems.contains(subsystem)
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.subsystems.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            subsystems: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        f.write_str(&names.join(","))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command Text
// ─────────────────────────────────────────────────────────────────────────────

/// Quotes a command argument: wraps it in double quotes and escapes `"` and `\`.
pub fn quote_arg(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Checks that command text can be written to the socket as one request
/// with exactly one `OK`/`ACK` terminated response.
///
/// A request is either one line, or a `command_list_begin` block closed by
/// `command_list_end` with no list markers in between. Reserved commands are
/// refused on every line, including inside a list.
pub fn validate_command(command: &str) -> Result<(), ProtocolError> {
    let lines: Vec<&str> = command.split('\n').collect();
    if lines.iter().any(|l| l.trim().is_empty() || l.contains('\r')) {
        return Err(ProtocolError::InvalidCommand(
            "empty line or carriage return in command".into(),
        ));
    }

    let body = match lines.as_slice() {
        [single] => std::slice::from_ref(single),
        [first, inner @ .., last]
            if command_name(first) == COMMAND_LIST_BEGIN && command_name(last) == COMMAND_LIST_END =>
        {
            inner
        }
        [first, ..] if command_name(first) == COMMAND_LIST_OK_BEGIN => {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} is not supported, use {}",
                COMMAND_LIST_OK_BEGIN, COMMAND_LIST_BEGIN
            )));
        }
        _ => {
            return Err(ProtocolError::InvalidCommand(
                "multi-line command must be a command list".into(),
            ));
        }
    };

    for line in body {
        let name = command_name(line);
        if [COMMAND_LIST_BEGIN, COMMAND_LIST_OK_BEGIN, COMMAND_LIST_END]
            .iter()
            .any(|marker| name.eq_ignore_ascii_case(marker))
        {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} inside a command list",
                name
            )));
        }
        if RESERVED_COMMANDS
            .iter()
            .any(|reserved| name.eq_ignore_ascii_case(reserved))
        {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} is reserved for the bridge",
                name
            )));
        }
    }
    Ok(())
}

/// First word of a request line.
fn command_name(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or_default()
}

/// Wraps several commands into one command list request.
pub fn command_list<I, S>(commands: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = String::from(COMMAND_LIST_BEGIN);
    for command in commands {
        text.push('\n');
        text.push_str(command.as_ref());
    }
    text.push('\n');
    text.push_str(COMMAND_LIST_END);
    text
}
