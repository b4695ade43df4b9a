//! MPD daemon access.
//!
//! - [`protocol`]: response line parsing, argument quoting, command lists
//! - [`link`]: the exclusively owned connection and its idle cycle
//! - [`backoff`]: reconnect delay schedule

pub mod backoff;
pub mod link;
pub mod protocol;

pub use link::{AwaitOutcome, CommandExecutor, DaemonLink, LinkState};
pub use protocol::{AckError, ChangeSet, ProtocolError, Record, Response, StateSnapshot};
