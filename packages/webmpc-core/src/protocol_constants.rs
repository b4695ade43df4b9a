//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the MPD wire protocol and by the browser UI.
//! Tunable timings live in [`crate::config::BridgeConfig`].

// ─────────────────────────────────────────────────────────────────────────────
// MPD Wire Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix of the banner MPD sends as soon as a client connects.
pub const GREETING_PREFIX: &str = "OK MPD ";

/// Line terminating a successful response.
pub const RESPONSE_OK: &str = "OK";

/// Prefix of an error response line.
pub const RESPONSE_ACK_PREFIX: &str = "ACK ";

/// Key MPD uses to report changed subsystems after `idle`.
pub const CHANGED_KEY: &str = "changed";

/// Key starting a new song record in list responses.
pub const FILE_KEY: &str = "file";

/// `ACK` error code for a wrong password.
pub const ACK_ERROR_PASSWORD: u32 = 3;

/// `ACK` error code for a command the client may not run.
pub const ACK_ERROR_PERMISSION: u32 = 4;

/// Maximum length of a single response line (bytes).
///
/// `listall` lines are paths, comfortably below this.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Commands that may not be sent through the command queue.
///
/// `idle`, `noidle`, `close` and `password` belong to the link's own cycle.
/// `albumart` and `readpicture` answer with raw bytes, and `binarylimit`
/// changes how those bytes are chunked; the line codec cannot carry either.
pub const RESERVED_COMMANDS: [&str; 7] = [
    "idle",
    "noidle",
    "close",
    "password",
    "albumart",
    "readpicture",
    "binarylimit",
];

/// Opens a command list answered with a single `OK`.
pub const COMMAND_LIST_BEGIN: &str = "command_list_begin";

/// Opens a command list answered with one `list_OK` per command.
pub const COMMAND_LIST_OK_BEGIN: &str = "command_list_ok_begin";

pub const COMMAND_LIST_END: &str = "command_list_end";

// ─────────────────────────────────────────────────────────────────────────────
// Session Transport
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket subprotocol requested by the browser UI.
///
/// Browsers abort the handshake when they request a subprotocol and the
/// server selects none.
pub const WS_SUBPROTOCOL: &str = "soap";

/// Path the session endpoint is mounted at.
pub const WS_PATH: &str = "/ws";

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

/// How long shutdown waits for the link worker before aborting it (ms).
pub const SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Bound on the courtesy `close` sent to the daemon (ms).
pub const CLOSE_TIMEOUT_MS: u64 = 500;
