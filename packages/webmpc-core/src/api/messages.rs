//! Session message protocol.
//!
//! Inbound text frames are either a JSON object tagged by `Cmd` (what the
//! browser UI sends) or a raw daemon command line forwarded verbatim.
//! Outbound frames are `{"Type": ..., "Data": ...}` objects.

use axum::extract::ws::{Message, Utf8Bytes};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult, ErrorCode};
use crate::events::BroadcastEvent;
use crate::mpd::protocol::{command_list, quote_arg, validate_command};
use crate::mpd::{AckError, ProtocolError, Response};
use crate::protocol_constants::FILE_KEY;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Typed commands sent by the browser UI.
///
/// Numeric fields accept JSON numbers or numeric strings; the UI sends
/// `Pos: "-1"` for "resume".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "Cmd")]
pub enum WsIncoming {
    Status,
    CurrentSong,
    PlaylistInfo,
    GetFiles,
    Play {
        #[serde(rename = "Pos", default = "no_position", deserialize_with = "lenient_int")]
        pos: i64,
    },
    PlayId {
        #[serde(rename = "Id", deserialize_with = "lenient_int")]
        id: i64,
    },
    Pause {
        #[serde(rename = "Pause")]
        pause: bool,
    },
    Next,
    Previous,
    Stop,
    SetVolume {
        #[serde(rename = "Volume", deserialize_with = "lenient_int")]
        volume: i64,
    },
    SeekId {
        #[serde(rename = "Id", deserialize_with = "lenient_int")]
        id: i64,
        #[serde(rename = "Time", deserialize_with = "lenient_int")]
        time: i64,
    },
    Random {
        #[serde(rename = "Random")]
        random: bool,
    },
    Repeat {
        #[serde(rename = "Repeat")]
        repeat: bool,
    },
    Clear,
    Add {
        #[serde(rename = "Uri")]
        uri: String,
    },
    AddMulti {
        #[serde(rename = "Uris")]
        uris: Vec<String>,
        #[serde(rename = "Pos", default = "no_position", deserialize_with = "lenient_int")]
        pos: i64,
    },
    MoveId {
        #[serde(rename = "Id", deserialize_with = "lenient_int")]
        id: i64,
        #[serde(rename = "Pos", deserialize_with = "lenient_int")]
        pos: i64,
    },
    DeleteId {
        #[serde(rename = "Id", deserialize_with = "lenient_int")]
        id: i64,
    },
}

fn no_position() -> i64 {
    -1
}

fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Int(i64),
        Text(String),
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Int(n) => Ok(n),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an integer, got {:?}", s))),
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

fn non_negative(value: i64, field: &str) -> BridgeResult<i64> {
    if value < 0 {
        Err(BridgeError::Session(format!("{} must not be negative", field)))
    } else {
        Ok(value)
    }
}

impl WsIncoming {
    /// Translates the message into daemon command text.
    pub fn to_command(&self) -> BridgeResult<String> {
        let command = match self {
            Self::Status => "status".to_string(),
            Self::CurrentSong => "currentsong".to_string(),
            Self::PlaylistInfo => "playlistinfo".to_string(),
            Self::GetFiles => "listall".to_string(),
            Self::Play { pos } if *pos < 0 => "play".to_string(),
            Self::Play { pos } => format!("play {}", pos),
            Self::PlayId { id } => format!("playid {}", non_negative(*id, "Id")?),
            Self::Pause { pause } => format!("pause {}", flag(*pause)),
            Self::Next => "next".to_string(),
            Self::Previous => "previous".to_string(),
            Self::Stop => "stop".to_string(),
            Self::SetVolume { volume } => {
                if !(0..=100).contains(volume) {
                    return Err(BridgeError::Session(format!(
                        "Volume {} out of range 0-100",
                        volume
                    )));
                }
                format!("setvol {}", volume)
            }
            Self::SeekId { id, time } => format!(
                "seekid {} {}",
                non_negative(*id, "Id")?,
                non_negative(*time, "Time")?
            ),
            Self::Random { random } => format!("random {}", flag(*random)),
            Self::Repeat { repeat } => format!("repeat {}", flag(*repeat)),
            Self::Clear => "clear".to_string(),
            Self::Add { uri } => format!("add {}", quote_arg(uri)),
            Self::AddMulti { uris, pos } => {
                if uris.is_empty() {
                    return Err(BridgeError::Session("AddMulti without Uris".into()));
                }
                if *pos < 0 {
                    command_list(uris.iter().map(|uri| format!("add {}", quote_arg(uri))))
                } else {
                    command_list(
                        uris.iter()
                            .zip(*pos..)
                            .map(|(uri, at)| format!("addid {} {}", quote_arg(uri), at)),
                    )
                }
            }
            Self::MoveId { id, pos } => format!(
                "moveid {} {}",
                non_negative(*id, "Id")?,
                non_negative(*pos, "Pos")?
            ),
            Self::DeleteId { id } => format!("deleteid {}", non_negative(*id, "Id")?),
        };
        Ok(command)
    }

    /// How a successful result is presented to the requesting session.
    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::Status => ReplyKind::Status,
            Self::CurrentSong => ReplyKind::CurrentSong,
            Self::PlaylistInfo => ReplyKind::Playlist,
            Self::GetFiles => ReplyKind::Files,
            _ => ReplyKind::Done,
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Typed(WsIncoming),
    Raw(String),
}

impl Inbound {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Session`] for malformed JSON, empty lines, commands the
    /// bridge keeps for itself, and multi-line text that is not a single
    /// plain command list.
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map(Self::Typed)
                .map_err(|e| BridgeError::Session(e.to_string()));
        }

        let line = text.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(BridgeError::Session("empty command".into()));
        }
        validate_command(line).map_err(|e| BridgeError::Session(e.to_string()))?;
        Ok(Self::Raw(line.to_string()))
    }

    pub fn to_command(&self) -> BridgeResult<String> {
        match self {
            Self::Typed(msg) => msg.to_command(),
            Self::Raw(line) => Ok(line.clone()),
        }
    }

    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::Typed(msg) => msg.reply_kind(),
            Self::Raw(_) => ReplyKind::Raw,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Shape of a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Status,
    CurrentSong,
    Playlist,
    Files,
    /// Action command: acknowledged without data.
    Done,
    /// Raw command: the ordered pairs, as received.
    Raw,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'static str,
    message: String,
    ack: Option<&'a AckError>,
}

#[derive(Serialize)]
#[serde(tag = "Type", content = "Data")]
enum WsOutgoing<'a> {
    Ok(()),
    Response(&'a [(String, String)]),
    Error(ErrorPayload<'a>),
}

fn to_frame<T: Serialize>(value: &T) -> Utf8Bytes {
    match serde_json::to_string(value) {
        Ok(json) => Utf8Bytes::from(json),
        Err(e) => {
            log::error!("[WS] Failed to serialize reply: {}", e);
            Utf8Bytes::from_static(
                r#"{"Type":"Error","Data":{"code":"internal_error","message":"unserializable reply","ack":null}}"#,
            )
        }
    }
}

/// Renders the outcome of one session command.
pub fn render_reply(kind: ReplyKind, result: BridgeResult<Response>) -> Utf8Bytes {
    let response = match result {
        Ok(response) => response,
        Err(err) => return render_error(&err),
    };
    match kind {
        ReplyKind::Status => to_frame(&BroadcastEvent::Status(response.into_record())),
        ReplyKind::CurrentSong => to_frame(&BroadcastEvent::CurrentSong(response.into_record())),
        ReplyKind::Playlist => to_frame(&BroadcastEvent::Playlist(response.into_records(FILE_KEY))),
        ReplyKind::Files => {
            let files = response.values(FILE_KEY).map(str::to_string).collect();
            to_frame(&BroadcastEvent::Files(files))
        }
        ReplyKind::Done => to_frame(&WsOutgoing::Ok(())),
        ReplyKind::Raw => to_frame(&WsOutgoing::Response(response.pairs())),
    }
}

/// Renders an error reply: `{"code", "message", "ack"}`.
pub fn render_error(err: &BridgeError) -> Utf8Bytes {
    let ack = match err {
        BridgeError::Protocol(ProtocolError::Ack(ack)) => Some(ack),
        _ => None,
    };
    to_frame(&WsOutgoing::Error(ErrorPayload {
        code: err.code(),
        message: err.to_string(),
        ack,
    }))
}

/// Wraps a rendered frame for the socket.
pub fn to_message(frame: Utf8Bytes) -> Message {
    Message::Text(frame)
}
