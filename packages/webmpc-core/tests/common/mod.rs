//! In-process fake MPD daemon for integration tests.
//!
//! Speaks enough of the protocol for the bridge: greeting, `password`,
//! `idle`/`noidle`, command lists and a handful of player commands that
//! report changes to every idling client. It also records protocol
//! violations, most importantly a client sending a second request before
//! the first one was answered.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use webmpc_core::protocol_constants::{ACK_ERROR_PASSWORD, ACK_ERROR_PERMISSION};

const ACK_ERROR_ARG: u32 = 2;
const ACK_ERROR_UNKNOWN: u32 = 5;

type Conn = Framed<TcpStream, LinesCodec>;

struct Player {
    volume: u32,
    state: &'static str,
    playlist: Vec<String>,
    current: Option<usize>,
}

struct Shared {
    player: Mutex<Player>,
    files: Vec<String>,
    password: Option<String>,
    log: Mutex<Vec<String>>,
    violations: Mutex<Vec<String>>,
    refusing: AtomicBool,
    accepted: AtomicUsize,
    changes: broadcast::Sender<String>,
    kill: Mutex<CancellationToken>,
}

impl Shared {
    fn violation(&self, what: String) {
        self.violations.lock().push(what);
    }

    fn changed(&self, subsystem: &str) {
        let _ = self.changes.send(subsystem.to_string());
    }
}

/// Handle to a running fake daemon.
pub struct FakeDaemon {
    addr: String,
    shared: Arc<Shared>,
}

impl FakeDaemon {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    pub async fn with_password(password: &str) -> Self {
        Self::spawn(Some(password.to_string())).await
    }

    async fn spawn(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (changes, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            player: Mutex::new(Player {
                volume: 50,
                state: "stop",
                playlist: vec!["intro.flac".into(), "song.flac".into()],
                current: None,
            }),
            files: vec![
                "Artist/Album/01.flac".into(),
                "Artist/Album/02.flac".into(),
                "single.mp3".into(),
            ],
            password,
            log: Mutex::new(Vec::new()),
            violations: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
            accepted: AtomicUsize::new(0),
            changes,
            kill: Mutex::new(CancellationToken::new()),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if accept_shared.refusing.load(Ordering::SeqCst) {
                    drop(socket);
                    continue;
                }
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_shared)));
            }
        });

        Self { addr, shared }
    }

    pub fn address(&self) -> String {
        self.addr.clone()
    }

    /// Every request line received, in order, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.shared.log.lock().iter().filter(|c| *c == command).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.shared.violations.lock().clone()
    }

    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> u32 {
        self.shared.player.lock().volume
    }

    /// Simulates a change made by some other client of the daemon.
    pub fn external_change(&self, subsystem: &str, volume: Option<u32>) {
        if let Some(volume) = volume {
            self.shared.player.lock().volume = volume;
        }
        self.shared.changed(subsystem);
    }

    /// Drops every open connection, like a daemon restart.
    pub fn kill_connections(&self) {
        let mut kill = self.shared.kill.lock();
        kill.cancel();
        *kill = CancellationToken::new();
    }

    /// While refusing, connections are accepted and closed before the greeting.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Waits until `command` has been received `times` times in total.
    pub async fn wait_for(&self, command: &str, times: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count(command) < times {
            assert!(
                tokio::time::Instant::now() < deadline,
                "daemon never saw {:?} x{} (log: {:?})",
                command,
                times,
                self.commands()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection handling
// ─────────────────────────────────────────────────────────────────────────────

enum Reply {
    Data(Vec<String>),
    /// Error code and the `{command} message` part of the ACK line.
    Ack(u32, String),
    Silent,
    Hangup,
}

async fn send_lines(conn: &mut Conn, lines: Vec<String>) -> bool {
    for line in lines {
        if conn.feed(line).await.is_err() {
            return false;
        }
    }
    SinkExt::<String>::flush(conn).await.is_ok()
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let kill = shared.kill.lock().child_token();
    let mut changes = shared.changes.subscribe();
    let mut conn = Framed::new(socket, LinesCodec::new());
    let mut pending: BTreeSet<String> = BTreeSet::new();
    let mut authed = shared.password.is_none();

    if conn.send("OK MPD 0.23.5").await.is_err() {
        return;
    }

    loop {
        let line = tokio::select! {
            _ = kill.cancelled() => return,
            change = changes.recv() => {
                match change {
                    Ok(subsystem) => { pending.insert(subsystem); }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
                continue;
            }
            line = conn.next() => match line {
                Some(Ok(line)) => line,
                _ => return,
            },
        };
        shared.log.lock().push(line.clone());

        if line == "noidle" {
            // Not idling: ignored, no reply.
            continue;
        }

        // `noidle` may legitimately follow `idle` without waiting.
        if line == "idle" {
            if !idle(&mut conn, &shared, &mut changes, &mut pending, &kill).await {
                return;
            }
            continue;
        }

        let reply = if line == "command_list_begin" || line == "command_list_ok_begin" {
            let mut items = Vec::new();
            loop {
                match conn.next().await {
                    Some(Ok(item)) if item == "command_list_end" => break,
                    Some(Ok(item)) => items.push(item),
                    _ => return,
                }
            }
            if !conn.read_buffer().is_empty() {
                shared.violation("request pipelined behind command list".into());
            }
            shared.log.lock().extend(items.iter().cloned());
            match run_list(&shared, &items, authed) {
                Err((index, code, ack)) => {
                    let line = format!("ACK [{}@{}] {}", code, index, ack);
                    if !send_lines(&mut conn, vec![line]).await {
                        return;
                    }
                    continue;
                }
                Ok(reply) => reply,
            }
        } else {
            if !conn.read_buffer().is_empty() {
                shared.violation(format!("request pipelined behind {:?}", line));
            }
            if line.starts_with("password") {
                let (reply, ok) = check_password(&shared, &line);
                authed |= ok;
                reply
            } else {
                run_one(&shared, &line, authed)
            }
        };

        let lines = match reply {
            Reply::Data(mut lines) => {
                lines.push("OK".into());
                lines
            }
            Reply::Ack(code, ack) => vec![format!("ACK [{}@0] {}", code, ack)],
            Reply::Silent => continue,
            Reply::Hangup => return,
        };
        if !send_lines(&mut conn, lines).await {
            return;
        }
    }
}

/// Serves one `idle`. Returns `false` when the connection should end.
async fn idle(
    conn: &mut Conn,
    shared: &Shared,
    changes: &mut broadcast::Receiver<String>,
    pending: &mut BTreeSet<String>,
    kill: &CancellationToken,
) -> bool {
    loop {
        if !pending.is_empty() {
            let mut lines: Vec<String> = pending.iter().map(|s| format!("changed: {}", s)).collect();
            pending.clear();
            lines.push("OK".into());
            return send_lines(conn, lines).await;
        }
        tokio::select! {
            _ = kill.cancelled() => return false,
            change = changes.recv() => match change {
                Ok(subsystem) => { pending.insert(subsystem); }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return false,
            },
            line = conn.next() => match line {
                Some(Ok(line)) if line == "noidle" => {
                    shared.log.lock().push(line);
                    let mut lines: Vec<String> =
                        pending.iter().map(|s| format!("changed: {}", s)).collect();
                    pending.clear();
                    lines.push("OK".into());
                    return send_lines(conn, lines).await;
                }
                Some(Ok(other)) => {
                    shared.log.lock().push(other.clone());
                    shared.violation(format!("{:?} sent while idle", other));
                    return false;
                }
                _ => return false,
            },
        }
    }
}

fn check_password(shared: &Shared, line: &str) -> (Reply, bool) {
    let given = args(line).into_iter().nth(1).unwrap_or_default();
    match &shared.password {
        Some(expected) if *expected == given => (Reply::Data(vec![]), true),
        _ => (
            Reply::Ack(ACK_ERROR_PASSWORD, "{password} incorrect password".into()),
            false,
        ),
    }
}

/// Runs a command list. An ACK carries the index of the failing item.
fn run_list(shared: &Shared, items: &[String], authed: bool) -> Result<Reply, (usize, u32, String)> {
    let mut out = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match run_one(shared, item, authed) {
            Reply::Data(lines) => out.extend(lines),
            Reply::Ack(code, ack) => return Err((index, code, ack)),
            other => return Ok(other),
        }
    }
    Ok(Reply::Data(out))
}

fn run_one(shared: &Shared, line: &str, authed: bool) -> Reply {
    let args = args(line);
    let name = args.first().cloned().unwrap_or_default();
    if !authed {
        return Reply::Ack(
            ACK_ERROR_PERMISSION,
            format!("{{{}}} you don't have permission for \"{}\"", name, name),
        );
    }

    let mut player = shared.player.lock();
    match name.as_str() {
        "ping" => Reply::Data(vec![]),
        "status" => Reply::Data(vec![
            format!("volume: {}", player.volume),
            "repeat: 0".into(),
            "random: 0".into(),
            format!("playlistlength: {}", player.playlist.len()),
            format!("state: {}", player.state),
        ]),
        "currentsong" => match player.current {
            Some(pos) if player.state != "stop" => Reply::Data(vec![
                format!("file: {}", player.playlist[pos]),
                format!("Pos: {}", pos),
                format!("Id: {}", pos + 1),
            ]),
            _ => Reply::Data(vec![]),
        },
        "playlistinfo" => Reply::Data(
            player
                .playlist
                .iter()
                .enumerate()
                .flat_map(|(pos, file)| {
                    vec![
                        format!("file: {}", file),
                        format!("Pos: {}", pos),
                        format!("Id: {}", pos + 1),
                    ]
                })
                .collect(),
        ),
        "listall" => {
            let mut lines = vec!["directory: Artist".to_string()];
            lines.extend(shared.files.iter().map(|f| format!("file: {}", f)));
            Reply::Data(lines)
        }
        "setvol" => match args.get(1).and_then(|v| v.parse::<u32>().ok()) {
            Some(v) if v <= 100 => {
                player.volume = v;
                shared.changed("mixer");
                Reply::Data(vec![])
            }
            _ => Reply::Ack(ACK_ERROR_ARG, "{setvol} Invalid volume value".into()),
        },
        "play" => {
            let pos = args.get(1).and_then(|p| p.parse::<usize>().ok()).unwrap_or(0);
            if pos >= player.playlist.len() {
                return Reply::Ack(ACK_ERROR_ARG, "{play} Bad song index".into());
            }
            player.state = "play";
            player.current = Some(pos);
            shared.changed("player");
            Reply::Data(vec![])
        }
        "stop" => {
            player.state = "stop";
            shared.changed("player");
            Reply::Data(vec![])
        }
        "add" => match args.get(1) {
            Some(uri) => {
                player.playlist.push(uri.clone());
                shared.changed("playlist");
                Reply::Data(vec![])
            }
            None => Reply::Ack(ACK_ERROR_ARG, "{add} wrong number of arguments".into()),
        },
        "clear" => {
            player.playlist.clear();
            player.current = None;
            player.state = "stop";
            shared.changed("playlist");
            shared.changed("player");
            Reply::Data(vec![])
        }
        "echo" => Reply::Data(vec![format!("value: {}", args.get(1).cloned().unwrap_or_default())]),
        "stall" => Reply::Silent,
        "hangup" => Reply::Hangup,
        "close" => Reply::Hangup,
        other => Reply::Ack(
            ACK_ERROR_UNKNOWN,
            format!("{{}} unknown command \"{}\"", other),
        ),
    }
}

/// Splits a request line into words, honouring double quotes and escapes.
fn args(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            ' ' if !in_quotes => {
                if started || !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started || !current.is_empty() {
        out.push(current);
    }
    out
}
