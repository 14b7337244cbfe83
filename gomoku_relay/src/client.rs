// Client-side connection session for the room relay.
//
// Provides a non-blocking interface for the game's main thread to talk to
// the relay. Architecture:
// - `connect()` performs TCP connect + the `Welcome` greeting on the calling
//   thread, then spawns a background reader thread.
// - The reader thread calls `read_message()` in a loop, deserializes
//   `ServerMessage`, and pushes into an `mpsc` channel.
// - The main thread holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox non-blocking, folds each message into the
//   session state, and returns the resulting `SessionEvent`s. It also
//   services the join deadline and any scheduled retry, so callers drive
//   all timing by polling; no timer threads.
//
// State machine: `Disconnected → Connecting → Connected`, with an absorbing
// `Error` status. A session starts `Disconnected`; `connect` passes through
// `Connecting` while the greeting is exchanged, and a reconnect wait parks
// the session in `Connecting` until the next attempt fires. `Error` holds
// the last `SessionError` and is only left through `disconnect()`, which
// resets the whole session and is safe to call from any state.
//
// Retry: transient failures are retried automatically with exponential
// backoff, up to `MAX_RETRY_ATTEMPTS` times, before settling into `Error`.
// Two kinds share the one budget and the one timer:
// - a join rejected with NOT_FOUND or timed out (the host may not have
//   finished creating the room yet) re-sends the join;
// - a lost connection re-dials the relay at the address given to `connect`
//   and, when a room was held, re-joins it on success.
// FULL and a departed host are final and never retried. The retry timer is
// a plain field checked in `poll()`; `disconnect()` or a fresh join request
// cancels it by overwriting, so a scheduled retry can never fire for a
// torn-down session.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gomoku_protocol::framing::{read_message, write_message};
use gomoku_protocol::message::{ClientMessage, GameMessage, GamePayload, JoinError, ServerMessage};
use gomoku_protocol::types::{PlayerId, RoomId, now_millis};
use gomoku_rules::Player;

/// How long a create/join request may wait for a relay response.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Automatic retries after a transient failure (join or connection loss).
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on each subsequent attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Read timeout for the initial `Welcome` greeting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Why a session operation failed. `Error` status always carries one.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("room {0} does not exist")]
    NotFound(RoomId),
    #[error("room {0} is full")]
    Full(RoomId),
    #[error("room numbers are exactly six digits")]
    InvalidFormat,
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("no response from the server in time")]
    Timeout,
    #[error("the host left the room")]
    HostLeft,
}

impl SessionError {
    /// Transient failures are worth retrying automatically. A full room or
    /// a departed host will not change by waiting, and a malformed code
    /// never reaches the wire.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound(_) | SessionError::Transport(_) | SessionError::Timeout
        )
    }
}

/// What `poll()` observed since the last call, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    RoomCreated { room_id: RoomId },
    RoomJoined { room_id: RoomId },
    JoinRetrying { attempt: u32, delay: Duration },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    OpponentJoined,
    ReadyUpdate { host_ready: bool, guest_ready: bool },
    GameStart,
    Game { sender_id: PlayerId, message: GameMessage },
    OpponentLeft,
    Failed(SessionError),
}

/// Live wire state: write half, inbox fed by the reader thread.
#[derive(Debug)]
struct Transport {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: JoinHandle<()>,
}

/// An in-flight create/join request waiting for the relay's answer.
#[derive(Debug)]
enum PendingRequest {
    Create { deadline: Instant },
    Join { room_id: RoomId, deadline: Instant },
}

/// What a fired retry does.
#[derive(Debug)]
enum RetryAction {
    /// Re-send a join for a room that answered NOT_FOUND or timed out.
    Join { room_id: RoomId },
    /// Re-dial the relay; re-join the held room on success.
    Reconnect { room_id: Option<RoomId> },
}

/// A scheduled retry. Checked in `poll()`; dropped on cancel.
#[derive(Debug)]
struct RetryTimer {
    action: RetryAction,
    due: Instant,
    attempt: u32,
}

/// Client session: one per participant, owns the transport to the relay
/// and the room association. All methods are non-blocking except
/// `connect()`.
#[derive(Debug)]
pub struct Session {
    addr: String,
    status: Status,
    transport: Option<Transport>,
    player_id: Option<PlayerId>,
    room_id: Option<RoomId>,
    role: Option<Player>,
    host_ready: bool,
    guest_ready: bool,
    game_started: bool,
    pending: Option<PendingRequest>,
    retry: Option<RetryTimer>,
    retry_count: u32,
    retry_base_delay: Duration,
    last_error: Option<SessionError>,
}

impl Session {
    /// A session that has not dialed the relay yet. The address is kept
    /// for reconnect attempts after a connection loss.
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            status: Status::Disconnected,
            transport: None,
            player_id: None,
            room_id: None,
            role: None,
            host_ready: false,
            guest_ready: false,
            game_started: false,
            pending: None,
            retry: None,
            retry_count: 0,
            retry_base_delay: RETRY_BASE_DELAY,
            last_error: None,
        }
    }

    /// Connect to a relay, wait for the `Welcome` greeting, and spawn the
    /// reader thread. Blocks for at most the handshake timeout.
    pub fn connect(addr: &str) -> Result<Self, SessionError> {
        let mut session = Self::new(addr);
        session.open()?;
        Ok(session)
    }

    /// Override the backoff base delay. Tests shorten this so the full
    /// retry schedule runs in milliseconds.
    pub fn set_retry_base_delay(&mut self, delay: Duration) {
        self.retry_base_delay = delay;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn role(&self) -> Option<Player> {
        self.role
    }

    /// The host always plays the first-moving color.
    pub fn is_host(&self) -> bool {
        self.role == Some(Player::Black)
    }

    pub fn ready_flags(&self) -> (bool, bool) {
        (self.host_ready, self.guest_ready)
    }

    pub fn is_game_started(&self) -> bool {
        self.game_started
    }

    /// How many automatic retries the current request or outage has
    /// burned, for "attempt N of 3" presentation.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Ask the relay for a fresh room. The answer arrives through `poll()`
    /// as `RoomCreated`, or `Failed(Timeout)` if none comes in time.
    pub fn request_create_room(&mut self) -> Result<(), SessionError> {
        self.send(&ClientMessage::CreateRoom)?;
        self.pending = Some(PendingRequest::Create {
            deadline: Instant::now() + JOIN_TIMEOUT,
        });
        self.retry = None;
        self.retry_count = 0;
        Ok(())
    }

    /// Ask to join a room by user-typed code. The code is sanitized and
    /// validated locally first; a malformed code never reaches the wire.
    /// The answer arrives through `poll()`.
    pub fn request_join(&mut self, code: &str) -> Result<(), SessionError> {
        let sanitized = RoomId::sanitize(code);
        let room_id =
            RoomId::parse(&sanitized).map_err(|_| SessionError::InvalidFormat)?;

        // A fresh user-initiated join cancels any scheduled retry.
        self.retry = None;
        self.retry_count = 0;
        self.send_join(&room_id)
    }

    /// Send a game payload to the opponent via the relay. Fails softly
    /// (plain error, no status change) when not seated in a room.
    pub fn send_game(&mut self, payload: GamePayload) -> Result<(), SessionError> {
        let Some(player_id) = self.player_id else {
            return Err(SessionError::Transport("not connected".into()));
        };
        if self.room_id.is_none() {
            return Err(SessionError::Transport("not in a room".into()));
        }
        let message = GameMessage {
            payload,
            timestamp: now_millis(),
            player_id,
        };
        self.send(&ClientMessage::Game { message })
    }

    /// Declare this side ready. The relay echoes the combined flags back as
    /// a `ReadyUpdate`; the local flag is set optimistically so the UI can
    /// disable the button immediately.
    pub fn set_ready(&mut self) -> Result<(), SessionError> {
        if self.room_id.is_none() {
            return Err(SessionError::Transport("not in a room".into()));
        }
        if self.is_host() {
            self.host_ready = true;
        } else {
            self.guest_ready = true;
        }
        self.send(&ClientMessage::PlayerReady)
    }

    /// Tear the session down and return to `Disconnected`. Cancels any
    /// pending request or scheduled retry, clears the error, and is
    /// idempotent, safe to call from any state. This is also the only way
    /// out of `Error`.
    pub fn disconnect(&mut self) {
        if self.transport.is_some() {
            if self.room_id.is_some() {
                let _ = self.send(&ClientMessage::LeaveRoom);
            }
            let _ = self.send(&ClientMessage::Goodbye);
        }
        self.teardown();
        self.last_error = None;
        self.retry_count = 0;
        self.transition(Status::Disconnected);
    }

    /// Drain inbound messages, service deadlines and retries, and return
    /// everything that happened since the last call.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        // Drain the inbox before folding, so handlers can borrow freely.
        let mut inbound = Vec::new();
        let mut channel_closed = false;
        if let Some(transport) = &self.transport {
            loop {
                match transport.inbox.try_recv() {
                    Ok(msg) => inbound.push(msg),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        channel_closed = true;
                        break;
                    }
                }
            }
        }
        for msg in inbound {
            self.handle_server_message(msg, &mut events);
        }

        // The reader thread only exits on EOF or a malformed frame. If the
        // session still thinks it has a transport, that transport is dead:
        // try to get back before giving up on the session.
        if channel_closed && self.transport.is_some() {
            let held_room = self.room_id.clone();
            self.teardown();
            self.connection_lost(
                held_room,
                SessionError::Transport("connection lost".into()),
                &mut events,
            );
        }

        // Create/join deadline.
        let expired = match &self.pending {
            Some(PendingRequest::Create { deadline }) if Instant::now() >= *deadline => {
                Some(None)
            }
            Some(PendingRequest::Join { room_id, deadline }) if Instant::now() >= *deadline => {
                Some(Some(room_id.clone()))
            }
            _ => None,
        };
        if let Some(join_room) = expired {
            self.pending = None;
            match join_room {
                Some(room_id) => {
                    self.join_attempt_failed(room_id, SessionError::Timeout, &mut events);
                }
                None => {
                    self.fail(SessionError::Timeout);
                    events.push(SessionEvent::Failed(SessionError::Timeout));
                }
            }
        }

        // Scheduled retry.
        if self.retry.as_ref().is_some_and(|r| Instant::now() >= r.due) {
            if let Some(RetryTimer {
                action, attempt, ..
            }) = self.retry.take()
            {
                self.retry_count = attempt;
                match action {
                    RetryAction::Join { room_id } => {
                        tracing::info!(%room_id, attempt, "retrying join");
                        if let Err(err) = self.send_join(&room_id) {
                            self.fail(err.clone());
                            events.push(SessionEvent::Failed(err));
                        }
                    }
                    RetryAction::Reconnect { room_id } => {
                        tracing::info!(attempt, "retrying connection");
                        match self.open() {
                            Ok(()) => {
                                events.push(SessionEvent::Reconnected);
                                self.retry_count = 0;
                                if let Some(room_id) = room_id {
                                    if let Err(err) = self.send_join(&room_id) {
                                        self.fail(err.clone());
                                        events.push(SessionEvent::Failed(err));
                                    }
                                }
                            }
                            Err(err) => self.connection_lost(room_id, err, &mut events),
                        }
                    }
                }
            }
        }

        events
    }

    /// Dial the relay and exchange the greeting. On success the session is
    /// `Connected`; on failure it is left in `Connecting` and the caller
    /// decides whether to retry or fail.
    fn open(&mut self) -> Result<(), SessionError> {
        self.transition(Status::Connecting);
        let (transport, player_id) = open_transport(&self.addr)?;
        self.transport = Some(transport);
        self.player_id = Some(player_id);
        self.transition(Status::Connected);
        Ok(())
    }

    fn send_join(&mut self, room_id: &RoomId) -> Result<(), SessionError> {
        self.send(&ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        })?;
        self.pending = Some(PendingRequest::Join {
            room_id: room_id.clone(),
            deadline: Instant::now() + JOIN_TIMEOUT,
        });
        Ok(())
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), SessionError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(SessionError::Transport("not connected".into()));
        };
        let json =
            serde_json::to_vec(msg).map_err(|e| SessionError::Transport(e.to_string()))?;
        write_message(&mut transport.writer, &json)
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Fold one relay message into the session state.
    fn handle_server_message(&mut self, msg: ServerMessage, events: &mut Vec<SessionEvent>) {
        match msg {
            ServerMessage::Welcome { player_id } => {
                // Greeted during connect; a repeat is harmless.
                self.player_id = Some(player_id);
            }
            ServerMessage::RoomCreated { room_id, role, .. } => {
                self.pending = None;
                self.enter_room(room_id.clone(), role);
                tracing::info!(%room_id, "room created");
                events.push(SessionEvent::RoomCreated { room_id });
            }
            ServerMessage::RoomJoined { room_id, role, .. } => {
                self.pending = None;
                self.retry = None;
                self.retry_count = 0;
                self.enter_room(room_id.clone(), role);
                tracing::info!(%room_id, "joined room");
                events.push(SessionEvent::RoomJoined { room_id });
            }
            ServerMessage::JoinRejected { error } => {
                self.pending = None;
                let (room_id, err) = match error {
                    JoinError::NotFound { room_id } => {
                        (room_id.clone(), SessionError::NotFound(room_id))
                    }
                    JoinError::Full { room_id } => {
                        (room_id.clone(), SessionError::Full(room_id))
                    }
                };
                self.join_attempt_failed(room_id, err, events);
            }
            ServerMessage::PlayerJoined { .. } => {
                events.push(SessionEvent::OpponentJoined);
            }
            ServerMessage::ReadyUpdate {
                host_ready,
                guest_ready,
            } => {
                self.host_ready = host_ready;
                self.guest_ready = guest_ready;
                events.push(SessionEvent::ReadyUpdate {
                    host_ready,
                    guest_ready,
                });
            }
            ServerMessage::GameStart => {
                self.game_started = true;
                events.push(SessionEvent::GameStart);
            }
            ServerMessage::Game {
                sender_id, message, ..
            } => {
                events.push(SessionEvent::Game { sender_id, message });
            }
            ServerMessage::HostDisconnected => {
                // The room is gone with the host. Terminal: no auto-retry,
                // only an explicit disconnect resets the session.
                self.teardown();
                self.fail(SessionError::HostLeft);
                events.push(SessionEvent::Failed(SessionError::HostLeft));
            }
            ServerMessage::GuestDisconnected => {
                self.guest_ready = false;
                self.game_started = false;
                events.push(SessionEvent::OpponentLeft);
            }
        }
    }

    /// A join attempt failed. Transient reasons schedule a backoff retry
    /// until the attempt budget runs out; final reasons settle into Error.
    fn join_attempt_failed(
        &mut self,
        room_id: RoomId,
        err: SessionError,
        events: &mut Vec<SessionEvent>,
    ) {
        if err.is_retryable() && self.retry_count < MAX_RETRY_ATTEMPTS && self.transport.is_some()
        {
            let delay = self.retry_delay(self.retry_count);
            let attempt = self.retry_count + 1;
            tracing::info!(%room_id, attempt, ?delay, error = %err, "join failed, retry scheduled");
            self.retry = Some(RetryTimer {
                action: RetryAction::Join { room_id },
                due: Instant::now() + delay,
                attempt,
            });
            events.push(SessionEvent::JoinRetrying { attempt, delay });
        } else {
            self.fail(err.clone());
            events.push(SessionEvent::Failed(err));
        }
    }

    /// The transport died. Schedule a backoff reconnect until the attempt
    /// budget runs out, then settle into Error with the last failure. The
    /// held room, if any, rides along so a successful reconnect re-joins
    /// it.
    fn connection_lost(
        &mut self,
        held_room: Option<RoomId>,
        err: SessionError,
        events: &mut Vec<SessionEvent>,
    ) {
        if self.retry_count < MAX_RETRY_ATTEMPTS {
            let delay = self.retry_delay(self.retry_count);
            let attempt = self.retry_count + 1;
            tracing::warn!(attempt, ?delay, error = %err, "connection lost, reconnect scheduled");
            self.retry = Some(RetryTimer {
                action: RetryAction::Reconnect { room_id: held_room },
                due: Instant::now() + delay,
                attempt,
            });
            self.transition(Status::Connecting);
            events.push(SessionEvent::Reconnecting { attempt, delay });
        } else {
            self.fail(err.clone());
            events.push(SessionEvent::Failed(err));
        }
    }

    /// Enter the absorbing Error status, keeping the reason.
    fn fail(&mut self, err: SessionError) {
        tracing::warn!(error = %err, "session error");
        self.last_error = Some(err);
        self.pending = None;
        self.retry = None;
        self.transition(Status::Error);
    }

    /// Drop the transport and all room association.
    fn teardown(&mut self) {
        self.transport = None;
        self.room_id = None;
        self.role = None;
        self.host_ready = false;
        self.guest_ready = false;
        self.game_started = false;
        self.pending = None;
        self.retry = None;
    }

    fn enter_room(&mut self, room_id: RoomId, role: Player) {
        self.room_id = Some(room_id);
        self.role = Some(role);
        self.host_ready = false;
        self.guest_ready = false;
        self.game_started = false;
    }

    fn transition(&mut self, next: Status) {
        if self.status != next {
            tracing::debug!(from = ?self.status, to = ?next, "session status");
            self.status = next;
        }
    }

    /// Delay before retry number `retry_count + 1`: base delay doubling
    /// each attempt (2s, 4s, 8s at the default base).
    fn retry_delay(&self, retry_count: u32) -> Duration {
        self.retry_base_delay * 2u32.pow(retry_count)
    }
}

/// Dial `addr`, exchange the `Welcome` greeting, and spawn the reader
/// thread. Blocks for at most the handshake timeout.
fn open_transport(addr: &str) -> Result<(Transport, PlayerId), SessionError> {
    tracing::debug!(%addr, "connecting");
    let stream = TcpStream::connect(addr)
        .map_err(|e| SessionError::Transport(format!("connect failed: {e}")))?;

    // Bound the greeting read so a silent server can't hang us.
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

    let reader_stream = stream
        .try_clone()
        .map_err(|e| SessionError::Transport(format!("clone failed: {e}")))?;
    let writer = BufWriter::new(stream);
    let mut reader = BufReader::new(reader_stream);

    let greeting_bytes = read_message(&mut reader)
        .map_err(|e| SessionError::Transport(format!("read greeting failed: {e}")))?;
    let greeting: ServerMessage = serde_json::from_slice(&greeting_bytes)
        .map_err(|e| SessionError::Transport(format!("parse greeting failed: {e}")))?;
    let player_id = match greeting {
        ServerMessage::Welcome { player_id } => player_id,
        other => {
            return Err(SessionError::Transport(format!(
                "unexpected greeting: {other:?}"
            )));
        }
    };

    // Clear the read timeout for the long-lived reader loop.
    if let Ok(inner) = reader.get_ref().try_clone() {
        inner.set_read_timeout(None).ok();
    }

    let (tx, rx) = mpsc::channel();
    let reader_thread = thread::spawn(move || {
        reader_loop(reader, tx);
    });

    tracing::info!(player = %player_id, "connected to relay");
    Ok((
        Transport {
            writer,
            inbox: rx,
            _reader_thread: reader_thread,
        },
        player_id,
    ))
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(bytes) = read_message(&mut reader) {
        match serde_json::from_slice::<ServerMessage>(&bytes) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Main thread dropped the receiver
                }
            }
            Err(_) => break, // Malformed message
        }
    }
}
