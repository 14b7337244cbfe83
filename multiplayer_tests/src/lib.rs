// Test-only player harness for multiplayer integration tests.
//
// Wraps a real `Session` (from `gomoku_relay::client`) and a real
// `GameSync` (from `gomoku_sync`) to provide a synchronous, test-friendly
// API for exercising the full multiplayer pipeline:
// host → relay → join → ready → move → relay → opponent applies → verify.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `Session::poll()`). All networking and game logic
// uses the same code paths as the real game.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::thread;
use std::time::{Duration, Instant};

use gomoku_protocol::types::RoomId;
use gomoku_relay::client::{Session, SessionEvent};
use gomoku_sync::GameSync;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test player wrapping a real Session and GameSync.
pub struct TestPlayer {
    pub session: Session,
    pub sync: Option<GameSync>,
}

impl TestPlayer {
    /// Connect to a relay server and wait for the Welcome greeting.
    pub fn connect(addr: std::net::SocketAddr) -> Self {
        let session =
            Session::connect(&addr.to_string()).expect("TestPlayer::connect failed");
        Self {
            session,
            sync: None,
        }
    }

    /// Drain session events once, folding game traffic into the sync
    /// layer: GameStart initializes it, relayed payloads are applied.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let events = self.session.poll();
        for event in &events {
            match event {
                SessionEvent::GameStart => {
                    let role = self.session.role().expect("game started without a role");
                    self.sync = Some(GameSync::networked(role, self.session.is_host()));
                }
                SessionEvent::Game { message, .. } => {
                    if let Some(sync) = self.sync.as_mut() {
                        sync.apply_remote(&message.payload);
                    }
                }
                _ => {}
            }
        }
        events
    }

    /// Blocking pump until `pred` matches an event. Returns every event
    /// seen up to and including the matching batch.
    pub fn wait_for(
        &mut self,
        what: &str,
        mut pred: impl FnMut(&SessionEvent) -> bool,
    ) -> Vec<SessionEvent> {
        let start = Instant::now();
        let mut seen = Vec::new();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {what}"
            );
            let events = self.pump();
            let hit = events.iter().any(&mut pred);
            seen.extend(events);
            if hit {
                return seen;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking pump until the sync layer satisfies `pred`.
    pub fn wait_for_state(&mut self, what: &str, mut pred: impl FnMut(&GameSync) -> bool) {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {what}"
            );
            self.pump();
            if let Some(sync) = &self.sync {
                if pred(sync) {
                    return;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Create a room and block until the relay confirms it.
    pub fn create_room(&mut self) -> RoomId {
        self.session
            .request_create_room()
            .expect("request_create_room failed");
        self.wait_for("RoomCreated", |e| {
            matches!(e, SessionEvent::RoomCreated { .. })
        });
        self.session
            .room_id()
            .expect("no room after RoomCreated")
            .clone()
    }

    /// Join a room by code and block until seated.
    pub fn join_room(&mut self, room_id: &RoomId) {
        self.session
            .request_join(room_id.as_str())
            .expect("request_join failed");
        self.wait_for("RoomJoined", |e| {
            matches!(e, SessionEvent::RoomJoined { .. })
        });
    }

    /// Declare ready. GameStart arrives through `pump`.
    pub fn ready(&mut self) {
        self.session.set_ready().expect("set_ready failed");
    }

    /// Block until the game has started and the sync layer exists.
    pub fn wait_for_game_start(&mut self) {
        if self.sync.is_some() {
            return;
        }
        self.wait_for("GameStart", |e| matches!(e, SessionEvent::GameStart));
    }

    pub fn sync(&self) -> &GameSync {
        self.sync.as_ref().expect("game not started")
    }

    /// Place a stone locally and send it to the opponent.
    pub fn make_move(&mut self, row: usize, col: usize) {
        let payload = self
            .sync
            .as_mut()
            .expect("game not started")
            .make_move(row, col)
            .expect("move rejected locally")
            .expect("networked mode always emits a payload");
        self.session.send_game(payload).expect("send move failed");
    }

    /// Reset the local game and tell the opponent to do the same.
    pub fn restart(&mut self) {
        if let Some(payload) = self.sync.as_mut().expect("game not started").restart() {
            self.session.send_game(payload).expect("send restart failed");
        }
    }

    /// Take back the last move pair and tell the opponent.
    pub fn undo(&mut self) {
        let payload = self
            .sync
            .as_mut()
            .expect("game not started")
            .undo()
            .expect("undo rejected locally");
        if let Some(payload) = payload {
            self.session.send_game(payload).expect("send undo failed");
        }
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }
}
