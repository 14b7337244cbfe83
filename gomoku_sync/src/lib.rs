// Turn-authoritative synchronization over the relay protocol.
//
// `GameSync` wraps the pure rule engine (`gomoku_rules`) with multiplayer
// turn ownership and protocol translation. Each participant owns one
// instance; the two instances are independent copies kept convergent by the
// protocol, never a shared object. Outgoing actions return the
// `GamePayload` to send through the connection session; incoming payloads
// are applied through `apply_remote`, which re-validates every remote move
// against the local board before applying; a move referencing an occupied
// cell or the wrong turn is discarded, not applied. Both sides then run the
// identical placement/win/draw computation, so they converge by independent
// deterministic recomputation rather than by trusting transmitted state.
//
// Local (non-networked) mode drives the same engine without turn gating or
// message emission: undo pops one move instead of two and it is always the
// player's turn.

use thiserror::Error;

use gomoku_protocol::GamePayload;
use gomoku_rules::{BOARD_SIZE, GameState, Move, Player, Pos};

/// Whether this instance is a side of a networked game or a local hot-seat
/// game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Both colors played at one board; no messages, single-move undo.
    Local,
    /// One side of a relayed game. `role` is this participant's committed
    /// color (host = black, guest = white), fixed for the room's lifetime.
    Networked { role: Player, is_host: bool },
}

/// Why a local move was rejected. Rejected moves change nothing and emit
/// nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("coordinates are off the board")]
    OutOfBounds,
    #[error("cell is already occupied")]
    CellOccupied,
    #[error("the game is over")]
    GameOver,
}

/// Why an undo request was a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum UndoError {
    #[error("only the host can undo in a networked game")]
    NotHost,
    #[error("not enough moves to undo")]
    NotEnoughMoves,
}

/// One participant's authoritative copy of the shared game.
#[derive(Clone, Debug)]
pub struct GameSync {
    state: GameState,
    winning_line: Vec<Pos>,
    mode: Mode,
}

impl GameSync {
    /// A local hot-seat game.
    pub fn local() -> Self {
        Self::with_mode(Mode::Local)
    }

    /// One side of a networked game, with the committed color fixed up
    /// front, before any remote message can be processed.
    pub fn networked(role: Player, is_host: bool) -> Self {
        Self::with_mode(Mode::Networked { role, is_host })
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            state: GameState::new(),
            winning_line: Vec::new(),
            mode,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True when this participant may submit a move. Networked: the shared
    /// turn equals our committed color and the game is live. Local: always.
    pub fn is_my_turn(&self) -> bool {
        match self.mode {
            Mode::Local => true,
            Mode::Networked { role, .. } => {
                self.state.current_player == role && !self.state.game_over
            }
        }
    }

    /// Submit a move at (row, col). On success the state is updated
    /// (placement, win/draw, highlight set) and, in networked mode, the
    /// `Move` payload to emit to the opponent is returned.
    pub fn make_move(&mut self, row: usize, col: usize) -> Result<Option<GamePayload>, MoveError> {
        if self.state.game_over {
            return Err(MoveError::GameOver);
        }
        if !self.is_my_turn() {
            return Err(MoveError::NotYourTurn);
        }
        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(MoveError::OutOfBounds);
        }
        if !self.state.board.is_empty_cell(row, col) {
            return Err(MoveError::CellOccupied);
        }

        let player = match self.mode {
            Mode::Local => self.state.current_player,
            Mode::Networked { role, .. } => role,
        };
        self.state.apply_move(Move { row, col, player });
        self.refresh_winning_line();

        Ok(match self.mode {
            Mode::Local => None,
            Mode::Networked { .. } => Some(GamePayload::Move { row, col, player }),
        })
    }

    /// Apply a payload received from the opponent. Returns false when the
    /// payload was discarded (stale or illegal); the local state is then
    /// unchanged.
    pub fn apply_remote(&mut self, payload: &GamePayload) -> bool {
        match payload {
            GamePayload::Move { row, col, player } => self.apply_remote_move(*row, *col, *player),
            GamePayload::Restart => {
                // Last-restart-wins: a remote restart always resets, even if
                // we restarted ourselves moments ago; both converge on the
                // same fresh state.
                self.reset();
                true
            }
            GamePayload::Undo => {
                if self.state.move_history.len() < 2 {
                    return false;
                }
                self.pop_moves(2);
                true
            }
            // Informational payloads: no game-state effect here.
            GamePayload::StartGame | GamePayload::RoomInfo { .. } | GamePayload::PlayerReady => true,
        }
    }

    /// Defensive re-validation of a remote move: bounds, cell emptiness,
    /// and turn ownership (the move's color must be the color whose turn it
    /// is). A stale move (e.g. one in flight across a restart) fails the
    /// ownership check and is discarded.
    fn apply_remote_move(&mut self, row: usize, col: usize, player: Player) -> bool {
        if self.state.game_over
            || !self.state.board.is_empty_cell(row, col)
            || player != self.state.current_player
        {
            return false;
        }
        self.state.apply_move(Move { row, col, player });
        self.refresh_winning_line();
        true
    }

    /// Reset to a fresh game. In networked mode returns the `Restart`
    /// payload to emit so the opponent mirrors the reset.
    pub fn restart(&mut self) -> Option<GamePayload> {
        self.reset();
        match self.mode {
            Mode::Local => None,
            Mode::Networked { .. } => Some(GamePayload::Restart),
        }
    }

    /// Undo. Local mode pops exactly one move; networked mode pops exactly
    /// two (one per player) and is restricted to the host. The remaining
    /// history is replayed from the empty board, which by construction
    /// lands in a non-terminal state.
    pub fn undo(&mut self) -> Result<Option<GamePayload>, UndoError> {
        match self.mode {
            Mode::Local => {
                if self.state.move_history.is_empty() {
                    return Err(UndoError::NotEnoughMoves);
                }
                self.pop_moves(1);
                Ok(None)
            }
            Mode::Networked { is_host, .. } => {
                if !is_host {
                    return Err(UndoError::NotHost);
                }
                if self.state.move_history.len() < 2 {
                    return Err(UndoError::NotEnoughMoves);
                }
                self.pop_moves(2);
                Ok(Some(GamePayload::Undo))
            }
        }
    }

    /// Membership test against the current winning-line highlight set.
    /// Presentation only, never used for game logic.
    pub fn is_winning_position(&self, row: usize, col: usize) -> bool {
        self.winning_line.contains(&Pos::new(row, col))
    }

    pub fn winning_line(&self) -> &[Pos] {
        &self.winning_line
    }

    fn reset(&mut self) {
        self.state = GameState::new();
        self.winning_line.clear();
    }

    fn pop_moves(&mut self, count: usize) {
        let keep = self.state.move_history.len() - count;
        self.state = GameState::replay(&self.state.move_history[..keep]);
        self.winning_line.clear();
    }

    fn refresh_winning_line(&mut self) {
        self.winning_line = match self.state.winner {
            Some(winner) => self.state.board.winning_line(winner),
            None => Vec::new(),
        };
    }
}
