// Game state: board + turn + history.
//
// Invariants maintained here:
// - `board` is always exactly the replay of `move_history` from empty.
// - `current_player` alternates strictly with the history length (black on
//   even counts) unless the game is over.
// - `winner` is set only when `game_over` is true.
//
// Undo is implemented as replay: pop moves from the tail, rebuild the board
// from empty. Replay of a truncated history always lands in a non-terminal
// state, since the popped moves are the ones that caused the terminal
// condition.

use crate::board::{Board, Move, Player};

/// Full state of one game, owned by exactly one participant. Networked play
/// keeps two convergent copies, one per side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    pub board: Board,
    pub current_player: Player,
    pub winner: Option<Player>,
    pub game_over: bool,
    pub move_history: Vec<Move>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// A fresh game: empty board, black to move.
    pub fn new() -> Self {
        Self {
            board: Board::new(),
            current_player: Player::Black,
            winner: None,
            game_over: false,
            move_history: Vec::new(),
        }
    }

    /// Apply one move: place the stone, append to history, recompute
    /// win/draw, and advance the turn unless the move ended the game.
    ///
    /// Returns false with the state unchanged if the game is already over or
    /// the target cell is occupied or out of range. Turn ownership is *not*
    /// checked here; that is the synchronization layer's job.
    pub fn apply_move(&mut self, m: Move) -> bool {
        if self.game_over || !self.board.is_empty_cell(m.row, m.col) {
            return false;
        }

        let board = self.board.place(m.row, m.col, m.player);
        let win = board.check_win(m.row, m.col);
        let draw = !win && board.is_full();

        self.board = board;
        self.move_history.push(m);
        self.winner = if win { Some(m.player) } else { None };
        self.game_over = win || draw;
        if !self.game_over {
            self.current_player = self.current_player.other();
        }
        true
    }

    /// Rebuild a state from a move sequence, replaying from the empty board.
    /// The turn is derived from the history length (black on even counts)
    /// and any terminal flags are cleared. This is the undo primitive, and
    /// undo by construction removes the terminating moves.
    pub fn replay(history: &[Move]) -> Self {
        let mut board = Board::new();
        for m in history {
            board = board.place(m.row, m.col, m.player);
        }
        Self {
            board,
            current_player: if history.len() % 2 == 0 {
                Player::Black
            } else {
                Player::White
            },
            winner: None,
            game_over: false,
            move_history: history.to_vec(),
        }
    }
}
