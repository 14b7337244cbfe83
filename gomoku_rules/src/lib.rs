// Pure rule engine for Gomoku (five in a row).
//
// This crate is the deterministic core shared by both sides of a networked
// game. It has no I/O and no hidden state: both clients re-run the same
// placement and win/draw computation on their own board copy, which is what
// keeps two independently-rendered games convergent without either side
// trusting a transmitted board.
//
// Module overview:
// - `board.rs`:  `Player`, `Pos`, `Move`, the 15×15 `Board` value type,
//                win detection, and winning-line extraction.
// - `state.rs`:  `GameState`: board + turn + history, move application,
//                and replay-from-empty (the undo primitive).

pub mod board;
pub mod state;

pub use board::{BOARD_SIZE, Board, Move, Player, Pos, WIN_LENGTH};
pub use state::GameState;
