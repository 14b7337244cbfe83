// Board representation and win detection.
//
// The board is a fixed 15×15 grid of `Option<Player>`. It is a value type:
// `place` returns a new board instead of mutating in place, so snapshots in
// the move history can never alias a board that is later modified.
//
// Win detection walks outward from the just-placed cell in both directions
// of each of the four axes (horizontal, vertical, both diagonals), counting
// contiguous same-color cells including the placed one. A total of 5 or more
// on any axis is a win; runs longer than 5 count, they are not special.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the square board.
pub const BOARD_SIZE: usize = 15;

/// Number of contiguous same-color cells required to win.
pub const WIN_LENGTH: usize = 5;

/// The four axes a winning run can lie on, as (row, col) steps. Each axis is
/// walked in both the positive and negative direction of its step.
const AXES: [(isize, isize); 4] = [
    (0, 1),  // horizontal
    (1, 0),  // vertical
    (1, 1),  // diagonal \
    (1, -1), // diagonal /
];

/// A stone color. The host always plays black and moves first; the guest
/// always plays white.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    Black,
    White,
}

impl Player {
    /// The opposing color.
    pub fn other(self) -> Self {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::Black => write!(f, "black"),
            Player::White => write!(f, "white"),
        }
    }
}

/// A board coordinate. Valid coordinates are in `[0, BOARD_SIZE)` on both
/// axes; anything else is invalid and must be rejected before it reaches the
/// board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// One placed stone. Moves are only ever appended to the history, except for
/// undo, which pops from the tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub row: usize,
    pub col: usize,
    pub player: Player,
}

/// The 15×15 board. Cheap to clone; every mutation goes through `place`,
/// which returns a new value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<Player>; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// A fresh all-empty board.
    pub fn new() -> Self {
        Self {
            cells: [[None; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// The cell contents, or `None` for empty *or* out-of-range coordinates.
    /// Callers that need to distinguish use `is_empty_cell`.
    pub fn get(&self, row: usize, col: usize) -> Option<Player> {
        if row < BOARD_SIZE && col < BOARD_SIZE {
            self.cells[row][col]
        } else {
            None
        }
    }

    /// True iff the coordinates are in range and the cell holds no stone.
    /// Out-of-range coordinates are never "empty".
    pub fn is_empty_cell(&self, row: usize, col: usize) -> bool {
        row < BOARD_SIZE && col < BOARD_SIZE && self.cells[row][col].is_none()
    }

    /// Return a new board with the stone placed, if the cell was empty.
    /// On an occupied or out-of-range cell the input board is returned
    /// unchanged; callers check `is_empty_cell` before relying on the
    /// placement having happened.
    pub fn place(&self, row: usize, col: usize, player: Player) -> Board {
        let mut next = self.clone();
        if self.is_empty_cell(row, col) {
            next.cells[row][col] = Some(player);
        }
        next
    }

    /// True iff no empty cell remains (draw condition, checked after wins).
    pub fn is_full(&self) -> bool {
        self.cells
            .iter()
            .all(|row| row.iter().all(|cell| cell.is_some()))
    }

    /// True iff the stone at (row, col) is part of a run of `WIN_LENGTH` or
    /// more along any axis. Returns false for an empty cell.
    pub fn check_win(&self, row: usize, col: usize) -> bool {
        let Some(player) = self.get(row, col) else {
            return false;
        };
        AXES.iter()
            .any(|&axis| self.run_length(row, col, axis, player) >= WIN_LENGTH)
    }

    /// All positions belonging to a winning run of `player`, deduplicated
    /// across overlapping runs. For each winning axis the run is walked back
    /// to its start and exactly the first `WIN_LENGTH` positions are taken,
    /// even when the run is longer.
    pub fn winning_line(&self, player: Player) -> Vec<Pos> {
        let mut line: Vec<Pos> = Vec::new();
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                if self.cells[row][col] != Some(player) || !self.check_win(row, col) {
                    continue;
                }
                for &axis in &AXES {
                    if self.run_length(row, col, axis, player) < WIN_LENGTH {
                        continue;
                    }
                    for pos in self.line_positions(row, col, axis, player) {
                        if !line.contains(&pos) {
                            line.push(pos);
                        }
                    }
                }
            }
        }
        line
    }

    /// Stone at signed coordinates, `None` when off the board.
    fn cell_signed(&self, row: isize, col: isize) -> Option<Player> {
        if (0..BOARD_SIZE as isize).contains(&row) && (0..BOARD_SIZE as isize).contains(&col) {
            self.cells[row as usize][col as usize]
        } else {
            None
        }
    }

    /// Length of the contiguous same-color run through (row, col) along one
    /// axis, counting the cell itself plus both directions.
    fn run_length(&self, row: usize, col: usize, (dr, dc): (isize, isize), player: Player) -> usize {
        let mut count = 1;
        let (mut r, mut c) = (row as isize + dr, col as isize + dc);
        while self.cell_signed(r, c) == Some(player) {
            count += 1;
            r += dr;
            c += dc;
        }
        let (mut r, mut c) = (row as isize - dr, col as isize - dc);
        while self.cell_signed(r, c) == Some(player) {
            count += 1;
            r -= dr;
            c -= dc;
        }
        count
    }

    /// The first `WIN_LENGTH` positions of the run through (row, col) along
    /// one axis, starting from the run's start. Empty when the run is too
    /// short to be a win.
    fn line_positions(
        &self,
        row: usize,
        col: usize,
        (dr, dc): (isize, isize),
        player: Player,
    ) -> Vec<Pos> {
        // Walk back to the start of the contiguous run.
        let (mut r, mut c) = (row as isize, col as isize);
        while self.cell_signed(r - dr, c - dc) == Some(player) {
            r -= dr;
            c -= dc;
        }

        let mut positions = Vec::new();
        while self.cell_signed(r, c) == Some(player) {
            positions.push(Pos::new(r as usize, c as usize));
            r += dr;
            c += dc;
        }

        if positions.len() >= WIN_LENGTH {
            positions.truncate(WIN_LENGTH);
            positions
        } else {
            Vec::new()
        }
    }
}
