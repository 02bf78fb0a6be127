//! The Caro board: per-player stone planes, stone count, and position hash.

use std::fmt;

use crate::bitgrid::{BitGrid, EdgeMasks};
use crate::caro_move::Move;
use crate::error::BoardError;
use crate::player::Player;
use crate::zobrist;

/// Smallest supported side length (a five-in-a-row needs five cells).
pub const MIN_SIZE: u8 = 5;

/// Largest supported side length.
pub const MAX_SIZE: u8 = 32;

/// An immutable position snapshot.
///
/// The two bit planes are the source of truth for stone placement; the hash
/// is maintained incrementally and always consistent with them. Boards are
/// `Copy` — [`place`](Board::place) returns a new snapshot, which is how the
/// search descends without allocation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Board {
    planes: [BitGrid; Player::COUNT],
    size: u8,
    stones: u16,
    hash: u64,
}

impl Board {
    /// Empty board of side length `size`.
    pub fn new(size: u8) -> Result<Board, BoardError> {
        if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
            return Err(BoardError::InvalidSize { size });
        }
        Ok(Board {
            planes: [BitGrid::new(size), BitGrid::new(size)],
            size,
            stones: 0,
            hash: 0,
        })
    }

    /// Side length of the board.
    #[inline]
    pub const fn size(&self) -> u8 {
        self.size
    }

    /// Zobrist hash of the position.
    #[inline]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Total number of stones placed, which is also the current ply.
    #[inline]
    pub const fn stones(&self) -> u16 {
        self.stones
    }

    /// Whether every cell holds a stone.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.stones as u32 == self.size as u32 * self.size as u32
    }

    /// Whether `(x, y)` lies on the board.
    #[inline]
    pub const fn in_bounds(&self, x: u8, y: u8) -> bool {
        x < self.size && y < self.size
    }

    /// The player occupying `(x, y)`, if any.
    pub fn player_at(&self, x: u8, y: u8) -> Option<Player> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let cell = y as usize * self.size as usize + x as usize;
        Player::ALL
            .into_iter()
            .find(|p| self.planes[p.index()].test(cell))
    }

    /// The given player's stone plane.
    #[inline]
    pub const fn bits(&self, player: Player) -> &BitGrid {
        &self.planes[player.index()]
    }

    /// Union of both stone planes.
    #[inline]
    pub fn occupied(&self) -> BitGrid {
        self.planes[0] | self.planes[1]
    }

    /// All empty cells.
    #[inline]
    pub fn empties(&self) -> BitGrid {
        !self.occupied()
    }

    /// Place a stone, returning the successor position.
    pub fn place(&self, mv: Move, player: Player) -> Result<Board, BoardError> {
        if mv.is_none() || !self.in_bounds(mv.x(), mv.y()) {
            return Err(BoardError::OutOfBounds {
                x: mv.x(),
                y: mv.y(),
            });
        }
        let cell = mv.cell(self.size);
        if self.occupied().test(cell) {
            return Err(BoardError::CellOccupied {
                x: mv.x(),
                y: mv.y(),
            });
        }
        let mut next = *self;
        next.planes[player.index()] = next.planes[player.index()].with(cell);
        next.stones += 1;
        next.hash ^= zobrist::key(cell, player);
        Ok(next)
    }

    /// The centre cell (rounded down for even sizes).
    #[inline]
    pub const fn center(&self) -> Move {
        Move::new(self.size / 2, self.size / 2)
    }

    /// Empty cells worth considering as moves: those within Chebyshev
    /// distance 2 of an existing stone. Caro play is local — a stone far
    /// from every other stone neither threatens nor defends anything.
    ///
    /// On an empty board the single candidate is the centre.
    pub fn candidates(&self) -> BitGrid {
        if self.stones == 0 {
            return BitGrid::new(self.size).with(self.center().cell(self.size));
        }
        let masks = EdgeMasks::new(self.size);
        let occupied = self.occupied();
        occupied.dilate(&masks).dilate(&masks) & !occupied
    }

    /// Whether placing `mv` as `player` would violate the Open Rule: the
    /// first player's second stone must land outside the central 3×3.
    pub fn open_rule_violation(&self, mv: Move, player: Player) -> bool {
        if player != Player::First || self.planes[Player::First.index()].count() != 1 {
            return false;
        }
        let c = self.center();
        mv.x().abs_diff(c.x()) <= 1 && mv.y().abs_diff(c.y()) <= 1
    }

    /// Iterate over all stones as `(move, player)` pairs.
    pub fn stone_list(&self) -> impl Iterator<Item = (Move, Player)> + '_ {
        Player::ALL.into_iter().flat_map(move |p| {
            self.planes[p.index()]
                .iter()
                .map(move |cell| (Move::from_cell(cell, self.size), p))
        })
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Board {}x{} ({} stones)", self.size, self.size, self.stones)?;
        for y in 0..self.size {
            for x in 0..self.size {
                let c = match self.player_at(x, y) {
                    Some(Player::First) => 'X',
                    Some(Player::Second) => 'O',
                    None => '.',
                };
                write!(f, "{c} ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
