//! Error types for board construction and stone placement.

use thiserror::Error;

/// Errors from validating or mutating a [`Board`](crate::board::Board).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    /// The requested side length is outside the supported range.
    #[error("board size {size} is outside the supported 5..=32 range")]
    InvalidSize {
        /// The rejected side length.
        size: u8,
    },
    /// The move's coordinates fall outside the board.
    #[error("cell ({x}, {y}) is out of bounds")]
    OutOfBounds {
        /// Column of the rejected move.
        x: u8,
        /// Row of the rejected move.
        y: u8,
    },
    /// The target cell already holds a stone.
    #[error("cell ({x}, {y}) is already occupied")]
    CellOccupied {
        /// Column of the rejected move.
        x: u8,
        /// Row of the rejected move.
        y: u8,
    },
}
