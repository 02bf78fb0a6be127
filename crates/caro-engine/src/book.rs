//! Opening-book lookup keyed by symmetry-canonical position hashes.
//!
//! A Caro position has eight dihedral images (four rotations times an
//! optional mirror). The book stores every position under its
//! lexicographically-minimal image hash, together with moves expressed in
//! that canonical frame; lookups canonicalise the queried board, remember
//! which transform got there, and map the stored reply back through the
//! inverse transform into the caller's frame.

use std::collections::HashMap;

use caro_core::{zobrist, Board, Move, Player};
use rand::rngs::SmallRng;
use rand::Rng;
use tracing::debug;

/// Key of a canonical book entry: `(canonical hash, side to move)`.
pub type BookKey = (u64, u8);

/// Most replies stored per position.
pub const MAX_REPLIES: usize = 4;

/// The narrow capability the lookup needs from a book backend.
///
/// The generator that populates a store lives outside the core; SQLite is
/// one valid backend, [`MemoryBook`] is the in-process one.
pub trait BookStore {
    /// The stored replies for a canonical key, in the canonical frame.
    fn lookup_canonical(&self, key: BookKey) -> &[Move];
}

/// One of the eight dihedral symmetries of the square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Rot90,
    Rot180,
    Rot270,
    Mirror,
    MirrorRot90,
    MirrorRot180,
    MirrorRot270,
}

impl Transform {
    /// All eight symmetries.
    pub const ALL: [Transform; 8] = [
        Transform::Identity,
        Transform::Rot90,
        Transform::Rot180,
        Transform::Rot270,
        Transform::Mirror,
        Transform::MirrorRot90,
        Transform::MirrorRot180,
        Transform::MirrorRot270,
    ];

    /// Apply to a move on a board of side length `size`.
    pub fn apply(self, mv: Move, size: u8) -> Move {
        let n = size - 1;
        let (x, y) = (mv.x(), mv.y());
        let (tx, ty) = match self {
            Transform::Identity => (x, y),
            Transform::Rot90 => (n - y, x),
            Transform::Rot180 => (n - x, n - y),
            Transform::Rot270 => (y, n - x),
            Transform::Mirror => (n - x, y),
            Transform::MirrorRot90 => (n - y, n - x),
            Transform::MirrorRot180 => (x, n - y),
            Transform::MirrorRot270 => (y, x),
        };
        Move::new(tx, ty)
    }

    /// The transform undoing this one.
    pub fn inverse(self) -> Transform {
        match self {
            Transform::Rot90 => Transform::Rot270,
            Transform::Rot270 => Transform::Rot90,
            other => other,
        }
    }
}

/// The canonical hash of `board` and the transform that reaches it.
pub fn canonical_key(board: &Board) -> (u64, Transform) {
    let size = board.size();
    let mut best_hash = u64::MAX;
    let mut best_transform = Transform::Identity;

    for transform in Transform::ALL {
        let hash = zobrist::hash_stones(
            board
                .stone_list()
                .map(|(mv, player)| (transform.apply(mv, size), player)),
            size,
        );
        if hash < best_hash {
            best_hash = hash;
            best_transform = transform;
        }
    }
    (best_hash, best_transform)
}

/// In-memory book backend.
#[derive(Debug, Default)]
pub struct MemoryBook {
    entries: HashMap<BookKey, Vec<Move>>,
}

impl MemoryBook {
    /// Empty book.
    pub fn new() -> MemoryBook {
        MemoryBook::default()
    }

    /// Record `mv` as a reply to `board` with `side` to move.
    ///
    /// The position and move are canonicalised before storage. At most
    /// [`MAX_REPLIES`] distinct replies are kept per position.
    pub fn insert(&mut self, board: &Board, side: Player, mv: Move) {
        let (hash, transform) = canonical_key(board);
        let canonical_mv = transform.apply(mv, board.size());
        let replies = self.entries.entry((hash, side.index() as u8)).or_default();
        if !replies.contains(&canonical_mv) && replies.len() < MAX_REPLIES {
            replies.push(canonical_mv);
        }
    }

    /// Number of stored positions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the book holds no positions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BookStore for MemoryBook {
    fn lookup_canonical(&self, key: BookKey) -> &[Move] {
        self.entries.get(&key).map_or(&[], Vec::as_slice)
    }
}

/// Look up a book reply for `board`, mapped into the board's own frame.
///
/// Returns `None` past `max_ply`, on a book miss, or when no stored reply
/// is legal on the queried board. Multiple replies are picked uniformly
/// with the caller's (seedable) generator.
pub fn lookup<S: BookStore + ?Sized>(
    store: &S,
    board: &Board,
    side: Player,
    max_ply: u16,
    rng: &mut SmallRng,
) -> Option<Move> {
    if board.stones() > max_ply {
        return None;
    }

    let (hash, transform) = canonical_key(board);
    let replies = store.lookup_canonical((hash, side.index() as u8));
    if replies.is_empty() {
        return None;
    }

    let inverse = transform.inverse();
    let legal: Vec<Move> = replies
        .iter()
        .map(|&mv| inverse.apply(mv, board.size()))
        .filter(|&mv| {
            board.player_at(mv.x(), mv.y()).is_none() && !board.open_rule_violation(mv, side)
        })
        .collect();
    if legal.is_empty() {
        return None;
    }

    let choice = legal[rng.gen_range(0..legal.len())];
    debug!(mv = %choice, ply = board.stones(), "opening book hit");
    Some(choice)
}
