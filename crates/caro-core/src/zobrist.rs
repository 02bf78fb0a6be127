//! Zobrist hashing keys for position identity.
//!
//! Keys are generated at compile time from a fixed seed, so a replayed
//! position hashes identically across processes and across runs.

use crate::caro_move::Move;
use crate::player::Player;

/// Cells on the largest supported board (32×32).
pub const MAX_CELLS: usize = 1024;

const SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// One step of the xorshift64 generator; returns `(value, next_state)`.
const fn xorshift64(mut state: u64) -> (u64, u64) {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    (state, state)
}

/// Zobrist key for each (player, cell) pair.
static CELL_PLAYER: [[u64; MAX_CELLS]; Player::COUNT] = {
    let mut table = [[0u64; MAX_CELLS]; Player::COUNT];
    let mut state = SEED;
    let mut player = 0;
    while player < Player::COUNT {
        let mut cell = 0;
        while cell < MAX_CELLS {
            let (val, next) = xorshift64(state);
            table[player][cell] = val;
            state = next;
            cell += 1;
        }
        player += 1;
    }
    table
};

/// The key XORed into a board hash when `player` places on `cell`.
///
/// `cell` is a row-major index on the board's own side length; boards of
/// different sizes deliberately use the same key table, so identical stone
/// layouts on different sizes can hash alike — board size is part of the
/// position identity at a higher level.
#[inline]
pub fn key(cell: usize, player: Player) -> u64 {
    CELL_PLAYER[player.index()][cell]
}

/// Hash for a full stone set, used to cross-check incremental updates and by
/// opening-book canonicalisation (which hashes transformed stone layouts).
pub fn hash_stones(stones: impl Iterator<Item = (Move, Player)>, size: u8) -> u64 {
    let mut hash = 0;
    for (mv, player) in stones {
        hash ^= key(mv.cell(size), player);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(key(0, Player::First), key(0, Player::First));
        assert_ne!(key(0, Player::First), key(0, Player::Second));
        assert_ne!(key(0, Player::First), key(1, Player::First));
    }

    #[test]
    fn no_zero_keys() {
        for player in Player::ALL {
            for cell in 0..MAX_CELLS {
                assert_ne!(key(cell, player), 0, "zero key at {cell}");
            }
        }
    }

    #[test]
    fn hash_stones_is_order_independent() {
        let a = Move::new(3, 4);
        let b = Move::new(7, 7);
        let h1 = hash_stones([(a, Player::First), (b, Player::Second)].into_iter(), 15);
        let h2 = hash_stones([(b, Player::Second), (a, Player::First)].into_iter(), 15);
        assert_eq!(h1, h2);
    }
}
