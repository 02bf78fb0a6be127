//! Victory by Continuous Fours — a proof search over forcing four-threats.
//!
//! Before the main search runs, this solver tries to prove a win where
//! every one of our moves creates a four (or an outright five), leaving the
//! opponent a single forced block each turn. The tree is AND/OR: at our
//! nodes any winning four suffices, at the opponent's node the lone block
//! must lose. Because every line is forcing the tree is tiny, so a proved
//! win here skips the whole main search.

use std::time::Instant;

use caro_core::{five_completions, is_win, list_threats, Board, LinePattern, Move, Player};
use tracing::debug;

/// Result of a VCF attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcfOutcome {
    /// A forced win was proved; `mv` starts it, mate in `mate_in` plies.
    Found { mv: Move, mate_in: u8 },
    /// No proof within the depth/time bounds.
    NotFound,
}

/// Telemetry-bearing result.
#[derive(Debug, Clone, Copy)]
pub struct VcfResult {
    pub outcome: VcfOutcome,
    /// OR/AND nodes visited.
    pub nodes: u64,
    /// Deepest ply reached.
    pub depth: u8,
}

/// Bounds on the proof attempt.
#[derive(Debug, Clone, Copy)]
pub struct VcfLimits {
    /// Maximum number of our fours in a line (a depth of `n` proves mates
    /// up to `2n − 1` plies).
    pub max_fours: u8,
    /// Wall-clock cutoff, checked periodically.
    pub deadline: Option<Instant>,
}

struct VcfState {
    nodes: u64,
    max_ply: u8,
    deadline: Option<Instant>,
    out_of_time: bool,
}

impl VcfState {
    fn tick(&mut self, ply: u8) -> bool {
        self.nodes += 1;
        self.max_ply = self.max_ply.max(ply);
        if self.nodes & 0xFF == 0
            && let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.out_of_time = true;
        }
        self.out_of_time
    }
}

/// Attempt to prove a forced win for `side`, iteratively deepening on the
/// number of fours in the line.
pub fn solve(board: &Board, side: Player, limits: VcfLimits) -> VcfResult {
    let mut state = VcfState {
        nodes: 0,
        max_ply: 0,
        deadline: limits.deadline,
        out_of_time: false,
    };

    for fours in 1..=limits.max_fours.max(1) {
        if let Some((mv, mate_in)) = or_node(board, side, fours, 0, &mut state) {
            debug!(mate_in, nodes = state.nodes, "vcf proved a win");
            return VcfResult {
                outcome: VcfOutcome::Found { mv, mate_in },
                nodes: state.nodes,
                depth: state.max_ply,
            };
        }
        if state.out_of_time {
            break;
        }
    }

    VcfResult {
        outcome: VcfOutcome::NotFound,
        nodes: state.nodes,
        depth: state.max_ply,
    }
}

/// Our turn: try every four-creating move. Returns the winning move and the
/// mate distance in plies from this node.
fn or_node(
    board: &Board,
    side: Player,
    fours_left: u8,
    ply: u8,
    state: &mut VcfState,
) -> Option<(Move, u8)> {
    if state.tick(ply) {
        return None;
    }

    // If the opponent already threatens a five, only a move that wins on
    // the spot or sits on their completion square keeps the line forcing.
    let opp_fives = five_completions(board, side.opponent());

    // Strongest creations first, so immediate fives are tried before
    // slower fours.
    for (mv, pattern) in list_threats(board, side) {
        if pattern < LinePattern::ClosedFour {
            break;
        }
        if pattern == LinePattern::Five {
            return Some((mv, 1));
        }
        if fours_left <= 1 {
            continue;
        }
        match opp_fives.len() {
            0 => {}
            1 if opp_fives[0] == mv => {}
            _ => continue,
        }

        let Ok(child) = board.place(mv, side) else {
            continue;
        };

        // The opponent must block every completion of the four we just made.
        let completions = five_completions(&child, side);
        match completions.len() {
            0 => continue,
            1 => {
                let block = completions[0];
                let Ok(after_block) = child.place(block, side.opponent()) else {
                    continue;
                };
                if is_win(&after_block, block, side.opponent()) {
                    continue;
                }
                if let Some((_, mate)) =
                    or_node(&after_block, side, fours_left - 1, ply + 2, state)
                {
                    return Some((mv, mate + 2));
                }
                if state.out_of_time {
                    return None;
                }
            }
            // Two or more completions: no single block answers them all.
            _ => return Some((mv, 3)),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(stones: &[(u8, u8, Player)]) -> Board {
        let mut board = Board::new(15).unwrap();
        for &(x, y, p) in stones {
            board = board.place(Move::new(x, y), p).unwrap();
        }
        board
    }

    fn unlimited(max_fours: u8) -> VcfLimits {
        VcfLimits {
            max_fours,
            deadline: None,
        }
    }

    #[test]
    fn immediate_five_is_mate_in_one() {
        let board = board_with(&[
            (7, 7, Player::First),
            (7, 8, Player::First),
            (7, 9, Player::First),
            (7, 10, Player::First),
            (1, 1, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(4));
        match result.outcome {
            VcfOutcome::Found { mv, mate_in } => {
                assert_eq!(mate_in, 1);
                assert!(mv == Move::new(7, 6) || mv == Move::new(7, 11));
            }
            VcfOutcome::NotFound => panic!("should find the immediate five"),
        }
    }

    #[test]
    fn open_three_converts_to_mate_in_three() {
        // An open three with free space: the four it grows into has two
        // completions, which no single block can cover.
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (1, 1, Player::Second),
            (2, 1, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(4));
        match result.outcome {
            VcfOutcome::Found { mv, mate_in } => {
                assert_eq!(mate_in, 3);
                assert!(
                    mv == Move::new(7, 5) || mv == Move::new(7, 9),
                    "expected an open-four creation, got {mv}"
                );
            }
            VcfOutcome::NotFound => panic!("open three should convert by continuous fours"),
        }
    }

    #[test]
    fn quiet_position_has_no_proof() {
        let board = board_with(&[
            (7, 7, Player::First),
            (8, 8, Player::Second),
            (9, 7, Player::First),
            (6, 8, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(6));
        assert_eq!(result.outcome, VcfOutcome::NotFound);
        assert!(result.nodes >= 1);
    }

    #[test]
    fn blocked_three_cannot_convert() {
        // The three is capped on one side; its only four is closed, the
        // opponent blocks the single completion, and nothing follows.
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (7, 5, Player::Second),
            (1, 1, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(4));
        assert_eq!(result.outcome, VcfOutcome::NotFound);
    }

    #[test]
    fn opponent_pending_five_blocks_slow_fours() {
        // First has an open three, but Second already has four in a row:
        // any non-winning First four lets Second complete first.
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (11, 2, Player::Second),
            (11, 3, Player::Second),
            (11, 4, Player::Second),
            (11, 5, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(4));
        assert_eq!(result.outcome, VcfOutcome::NotFound);
    }

    #[test]
    fn depth_one_only_finds_direct_fives() {
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (1, 1, Player::Second),
            (2, 1, Player::Second),
        ]);
        let result = solve(&board, Player::First, unlimited(1));
        assert_eq!(result.outcome, VcfOutcome::NotFound);
    }
}
