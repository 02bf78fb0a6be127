//! Staged move picker.
//!
//! Moves are yielded lazily, strongest class first, and each stage is only
//! computed when the previous one runs dry — a node that cuts on the hash
//! move never pays for threat analysis:
//!
//! 1. hash move, 2. must-block, 3. winning moves, 4. threat moves,
//! 5. killers, 6. counter-move, 7. history-scored quiet moves.
//!
//! A move yielded by an earlier stage is skipped later. The picker also
//! labels each yield as priority or not, so late-move reduction can leave
//! hash moves, must-blocks, killers, and explicit threats unreduced.

use caro_core::{
    classify_all, classify_move, five_completions, BitGrid, Board, EdgeMasks, LinePattern, Move,
    Player,
};

use crate::search::heuristics::{
    ButterflyHistory, ContinuationHistory, CounterMoves, KillerTable, SearchStack,
    CONT_HIST_PLIES,
};

/// Bonus for quiet moves adjacent to an existing stone.
const ADJACENCY_BONUS: i32 = 50;

/// The picker's progression through move classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
enum Stage {
    HashMove,
    MustBlock,
    Winning,
    Threats,
    Killers,
    CounterMove,
    ScoreQuiets,
    Quiets,
    Done,
}

/// A yielded move with its ordering metadata.
#[derive(Debug, Clone, Copy)]
pub struct Picked {
    pub mv: Move,
    /// Hash move, must-block, killer, or explicit threat — exempt from LMR.
    pub priority: bool,
    /// Zero-based position in the yield order.
    pub index: usize,
}

/// Borrowed ordering heuristics, bundled to keep the picker signature sane.
pub struct OrderingContext<'a> {
    pub killers: &'a KillerTable,
    pub counters: &'a CounterMoves,
    pub butterfly: &'a ButterflyHistory,
    pub cont_hist: &'a ContinuationHistory,
    pub stack: &'a SearchStack,
}

pub struct MovePicker<'a> {
    board: &'a Board,
    side: Player,
    ply: usize,
    forcing_only: bool,
    stage: Stage,
    tt_move: Move,
    yielded: BitGrid,
    count: usize,

    staged: Vec<Move>,
    staged_idx: usize,

    // Own threat analysis, shared by the Winning and Threats stages.
    own_winning: Vec<Move>,
    own_threats: Vec<Move>,
    own_analyzed: bool,

    killer_pair: [Move; 2],
    killer_idx: usize,

    quiets: Vec<(Move, i32)>,
    quiet_idx: usize,
}

impl<'a> MovePicker<'a> {
    /// Full picker for main-search nodes.
    pub fn new(board: &'a Board, side: Player, ply: usize, tt_move: Move) -> MovePicker<'a> {
        MovePicker {
            board,
            side,
            ply,
            forcing_only: false,
            stage: Stage::HashMove,
            tt_move,
            yielded: BitGrid::new(board.size()),
            count: 0,
            staged: Vec::new(),
            staged_idx: 0,
            own_winning: Vec::new(),
            own_threats: Vec::new(),
            own_analyzed: false,
            killer_pair: [Move::NONE; 2],
            killer_idx: 0,
            quiets: Vec::new(),
            quiet_idx: 0,
        }
    }

    /// Quiescence picker: forcing moves only — blocks of opponent threats,
    /// own winning moves, own threat creations. No killers, no quiets.
    pub fn quiescence(board: &'a Board, side: Player) -> MovePicker<'a> {
        MovePicker {
            board,
            side,
            ply: 0,
            forcing_only: true,
            stage: Stage::MustBlock,
            tt_move: Move::NONE,
            yielded: BitGrid::new(board.size()),
            count: 0,
            staged: Vec::new(),
            staged_idx: 0,
            own_winning: Vec::new(),
            own_threats: Vec::new(),
            own_analyzed: false,
            killer_pair: [Move::NONE; 2],
            killer_idx: 0,
            quiets: Vec::new(),
            quiet_idx: 0,
        }
    }

    /// Yield the next candidate, or `None` when every stage is exhausted.
    ///
    /// The heuristic tables are borrowed per call rather than held by the
    /// picker, so the caller is free to update them between yields.
    pub fn next(&mut self, heur: &OrderingContext<'_>) -> Option<Picked> {
        loop {
            match self.stage {
                Stage::HashMove => {
                    self.stage = Stage::MustBlock;
                    if self.tt_move.is_some() && self.is_playable(self.tt_move) {
                        return Some(self.emit(self.tt_move, true));
                    }
                }
                Stage::MustBlock => {
                    if self.staged.is_empty() && self.staged_idx == 0 {
                        self.staged = self.must_block_cells();
                    }
                    if let Some(mv) = self.next_staged() {
                        return Some(self.emit(mv, true));
                    }
                    self.staged.clear();
                    self.staged_idx = 0;
                    self.stage = Stage::Winning;
                }
                Stage::Winning => {
                    self.analyze_own();
                    if self.staged_idx < self.own_winning.len() {
                        let mv = self.own_winning[self.staged_idx];
                        self.staged_idx += 1;
                        if self.is_fresh(mv) {
                            return Some(self.emit(mv, true));
                        }
                    } else {
                        self.staged_idx = 0;
                        self.stage = Stage::Threats;
                    }
                }
                Stage::Threats => {
                    if self.staged_idx < self.own_threats.len() {
                        let mv = self.own_threats[self.staged_idx];
                        self.staged_idx += 1;
                        if self.is_fresh(mv) {
                            return Some(self.emit(mv, true));
                        }
                    } else {
                        self.staged_idx = 0;
                        self.stage = if self.forcing_only {
                            Stage::Done
                        } else {
                            Stage::Killers
                        };
                    }
                }
                Stage::Killers => {
                    if self.killer_idx == 0 {
                        self.killer_pair = heur.killers.at(self.ply);
                    }
                    while self.killer_idx < 2 {
                        let mv = self.killer_pair[self.killer_idx];
                        self.killer_idx += 1;
                        if mv.is_some() && self.is_playable(mv) && self.is_fresh(mv) {
                            return Some(self.emit(mv, true));
                        }
                    }
                    self.stage = Stage::CounterMove;
                }
                Stage::CounterMove => {
                    self.stage = Stage::ScoreQuiets;
                    let prev = heur.stack.prior_move(self.ply, 1);
                    if prev.is_some() {
                        let mv = heur.counters.get(self.side, prev.cell(self.board.size()));
                        if mv.is_some() && self.is_playable(mv) && self.is_fresh(mv) {
                            return Some(self.emit(mv, false));
                        }
                    }
                }
                Stage::ScoreQuiets => {
                    self.score_quiets(heur);
                    self.stage = Stage::Quiets;
                }
                Stage::Quiets => {
                    // Lazy selection sort: each yield swaps the best
                    // remaining quiet to the cursor.
                    if self.quiet_idx >= self.quiets.len() {
                        self.stage = Stage::Done;
                        continue;
                    }
                    let mut best = self.quiet_idx;
                    for i in self.quiet_idx + 1..self.quiets.len() {
                        if self.quiets[i].1 > self.quiets[best].1 {
                            best = i;
                        }
                    }
                    self.quiets.swap(self.quiet_idx, best);
                    let mv = self.quiets[self.quiet_idx].0;
                    self.quiet_idx += 1;
                    if self.is_fresh(mv) {
                        return Some(self.emit(mv, false));
                    }
                }
                Stage::Done => return None,
            }
        }
    }

    /// Moves yielded so far.
    pub fn yielded(&self) -> usize {
        self.count
    }

    fn emit(&mut self, mv: Move, priority: bool) -> Picked {
        self.yielded = self.yielded.with(mv.cell(self.board.size()));
        let picked = Picked {
            mv,
            priority,
            index: self.count,
        };
        self.count += 1;
        picked
    }

    fn is_playable(&self, mv: Move) -> bool {
        self.board.in_bounds(mv.x(), mv.y()) && self.board.player_at(mv.x(), mv.y()).is_none()
    }

    fn is_fresh(&self, mv: Move) -> bool {
        !self.yielded.test(mv.cell(self.board.size()))
    }

    fn next_staged(&mut self) -> Option<Move> {
        while self.staged_idx < self.staged.len() {
            let mv = self.staged[self.staged_idx];
            self.staged_idx += 1;
            if self.is_fresh(mv) {
                return Some(mv);
            }
        }
        None
    }

    /// Cells that answer the opponent's standing fours, or failing that,
    /// the growth points of their open threes.
    fn must_block_cells(&self) -> Vec<Move> {
        let opp = self.side.opponent();
        let lethal = five_completions(self.board, opp);
        if !lethal.is_empty() {
            return lethal;
        }
        self.board
            .candidates()
            .iter()
            .filter_map(|cell| {
                let mv = Move::from_cell(cell, self.board.size());
                (classify_move(self.board, mv, opp) == LinePattern::OpenFour).then_some(mv)
            })
            .collect()
    }

    /// One pass over the candidates classifying what each would create for
    /// us, split into winning moves and threat moves.
    fn analyze_own(&mut self) {
        if self.own_analyzed {
            return;
        }
        self.own_analyzed = true;

        let mut winning: Vec<(Move, LinePattern, usize)> = Vec::new();
        for cell in self.board.candidates().iter() {
            let mv = Move::from_cell(cell, self.board.size());
            let patterns = classify_all(self.board, mv, self.side);
            let best = patterns.into_iter().max().unwrap_or(LinePattern::None);
            let strong = patterns
                .iter()
                .filter(|&&p| p >= LinePattern::OpenThree)
                .count();

            if best == LinePattern::Five || best == LinePattern::OpenFour || strong >= 2 {
                winning.push((mv, best, strong));
            } else if best >= LinePattern::OpenThree {
                // Open threes and forcing fours (broken or closed).
                self.own_threats.push(mv);
            }
        }
        winning.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        self.own_winning = winning.into_iter().map(|(mv, _, _)| mv).collect();
    }

    /// Score every remaining candidate by butterfly history, continuation
    /// history over recent plies, centre proximity, and stone adjacency.
    fn score_quiets(&mut self, heur: &OrderingContext<'_>) {
        let size = self.board.size();
        let masks = EdgeMasks::new(size);
        let adjacent = self.board.occupied().dilate(&masks);
        let center = self.board.center();

        let priors: Vec<Move> = (1..=CONT_HIST_PLIES)
            .map(|back| heur.stack.prior_move(self.ply, back))
            .filter(|mv| mv.is_some())
            .collect();

        self.quiets = self
            .board
            .candidates()
            .iter()
            .filter(|&cell| !self.yielded.test(cell))
            .map(|cell| {
                let mv = Move::from_cell(cell, size);
                let mut score = heur.butterfly.score(self.side, cell);
                for prev in &priors {
                    score += heur.cont_hist.score(self.side, prev.cell(size), cell);
                }
                let dist = mv
                    .x()
                    .abs_diff(center.x())
                    .max(mv.y().abs_diff(center.y())) as i32;
                score += size as i32 - dist;
                if adjacent.test(cell) {
                    score += ADJACENCY_BONUS;
                }
                (mv, score)
            })
            .collect();
    }
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

    struct Tables {
        killers: KillerTable,
        counters: CounterMoves,
        butterfly: ButterflyHistory,
        cont_hist: ContinuationHistory,
        stack: SearchStack,
    }

    impl Tables {
        fn new() -> Tables {
            Tables {
                killers: KillerTable::new(),
                counters: CounterMoves::new(),
                butterfly: ButterflyHistory::new(),
                cont_hist: ContinuationHistory::new(),
                stack: SearchStack::new(),
            }
        }

        fn ctx(&self) -> OrderingContext<'_> {
            OrderingContext {
                killers: &self.killers,
                counters: &self.counters,
                butterfly: &self.butterfly,
                cont_hist: &self.cont_hist,
                stack: &self.stack,
            }
        }
    }

    fn drain(picker: &mut MovePicker<'_>, heur: &OrderingContext<'_>) -> Vec<Move> {
        let mut moves = Vec::new();
        while let Some(picked) = picker.next(heur) {
            moves.push(picked.mv);
        }
        moves
    }

    #[test]
    fn hash_move_comes_first() {
        let board = board_with(&[(7, 7, Player::First), (8, 8, Player::Second)]);
        let tables = Tables::new();
        let hash_move = Move::new(5, 5);
        let mut picker = MovePicker::new(&board, Player::First, 0, hash_move);
        let first = picker.next(&tables.ctx()).unwrap();
        assert_eq!(first.mv, hash_move);
        assert!(first.priority);
        assert_eq!(first.index, 0);
    }

    #[test]
    fn occupied_hash_move_is_skipped() {
        let board = board_with(&[(7, 7, Player::First)]);
        let tables = Tables::new();
        let mut picker = MovePicker::new(&board, Player::First, 0, Move::new(7, 7));
        let first = picker.next(&tables.ctx()).unwrap();
        assert_ne!(first.mv, Move::new(7, 7));
    }

    #[test]
    fn opponent_four_forces_blocks_first() {
        // Second has an open four on row 9; First must block at (8,9) or (13,9).
        let board = board_with(&[
            (9, 9, Player::Second),
            (10, 9, Player::Second),
            (11, 9, Player::Second),
            (12, 9, Player::Second),
            (7, 7, Player::First),
        ]);
        let tables = Tables::new();
        let mut picker = MovePicker::new(&board, Player::First, 0, Move::NONE);
        let first = picker.next(&tables.ctx()).unwrap();
        assert!(first.priority);
        assert!(
            first.mv == Move::new(8, 9) || first.mv == Move::new(13, 9),
            "expected a blocking cell, got {}",
            first.mv
        );
        let second = picker.next(&tables.ctx()).unwrap();
        assert!(second.mv == Move::new(8, 9) || second.mv == Move::new(13, 9));
        assert_ne!(first.mv, second.mv);
    }

    #[test]
    fn own_five_ranks_as_winning_move() {
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (7, 9, Player::First),
        ]);
        let tables = Tables::new();
        let mut picker = MovePicker::new(&board, Player::First, 0, Move::NONE);
        let first = picker.next(&tables.ctx()).unwrap();
        assert!(
            first.mv == Move::new(7, 5) || first.mv == Move::new(7, 10),
            "expected a five completion, got {}",
            first.mv
        );
    }

    #[test]
    fn killers_come_before_plain_quiets() {
        let board = board_with(&[(7, 7, Player::First), (8, 8, Player::Second)]);
        let mut tables = Tables::new();
        let killer = Move::new(9, 6);
        tables.killers.store(3, killer);
        let mut picker = MovePicker::new(&board, Player::First, 3, Move::NONE);
        // No fours or threats on the board, so the killer leads.
        let first = picker.next(&tables.ctx()).unwrap();
        assert_eq!(first.mv, killer);
        assert!(first.priority);
    }

    #[test]
    fn no_move_is_yielded_twice() {
        let board = board_with(&[
            (7, 7, Player::First),
            (7, 8, Player::First),
            (7, 9, Player::First),
            (8, 8, Player::Second),
        ]);
        let mut tables = Tables::new();
        tables.killers.store(0, Move::new(7, 6));
        let mut picker = MovePicker::new(&board, Player::First, 0, Move::new(7, 6));
        let moves = drain(&mut picker, &tables.ctx());
        let mut seen = std::collections::HashSet::new();
        for mv in &moves {
            assert!(seen.insert(*mv), "{mv} yielded twice");
        }
    }

    #[test]
    fn picker_eventually_yields_every_candidate() {
        let board = board_with(&[(7, 7, Player::First), (8, 8, Player::Second)]);
        let tables = Tables::new();
        let mut picker = MovePicker::new(&board, Player::Second, 0, Move::NONE);
        let moves = drain(&mut picker, &tables.ctx());
        assert_eq!(moves.len() as u32, board.candidates().count());
    }

    #[test]
    fn butterfly_history_orders_quiets() {
        let board = board_with(&[(7, 7, Player::First), (8, 8, Player::Second)]);
        let mut tables = Tables::new();
        let favored = Move::new(5, 5);
        tables
            .butterfly
            .update(Player::Second, favored.cell(15), 5_000);
        let mut picker = MovePicker::new(&board, Player::Second, 0, Move::NONE);
        let first = picker.next(&tables.ctx()).unwrap();
        assert_eq!(first.mv, favored);
        assert!(!first.priority);
    }

    #[test]
    fn quiescence_yields_only_forcing_moves() {
        let tables = Tables::new();
        // A lone pair: no threats on either side, so quiescence is empty.
        let board = board_with(&[(7, 7, Player::First), (8, 8, Player::Second)]);
        let mut picker = MovePicker::quiescence(&board, Player::First);
        assert!(picker.next(&tables.ctx()).is_none());

        // An own open three offers threat-creating extensions.
        let board = board_with(&[
            (7, 6, Player::First),
            (7, 7, Player::First),
            (7, 8, Player::First),
            (1, 1, Player::Second),
        ]);
        let mut picker = MovePicker::quiescence(&board, Player::First);
        let moves = drain(&mut picker, &tables.ctx());
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|mv| {
            classify_move(&board, *mv, Player::First) >= LinePattern::OpenThree
        }));
    }
}
