//! The public search controller.
//!
//! [`Engine::find_best_move`] composes the full move pipeline: validation,
//! opening book, VCF pre-solver, the parallel alpha-beta search, result
//! selection, telemetry, and time-manager feedback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use caro_core::{five_completions, winning_five, Board, BoardError, Move, Player};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::book::{self, BookStore};
use crate::config::{Difficulty, EngineOptions};
use crate::eval::MATE;
use crate::search::control::SearchControl;
use crate::search::pool::{run_single, ThreadPool};
use crate::search::{WorkerHistories, WorkerResult};
use crate::telemetry::{unix_millis, MoveStats, StatsEvent, TelemetrySink};
use crate::time::{TimeBounds, TimeManager};
use crate::vcf::{self, VcfLimits, VcfOutcome};

/// Fraction of the soft bound granted to the VCF pre-solver.
const VCF_TIME_SHARE: f64 = 0.05;

/// Attempts at finding a non-losing random move before giving up.
const BLUNDER_ATTEMPTS: usize = 8;

static PUBLISHER_IDS: AtomicU32 = AtomicU32::new(1);

/// One move request.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest {
    pub board: Board,
    pub side: Player,
    pub difficulty: Difficulty,
    pub time_remaining_ms: u32,
    pub increment_ms: u32,
    pub move_number: u16,
    /// Absolute cutoff overriding the computed hard bound, if earlier.
    pub deadline: Option<Instant>,
}

/// The engine's answer.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub mv: Move,
    pub score: i32,
    pub depth: u8,
    pub nodes: u64,
    pub elapsed_ms: u64,
    pub book_used: bool,
    pub vcf_used: bool,
}

/// Errors surfaced by the controller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The position cannot be searched: wrong dimensions, or already won.
    #[error("invalid position: {0}")]
    InvalidPosition(&'static str),
    /// Every cell is occupied.
    #[error("no legal move: the board is full")]
    NoLegalMove,
    /// The search was cancelled before any result was available.
    #[error("search cancelled before any iteration completed")]
    Cancelled {
        /// The best move gathered before cancellation, if any.
        best_effort: Option<Move>,
    },
    /// Time expired without producing a move at any depth.
    #[error("search timed out with no result")]
    Timeout,
    /// Board manipulation failed.
    #[error(transparent)]
    Board(#[from] BoardError),
}

struct PonderHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// The Caro AI engine: search state plus the long-lived tables.
pub struct Engine {
    options: EngineOptions,
    pool: ThreadPool,
    time_manager: TimeManager,
    histories: WorkerHistories,
    book: Option<Box<dyn BookStore + Send + Sync>>,
    telemetry: TelemetrySink,
    subscriber: crossbeam_channel::Receiver<StatsEvent>,
    rng: SmallRng,
    publisher: u32,
    ponder: Option<PonderHandle>,
}

impl Engine {
    /// Engine with the given options and no opening book.
    pub fn new(options: EngineOptions) -> Engine {
        let (telemetry, subscriber) = TelemetrySink::new();
        let rng = SmallRng::seed_from_u64(options.rng_seed);
        let pool = ThreadPool::new(options.clamped_tt_mb());
        Engine {
            options,
            pool,
            time_manager: TimeManager::new(),
            histories: WorkerHistories::new(),
            book: None,
            telemetry,
            subscriber,
            rng,
            publisher: PUBLISHER_IDS.fetch_add(1, Ordering::Relaxed),
            ponder: None,
        }
    }

    /// Attach an opening book backend.
    pub fn with_book(mut self, book: impl BookStore + Send + Sync + 'static) -> Engine {
        self.book = Some(Box::new(book));
        self
    }

    /// A subscriber to this engine's telemetry stream.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<StatsEvent> {
        self.subscriber.clone()
    }

    /// Reset per-game state: histories, time feedback, and the table.
    pub fn new_game(&mut self) {
        self.stop_ponder();
        self.histories.clear();
        self.time_manager.reset();
        self.pool.clear_tt();
        self.rng = SmallRng::seed_from_u64(self.options.rng_seed);
    }

    /// Find the best move for the requested position.
    pub fn find_best_move(&mut self, req: &SearchRequest) -> Result<SearchOutcome, EngineError> {
        self.stop_ponder();
        let started = Instant::now();

        if req.board.is_full() {
            return Err(EngineError::NoLegalMove);
        }
        if winning_five(&req.board, req.side) || winning_five(&req.board, req.side.opponent()) {
            return Err(EngineError::InvalidPosition("the game is already decided"));
        }

        let config = req.difficulty.config();

        // Opening book first: a hit answers instantly.
        if self.options.enable_opening_book
            && let Some(store) = self.book.as_deref()
        {
            let max_ply = self.options.book_depth_limit.unwrap_or(config.book_max_ply);
            if let Some(mv) = book::lookup(store, &req.board, req.side, max_ply, &mut self.rng) {
                let outcome = SearchOutcome {
                    mv,
                    score: 0,
                    depth: 0,
                    nodes: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    book_used: true,
                    vcf_used: false,
                };
                self.publish_main(req, &outcome, 1, 0.0, &[mv], 0, 0);
                return Ok(outcome);
            }
        }

        let bounds = self.time_manager.plan(
            req.time_remaining_ms,
            req.increment_ms,
            req.move_number,
            req.difficulty,
        );

        // VCF pre-solver: prove a forced win before paying for the search.
        let mut vcf_depth = 0u8;
        let mut vcf_nodes = 0u64;
        if let Some(fours) = config.vcf_fours {
            let deadline = if self.options.deterministic {
                None
            } else {
                let share = bounds.soft.mul_f64(VCF_TIME_SHARE);
                Some(started + share.max(std::time::Duration::from_millis(1)))
            };
            let result = vcf::solve(
                &req.board,
                req.side,
                VcfLimits {
                    max_fours: fours,
                    deadline,
                },
            );
            vcf_depth = result.depth;
            vcf_nodes = result.nodes;
            self.publish_vcf(req, &result);

            if let VcfOutcome::Found { mv, mate_in } = result.outcome {
                info!(%mv, mate_in, "vcf proved a forced win");
                let elapsed = started.elapsed();
                let outcome = SearchOutcome {
                    mv,
                    score: MATE - mate_in as i32,
                    depth: result.depth,
                    nodes: result.nodes,
                    elapsed_ms: elapsed.as_millis() as u64,
                    book_used: false,
                    vcf_used: true,
                };
                self.time_manager.report(bounds.soft, elapsed);
                return Ok(outcome);
            }
        }

        // Main search.
        let threads = self.effective_threads(&config);
        self.pool.set_threads(threads);

        let stop = Arc::new(AtomicBool::new(false));
        let control = self.build_control(&stop, bounds, req.deadline, started);

        let pool_outcome =
            self.pool
                .search(&req.board, req.side, 63, &control, &mut self.histories);
        let elapsed = started.elapsed();

        let best = self.finalize(req, pool_outcome.best, &stop)?;

        let mut mv = best.best_move;
        let mut blundered = false;
        if config.error_probability > 0.0 && self.rng.r#gen::<f64>() < config.error_probability {
            if let Some(random_mv) = self.harmless_random_move(&req.board, req.side) {
                debug!(%random_mv, "braindead substitution");
                mv = random_mv;
                blundered = true;
            }
        }

        let outcome = SearchOutcome {
            mv,
            score: if blundered { 0 } else { best.score },
            depth: best.depth,
            nodes: pool_outcome.total_nodes,
            elapsed_ms: elapsed.as_millis() as u64,
            book_used: false,
            vcf_used: false,
        };

        let hit_rate = if pool_outcome.tt_probes == 0 {
            0.0
        } else {
            pool_outcome.tt_hits as f64 / pool_outcome.tt_probes as f64
        };
        self.publish_main(
            req,
            &outcome,
            pool_outcome.workers,
            hit_rate,
            &best.pv,
            vcf_depth,
            vcf_nodes,
        );
        self.time_manager.report(bounds.soft, elapsed);
        Ok(outcome)
    }

    /// Start a background search on the opponent's predicted reply,
    /// sharing the transposition table with the main search.
    pub fn start_ponder(
        &mut self,
        board: &Board,
        side: Player,
        predicted: Move,
    ) -> Result<(), EngineError> {
        if !self.options.enable_pondering {
            return Ok(());
        }
        self.stop_ponder();

        let after = board.place(predicted, side.opponent())?;
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let tt = self.pool.tt();
        let sink = self.telemetry.clone();
        let publisher = self.publisher;

        let join = std::thread::spawn(move || {
            let control = SearchControl::new_infinite(worker_stop);
            let mut histories = WorkerHistories::new();
            let result = run_single(&tt, &after, side, 63, &control, &mut histories);
            sink.publish(StatsEvent::Pondering(MoveStats {
                publisher,
                side,
                mv: result.best_move,
                depth: result.depth,
                seldepth: result.seldepth,
                nodes: result.nodes,
                nps: nps(result.nodes, control.elapsed().as_millis() as u64),
                tt_hit_rate: result.hit_rate(),
                score: result.score,
                threads: 1,
                elapsed_ms: control.elapsed().as_millis() as u64,
                timestamp_ms: unix_millis(),
                pv: result.pv.clone(),
                pondering: true,
                vcf_depth: 0,
                vcf_nodes: 0,
            }));
        });

        self.ponder = Some(PonderHandle { stop, join });
        Ok(())
    }

    /// Cancel and join any active ponder search.
    pub fn stop_ponder(&mut self) {
        if let Some(handle) = self.ponder.take() {
            handle.stop.store(true, Ordering::Release);
            if handle.join.join().is_err() {
                warn!("ponder thread panicked");
            }
        }
    }

    fn effective_threads(&self, config: &crate::config::DifficultyConfig) -> usize {
        if self.options.deterministic {
            return 1;
        }
        let threads = self.options.threads.unwrap_or(config.threads);
        if config.parallel { threads.max(1) } else { 1 }
    }

    fn build_control(
        &self,
        stop: &Arc<AtomicBool>,
        bounds: TimeBounds,
        deadline: Option<Instant>,
        started: Instant,
    ) -> SearchControl {
        if self.options.deterministic {
            return SearchControl::new_deterministic(
                Arc::clone(stop),
                self.options.deterministic_nodes,
            );
        }
        let mut hard = bounds.hard;
        if let Some(deadline) = deadline {
            hard = hard.min(deadline.saturating_duration_since(started));
        }
        SearchControl::new_timed(Arc::clone(stop), bounds.soft.min(hard), hard)
    }

    /// Turn the pool's selection into a final result, falling back to any
    /// playable candidate when nothing completed.
    fn finalize(
        &self,
        req: &SearchRequest,
        best: WorkerResult,
        stop: &Arc<AtomicBool>,
    ) -> Result<WorkerResult, EngineError> {
        if best.completed_any && best.best_move.is_some() {
            return Ok(best);
        }

        let fallback = req
            .board
            .candidates()
            .first()
            .map(|cell| Move::from_cell(cell, req.board.size()));
        match fallback {
            Some(mv) => {
                warn!("no completed iteration, falling back to a candidate move");
                Ok(WorkerResult {
                    best_move: mv,
                    ..best
                })
            }
            None if stop.load(Ordering::Relaxed) => {
                Err(EngineError::Cancelled { best_effort: None })
            }
            None => Err(EngineError::Timeout),
        }
    }

    /// A uniformly random candidate that does not hand the opponent an
    /// immediate five. The intentional weakening for Braindead.
    fn harmless_random_move(&mut self, board: &Board, side: Player) -> Option<Move> {
        let candidates: Vec<usize> = board.candidates().iter().collect();
        if candidates.is_empty() {
            return None;
        }
        for _ in 0..BLUNDER_ATTEMPTS {
            let cell = candidates[self.rng.gen_range(0..candidates.len())];
            let mv = Move::from_cell(cell, board.size());
            if board.open_rule_violation(mv, side) {
                continue;
            }
            let Ok(child) = board.place(mv, side) else {
                continue;
            };
            if five_completions(&child, side.opponent()).is_empty() {
                return Some(mv);
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_main(
        &self,
        req: &SearchRequest,
        outcome: &SearchOutcome,
        threads: usize,
        tt_hit_rate: f64,
        pv: &[Move],
        vcf_depth: u8,
        vcf_nodes: u64,
    ) {
        self.telemetry.publish(StatsEvent::MainSearch(MoveStats {
            publisher: self.publisher,
            side: req.side,
            mv: outcome.mv,
            depth: outcome.depth,
            seldepth: outcome.depth.max(vcf_depth),
            nodes: outcome.nodes,
            nps: nps(outcome.nodes, outcome.elapsed_ms),
            tt_hit_rate,
            score: outcome.score,
            threads,
            elapsed_ms: outcome.elapsed_ms,
            timestamp_ms: unix_millis(),
            pv: pv.to_vec(),
            pondering: self.ponder.is_some(),
            vcf_depth,
            vcf_nodes,
        }));
    }

    fn publish_vcf(&self, req: &SearchRequest, result: &vcf::VcfResult) {
        let mv = match result.outcome {
            VcfOutcome::Found { mv, .. } => mv,
            VcfOutcome::NotFound => Move::NONE,
        };
        self.telemetry.publish(StatsEvent::VcfSearch(MoveStats {
            publisher: self.publisher,
            side: req.side,
            mv,
            depth: result.depth,
            seldepth: result.depth,
            nodes: result.nodes,
            nps: 0,
            tt_hit_rate: 0.0,
            score: 0,
            threads: 1,
            elapsed_ms: 0,
            timestamp_ms: unix_millis(),
            pv: Vec::new(),
            pondering: false,
            vcf_depth: result.depth,
            vcf_nodes: result.nodes,
        }));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_ponder();
    }
}

fn nps(nodes: u64, elapsed_ms: u64) -> u64 {
    nodes * 1_000 / elapsed_ms.max(1)
}
