//! Lazy SMP worker pool.
//!
//! Worker 0 (the master) runs on the calling thread; helpers run on scoped
//! native threads. All workers iterate the same root position with their
//! own killers, histories, and stack, sharing only the transposition table
//! and the stop flag. Diversity comes from TT write interleaving plus a
//! depth offset on odd helpers.

use std::sync::{Arc, Mutex};

use caro_core::{Board, Player};
use tracing::debug;

use crate::search::control::SearchControl;
use crate::search::heuristics::{KillerTable, SearchStack};
use crate::search::negamax::{iterative_deepening, PvTable, SearchContext};
use crate::search::tt::TranspositionTable;
use crate::search::{WorkerHistories, WorkerResult};

/// Owns the shared transposition table and the worker configuration.
pub struct ThreadPool {
    tt: Arc<TranspositionTable>,
    threads: usize,
}

/// Aggregated outcome of one parallel search.
#[derive(Debug)]
pub struct PoolOutcome {
    /// The selected result (see [`select`] for the rule).
    pub best: WorkerResult,
    /// Nodes summed over all workers.
    pub total_nodes: u64,
    /// TT probes summed over all workers.
    pub tt_probes: u64,
    /// TT hits summed over all workers.
    pub tt_hits: u64,
    /// Number of workers that ran.
    pub workers: usize,
}

impl ThreadPool {
    /// Pool with a fresh table of `tt_mb` megabytes and one worker.
    pub fn new(tt_mb: usize) -> ThreadPool {
        ThreadPool {
            tt: Arc::new(TranspositionTable::new(tt_mb)),
            threads: 1,
        }
    }

    /// Set the worker count.
    pub fn set_threads(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    /// Replace the table with one of `mb` megabytes.
    pub fn resize_tt(&mut self, mb: usize) {
        self.tt = Arc::new(TranspositionTable::new(mb));
    }

    /// Clear the shared table.
    pub fn clear_tt(&self) {
        self.tt.clear();
    }

    /// Shared handle to the table (pondering searches clone this).
    pub fn tt(&self) -> Arc<TranspositionTable> {
        Arc::clone(&self.tt)
    }

    /// Run a Lazy SMP search and select the best worker result.
    ///
    /// The master borrows the engine's persistent histories; helpers build
    /// fresh per-call tables. All workers are joined before this returns,
    /// on every path.
    pub fn search(
        &self,
        board: &Board,
        side: Player,
        max_depth: u8,
        control: &SearchControl,
        histories: &mut WorkerHistories,
    ) -> PoolOutcome {
        self.tt.new_generation();

        if self.threads <= 1 {
            let result = run_worker(&self.tt, board, side, max_depth, control, 0, histories);
            return gather(vec![result]);
        }

        let helper_results: Mutex<Vec<WorkerResult>> = Mutex::new(Vec::new());
        let mut master_result = None;

        std::thread::scope(|s| {
            for worker_index in 1..self.threads {
                let tt = &self.tt;
                let helper_results = &helper_results;
                s.spawn(move || {
                    let mut local = WorkerHistories::new();
                    let result =
                        run_worker(tt, board, side, max_depth, control, worker_index, &mut local);
                    helper_results
                        .lock()
                        .expect("helper results poisoned")
                        .push(result);
                });
            }

            master_result = Some(run_worker(
                &self.tt, board, side, max_depth, control, 0, histories,
            ));
        });
        // scope joins every helper here, also on panic of a helper

        let mut results = helper_results.into_inner().expect("helper results poisoned");
        results.push(master_result.expect("master always runs"));
        gather(results)
    }
}

/// A lone search outside the pool, sharing an existing table.
///
/// Pondering runs through this: one worker, the caller's control, the
/// shared TT.
pub fn run_single(
    tt: &TranspositionTable,
    board: &Board,
    side: Player,
    max_depth: u8,
    control: &SearchControl,
    histories: &mut WorkerHistories,
) -> WorkerResult {
    run_worker(tt, board, side, max_depth, control, 0, histories)
}

/// One worker's full iterative-deepening run.
fn run_worker(
    tt: &TranspositionTable,
    board: &Board,
    side: Player,
    max_depth: u8,
    control: &SearchControl,
    worker_index: usize,
    histories: &mut WorkerHistories,
) -> WorkerResult {
    let mut ctx = SearchContext {
        tt,
        control,
        killers: KillerTable::new(),
        butterfly: &mut histories.butterfly,
        cont_hist: &mut histories.cont_hist,
        counters: &mut histories.counters,
        stack: SearchStack::new(),
        pv: PvTable::new(),
        nodes: 0,
        seldepth: 0,
        tt_probes: 0,
        tt_hits: 0,
        aborted: false,
        worker_index,
        root_depth: 0,
    };

    // Helpers start one ply deeper on odd indices, desynchronising the
    // iteration fronts so the TT fills from several depths at once.
    let start_depth = 1 + (worker_index % 2) as u8;
    iterative_deepening(board, side, start_depth, max_depth, &mut ctx)
}

/// Pick the final answer: workers whose current iteration never completed
/// are discarded; the rest compete on completed depth, then master-ness,
/// then score.
fn select(results: &[WorkerResult]) -> WorkerResult {
    let best = results
        .iter()
        .filter(|r| r.completed_any)
        .max_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| (a.worker_index == 0).cmp(&(b.worker_index == 0)))
                .then_with(|| a.score.cmp(&b.score))
        })
        .cloned();

    best.unwrap_or_else(|| {
        // Nothing finished (extremely short budget): surface the master's
        // partial result so the caller can fall back gracefully.
        results
            .iter()
            .find(|r| r.worker_index == 0)
            .cloned()
            .unwrap_or_default()
    })
}

fn gather(results: Vec<WorkerResult>) -> PoolOutcome {
    let total_nodes = results.iter().map(|r| r.nodes).sum();
    let tt_probes = results.iter().map(|r| r.tt_probes).sum();
    let tt_hits = results.iter().map(|r| r.tt_hits).sum();
    let workers = results.len();
    let best = select(&results);
    debug!(
        depth = best.depth,
        score = best.score,
        nodes = total_nodes,
        workers,
        "search pool finished"
    );
    PoolOutcome {
        best,
        total_nodes,
        tt_probes,
        tt_hits,
        workers,
    }
}
