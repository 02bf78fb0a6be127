//! Search control — the shared stop flag and time bounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How often (in nodes) each worker re-checks the clock.
const NODE_CHECK_MASK: u64 = 4095;

/// Controls when a search must stop.
///
/// Checked cooperatively by every worker: once per 4096 nodes against the
/// hard limit, and between root iterations against the soft limit. Modes:
///
/// - **Infinite**: responds only to the external stop flag (pondering,
///   analysis).
/// - **Timed**: soft bound stops new iterations, hard bound aborts the
///   search mid-iteration.
/// - **Deterministic**: no wall clock at all — a fixed node budget, so two
///   runs with identical inputs behave identically.
pub struct SearchControl {
    stopped: Arc<AtomicBool>,
    clock_active: AtomicBool,
    start: Mutex<Option<Instant>>,
    soft_limit: Option<Duration>,
    hard_limit: Option<Duration>,
    node_limit: Option<u64>,
}

impl SearchControl {
    /// Control with no limits; stops only via the shared flag.
    pub fn new_infinite(stopped: Arc<AtomicBool>) -> SearchControl {
        SearchControl {
            stopped,
            clock_active: AtomicBool::new(false),
            start: Mutex::new(Some(Instant::now())),
            soft_limit: None,
            hard_limit: None,
            node_limit: None,
        }
    }

    /// Timed control; the clock starts immediately.
    pub fn new_timed(stopped: Arc<AtomicBool>, soft: Duration, hard: Duration) -> SearchControl {
        SearchControl {
            stopped,
            clock_active: AtomicBool::new(true),
            start: Mutex::new(Some(Instant::now())),
            soft_limit: Some(soft),
            hard_limit: Some(hard),
            node_limit: None,
        }
    }

    /// Deterministic control: a per-worker node budget and no clock.
    pub fn new_deterministic(stopped: Arc<AtomicBool>, node_limit: u64) -> SearchControl {
        SearchControl {
            stopped,
            clock_active: AtomicBool::new(false),
            start: Mutex::new(Some(Instant::now())),
            soft_limit: None,
            hard_limit: None,
            node_limit: Some(node_limit),
        }
    }

    /// Ponder control: limits exist but the clock is inactive until
    /// [`activate`](Self::activate) fires on ponder-hit.
    pub fn new_ponder(stopped: Arc<AtomicBool>, soft: Duration, hard: Duration) -> SearchControl {
        SearchControl {
            stopped,
            clock_active: AtomicBool::new(false),
            start: Mutex::new(None),
            soft_limit: Some(soft),
            hard_limit: Some(hard),
            node_limit: None,
        }
    }

    /// Start the clock (ponder-hit).
    pub fn activate(&self) {
        *self.start.lock().expect("start mutex poisoned") = Some(Instant::now());
        self.clock_active.store(true, Ordering::Release);
    }

    /// Request an immediate stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether the search must abort right now.
    ///
    /// The wall clock is consulted only every 4096 nodes; once the hard
    /// limit fires the flag latches so later calls are branch-cheap.
    pub fn should_stop(&self, nodes: u64) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return true;
        }

        if let Some(limit) = self.node_limit
            && nodes >= limit
        {
            return true;
        }

        if nodes & NODE_CHECK_MASK != 0 {
            return false;
        }

        if !self.clock_active.load(Ordering::Acquire) {
            return false;
        }

        if let Some(hard) = self.hard_limit
            && self.elapsed() >= hard
        {
            self.stopped.store(true, Ordering::Release);
            return true;
        }

        false
    }

    /// Whether iterative deepening should stop starting new iterations.
    pub fn should_stop_iterating(&self) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return true;
        }

        if !self.clock_active.load(Ordering::Acquire) {
            return false;
        }

        match self.soft_limit {
            Some(soft) => self.elapsed() >= soft,
            None => false,
        }
    }

    /// Elapsed time since the clock started (zero if inactive).
    pub fn elapsed(&self) -> Duration {
        self.start
            .lock()
            .expect("start mutex poisoned")
            .map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// The shared stop flag.
    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stopped
    }
}
