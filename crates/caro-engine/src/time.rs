//! Adaptive time management — clock parameters to soft/hard search bounds.
//!
//! Allocation starts from the classic `remaining / moves-to-go` split and is
//! then steered by a PID loop fed with each move's actual spend, so the
//! engine converges on its target utilisation instead of drifting fast or
//! slow through a game. A scramble override guarantees the engine never
//! flags once it is living on the increment.

use std::time::Duration;

use crate::config::Difficulty;

/// Proportional gain on the last move's over/under-spend.
const KP: f64 = 1.0;

/// Integral gain on the accumulated spend error.
const KI: f64 = 0.1;

/// Derivative gain on the error's rate of change.
const KD: f64 = 0.5;

/// Integral windup clamp, in milliseconds of accumulated error.
const INTEGRAL_CLAMP: f64 = 4_000.0;

/// Hard bound multiplier over the soft allocation.
const HARD_FACTOR: f64 = 3.0;

/// Fraction of the increment spent per move in scramble mode.
const SCRAMBLE_FACTOR: f64 = 0.4;

/// Fraction of the increment treated as usable thinking time.
const INCREMENT_FACTOR: f64 = 0.8;

/// Soft and hard wall-clock bounds for one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    /// Stop starting new iterations past this point.
    pub soft: Duration,
    /// Abort the search outright past this point.
    pub hard: Duration,
}

/// Per-game time allocator with PID feedback.
#[derive(Debug, Default)]
pub struct TimeManager {
    /// Accumulated allocation error in milliseconds (positive = underspent).
    integral: f64,
    /// Previous move's error.
    last_error: f64,
    /// Change in error between the last two moves.
    derivative: f64,
}

impl TimeManager {
    /// Fresh manager with no history.
    pub fn new() -> TimeManager {
        TimeManager::default()
    }

    /// Reset the feedback state (new game).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.derivative = 0.0;
    }

    /// Compute the bounds for the coming move.
    pub fn plan(
        &self,
        remaining_ms: u32,
        increment_ms: u32,
        move_number: u16,
        difficulty: Difficulty,
    ) -> TimeBounds {
        let remaining = remaining_ms as f64;
        let increment = increment_ms as f64;

        // Scramble: living off the increment, spend a fixed slice of it and
        // never touch the remaining reserve.
        if increment_ms > 0 && remaining < 3.0 * increment {
            let ms = (SCRAMBLE_FACTOR * increment).max(1.0);
            let bound = Duration::from_millis(ms as u64);
            return TimeBounds {
                soft: bound,
                hard: bound,
            };
        }

        let base = remaining / expected_moves_remaining(move_number)
            + increment * INCREMENT_FACTOR;
        let base = base * difficulty.config().time_fraction;

        // PID correction from previous moves' spend.
        let correction = KP * self.last_error + KI * self.integral + KD * self.derivative;
        let soft_ms = (base + correction * 0.1).clamp(1.0, remaining.max(1.0) * 0.5) as u64;
        let hard_ms = ((soft_ms as f64 * HARD_FACTOR).min(remaining.max(1.0) * 0.8) as u64).max(1);

        TimeBounds {
            soft: Duration::from_millis(soft_ms),
            hard: Duration::from_millis(hard_ms),
        }
    }

    /// Feed back a move's planned soft bound and actual spend.
    pub fn report(&mut self, planned: Duration, actual: Duration) {
        let error = planned.as_millis() as f64 - actual.as_millis() as f64;
        self.derivative = error - self.last_error;
        self.integral = (self.integral + error).clamp(-INTEGRAL_CLAMP, INTEGRAL_CLAMP);
        self.last_error = error;
    }
}

/// How many more moves the game is expected to last: long early, short
/// late, floored so the divisor never starves the allocation.
fn expected_moves_remaining(move_number: u16) -> f64 {
    let expected = 40.0 - move_number as f64 * 0.5;
    expected.max(20.0)
}
