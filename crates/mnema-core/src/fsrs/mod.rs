//! FSRS-style spaced repetition scheduler
//!
//! Per-memory state is a (stability, difficulty) pair. Retrievability
//! decays exponentially with elapsed days:
//!
//! ```text
//! R(delta) = exp(-delta / S)
//! ```
//!
//! Review updates keep the FSRS shape: stability growth is monotone in
//! the grade and larger when retrievability was low at review time (the
//! desirable-difficulty bonus). Difficulty drifts toward a per-grade
//! target and stays clamped to [1, 10].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Floor for stability, in days
pub const MIN_STABILITY: f64 = 0.1;

/// Stability assigned to a freshly created memory
pub const DEFAULT_STABILITY: f64 = 1.0;

/// Difficulty bounds
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Difficulty assigned to a freshly created memory
pub const DEFAULT_DIFFICULTY: f64 = 5.0;

/// Base growth factor for stability on a successful review
const GROWTH: f64 = 1.6;

/// How fast difficulty converges on the grade target
const DIFFICULTY_DRIFT: f64 = 0.3;

// ============================================================================
// GRADES
// ============================================================================

/// Review grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Multiplier on the stability gain; strictly increasing with grade
    fn gain(&self) -> f64 {
        match self {
            Grade::Again => 0.0,
            Grade::Hard => 0.5,
            Grade::Good => 1.0,
            Grade::Easy => 1.5,
        }
    }

    /// Difficulty target the state drifts toward
    fn difficulty_target(&self) -> f64 {
        match self {
            Grade::Again => 8.0,
            Grade::Hard => 6.0,
            Grade::Good => 4.5,
            Grade::Easy => 2.0,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Scheduling state carried by each memory row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsState {
    pub stability: f64,
    pub difficulty: f64,
}

impl Default for FsrsState {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

/// Result of applying a review
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub state: FsrsState,
    /// Retrievability at review time
    pub retrievability: f64,
}

// ============================================================================
// CORE FUNCTIONS
// ============================================================================

/// Retrievability after `elapsed_days` with stability `s`
///
/// Clamped so negative elapsed time (clock skew) reads as fully fresh.
pub fn retrievability(elapsed_days: f64, stability: f64) -> f64 {
    let s = stability.max(MIN_STABILITY);
    (-elapsed_days.max(0.0) / s).exp()
}

/// Next stability after a review at retrievability `r`
///
/// Successful grades never shrink stability. The `(1 - r)` term is the
/// desirable-difficulty bonus: recalling a nearly-forgotten memory
/// strengthens it more than an immediate re-read. Harder memories
/// (higher difficulty) grow slower.
pub fn next_stability(state: FsrsState, r: f64, grade: Grade) -> f64 {
    let s = state.stability.max(MIN_STABILITY);
    if grade == Grade::Again {
        // Lapse: lose half the accumulated stability
        return (s * 0.5).max(MIN_STABILITY);
    }
    let ease = (MAX_DIFFICULTY + 1.0 - state.difficulty) / MAX_DIFFICULTY;
    let gain = GROWTH * grade.gain() * ease * (1.0 - r.clamp(0.0, 1.0));
    s * (1.0 + gain)
}

/// Next difficulty after a review: drift toward the grade target
pub fn next_difficulty(difficulty: f64, grade: Grade) -> f64 {
    let d = difficulty + DIFFICULTY_DRIFT * (grade.difficulty_target() - difficulty);
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Apply a graded review to `state` for a memory last reviewed at
/// `last_review`
pub fn review(
    state: FsrsState,
    last_review: DateTime<Utc>,
    now: DateTime<Utc>,
    grade: Grade,
) -> ReviewOutcome {
    let elapsed = (now - last_review).num_seconds() as f64 / 86_400.0;
    let r = retrievability(elapsed, state.stability);
    ReviewOutcome {
        state: FsrsState {
            stability: next_stability(state, r, grade),
            difficulty: next_difficulty(state.difficulty, grade),
        },
        retrievability: r,
    }
}

/// Testing-effect multiplier applied on retrieval-driven strengthening
///
/// `1 + max(0, 0.9 - R) * 0.5` - retrieving a memory that was close to
/// forgotten earns up to a 45% extra stability boost.
pub fn access_bonus(r: f64) -> f64 {
    1.0 + (0.9 - r).max(0.0) * 0.5
}

// ============================================================================
// TESTS
// ============================================================================
