//! Reciprocal Rank Fusion
//!
//! Combines vector and lexical result lists:
//!
//! ```text
//! score(d) = sum over lists L of 1 / (k + rank_L(d))
//! ```
//!
//! RRF normalizes across incompatible scoring scales and rewards
//! documents that appear in both lists. `k = 60` dampens the influence
//! of top ranks.

use std::collections::HashMap;

/// Conventional RRF constant
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuse ranked id lists; output sorted by fused score, best first
pub fn reciprocal_rank_fusion(lists: &[&[(i64, f32)]], k: f32) -> Vec<(i64, f32)> {
    let mut scores: HashMap<i64, f32> = HashMap::new();

    for list in lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(*id).or_default() += 1.0 / (k + rank as f32 + 1.0);
        }
    }

    let mut fused: Vec<(i64, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    fused
}

// ============================================================================
// TESTS
// ============================================================================
