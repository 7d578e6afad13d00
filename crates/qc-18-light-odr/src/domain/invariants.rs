//! # Domain Invariants
//!
//! Constants and rules that must always hold.

use super::value_objects::PeerId;

/// Blocks per CHT section on the client side.
pub const CHT_SECTION_SIZE: u64 = 32_768;

/// Light protocol versions this client can talk to.
pub const SUPPORTED_PROTOCOL_VERSIONS: [u32; 3] = [2, 3, 4];

/// Default accumulator half-lives: one hour, 100 hours, 1000 hours.
pub const DEFAULT_HALF_LIVES_SECS: [u64; 3] = [3_600, 360_000, 3_600_000];

/// Default weights for combining accumulators; the shortest half-life dominates.
pub const DEFAULT_SCORE_WEIGHTS: [f64; 3] = [1.0, 0.25, 0.0625];

/// Score assumed for a peer/kind with no history.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Invariant: a request is never sent twice to the same peer.
pub fn invariant_peer_untried(tried: &[PeerId], candidate: &PeerId) -> bool {
    !tried.contains(candidate)
}

/// Invariant: value-per-cost scores stay within [0, 1].
///
/// Values are reported as `cost * quality` with `quality` in [0, 1], and
/// the neutral prior is inside the same range.
pub fn invariant_score_bounded(score: f64) -> bool {
    score.is_finite() && (0.0..=1.0).contains(&score)
}

/// Invariant: tried peers form a set (strictly growing, no repeats).
pub fn invariant_tried_is_set(tried: &[PeerId]) -> bool {
    tried
        .iter()
        .enumerate()
        .all(|(i, id)| !tried[..i].contains(id))
}
