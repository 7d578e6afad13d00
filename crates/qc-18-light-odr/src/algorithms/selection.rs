//! # Peer Selection
//!
//! Ranking of eligible peers for the next dispatch.

use std::cmp::Ordering;

use crate::domain::PeerId;

/// An eligible peer as seen by the distributor at selection time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Peer ID.
    pub id: PeerId,
    /// Value tracker score for the request kind.
    pub score: f64,
    /// Requests currently in flight to this peer.
    pub outstanding: usize,
    /// Registration sequence number (lower registered earlier).
    pub order: u64,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    // Higher score wins, then lower load, then earlier registration.
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.outstanding.cmp(&b.outstanding))
        .then(a.order.cmp(&b.order))
}

/// Best candidate, or `None` if there are none.
pub fn select_best<I>(candidates: I) -> Option<Candidate>
where
    I: IntoIterator<Item = Candidate>,
{
    candidates
        .into_iter()
        .min_by(|a, b| rank(a, b))
}
