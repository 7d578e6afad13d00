//! # Domain Entities
//!
//! Server capabilities advertised at handshake, and the server pool's
//! long-lived candidate records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::invariants::{NEUTRAL_SCORE, SUPPORTED_PROTOCOL_VERSIONS};
use super::value_objects::{
    CostTable, Hash, OdrRequest, PeerId, RequestKind, ServerAddress, Timestamp,
};

/// Capabilities a server advertised during the protocol handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Advertised head block number.
    pub head_number: u64,
    /// Advertised head block hash.
    pub head_hash: Hash,
    /// Relative request costs.
    pub cost_table: CostTable,
    /// Server-side limit on concurrent requests, if announced.
    pub max_in_flight: Option<usize>,
}

impl PeerCapabilities {
    /// Capabilities of a server at `head_number` using default costs.
    pub fn new(protocol_version: u32, head_number: u64) -> Self {
        Self {
            protocol_version,
            head_number,
            head_hash: [0u8; 32],
            cost_table: CostTable::new(),
            max_in_flight: None,
        }
    }

    /// Whether this server can answer `request` ("canSend").
    ///
    /// The protocol version must be supported and the advertised head
    /// must cover the block the request is anchored to.
    pub fn can_serve(&self, request: &OdrRequest) -> bool {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version) {
            return false;
        }
        match request.required_head() {
            Some(required) => self.head_number >= required,
            None => true,
        }
    }
}

/// How a pool connection came to exist; drives slot accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    /// Configured trusted server, never evicted.
    Trusted,
    /// Dialed because of its known reputation.
    Exploit,
    /// Dialed to explore a never-connected candidate.
    Explore,
    /// Connected without the pool dialing it.
    External,
}

/// Runtime connection state of a pool entry (not persisted).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryState {
    /// Not connected, not being dialed.
    #[default]
    Idle,
    /// Dial in progress.
    Dialing(SessionKind),
    /// Registered with the peer registry.
    Connected {
        /// Why the connection exists.
        kind: SessionKind,
        /// When it was registered.
        since: Timestamp,
    },
}

/// Server pool record for one candidate server.
///
/// Created on first discovery and never deleted; the pool only
/// downgrades the reputation or pushes the next dial further out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Dialable address.
    pub address: ServerAddress,
    /// Long-horizon reputation in [0, 1], derived from value tracker summaries.
    pub reputation: f64,
    /// Whether a session with this server was ever established.
    pub explored: bool,
    /// Configured as trusted.
    pub trusted: bool,
    /// Consecutive failed dials.
    pub dial_failures: u32,
    /// Earliest time the next dial may start.
    pub next_dial_at: Timestamp,
    /// Completed sessions.
    pub sessions: u64,
    /// When the last session was established.
    pub last_connected: Option<Timestamp>,
    /// Current connection state.
    #[serde(skip)]
    pub state: EntryState,
}

impl PoolEntry {
    /// Fresh record for a newly discovered server.
    pub fn discovered(address: ServerAddress, now: Timestamp) -> Self {
        Self {
            address,
            reputation: NEUTRAL_SCORE,
            explored: false,
            trusted: false,
            dial_failures: 0,
            next_dial_at: now,
            sessions: 0,
            last_connected: None,
            state: EntryState::Idle,
        }
    }

    /// Idle and past its backoff.
    pub fn is_dialable(&self, now: Timestamp) -> bool {
        self.state == EntryState::Idle && self.next_dial_at <= now
    }

    /// Whether a session is currently up.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, EntryState::Connected { .. })
    }

    /// Whether a dial is in progress.
    pub fn is_dialing(&self) -> bool {
        matches!(self.state, EntryState::Dialing(_))
    }
}

/// A validated retrieval result.
#[derive(Clone, Debug, PartialEq)]
pub struct Retrieved<T> {
    /// Decoded value produced by the validator.
    pub value: T,
    /// Peer that delivered it.
    pub peer: PeerId,
    /// Peers tried, including the one that succeeded.
    pub attempts: usize,
}

/// Read-only view of what the value tracker knows about one peer.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerValueStats {
    /// Peer ID.
    pub peer: PeerId,
    /// Current score for each request kind the peer has served.
    pub scores: BTreeMap<RequestKind, f64>,
    /// Long-horizon value per cost across all kinds.
    pub long_term: f64,
    /// Decayed mean response latency.
    pub expected_latency: Option<Duration>,
}
