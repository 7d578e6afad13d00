//! # QC-18 Light Client On-Demand Retrieval
//!
//! Fetches individual chain objects from untrusted servers for a light
//! client that keeps only headers.
//!
//! **Subsystem ID:** 18  
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! A light client asks servers for headers, bodies, receipts, contract
//! code and trie proofs on demand. This crate decides which server gets
//! each request, verifies every answer through a caller-supplied check,
//! retries elsewhere on failure and learns over time which servers are
//! worth asking.
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | `PeerRegistry` | Connected servers, lifecycle notifications |
//! | `ValueTracker` | Decayed value-per-cost scores, persisted |
//! | `RequestDistributor` | Per-request peer selection, timeouts, failover |
//! | `RetrieveManager` | Validated single-result retrieval |
//! | `ServerPool` | Discovery, dialing, explore/exploit slots |
//! | `LightOdrClient` | Wiring and lifecycle |
//!
//! ## Module Structure
//!
//! ```text
//! qc-18-light-odr/
//! ├── domain/          # Requests, peer IDs, pool entries, errors
//! ├── algorithms/      # Decay accumulators, selection, timeouts, backoff
//! ├── ports/           # OdrApi (inbound) + connection/store/dialer traits (outbound)
//! ├── adapters/        # System clock, in-memory and RocksDB stores
//! ├── application/     # Registry, tracker, distributor, retrieval, pool, client
//! └── config.rs        # OdrConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{InMemoryKVStore, SystemClock};
#[cfg(feature = "rocksdb")]
pub use adapters::{RocksDbConfig, RocksDbKVStore};
pub use application::{
    Delivery, DistributorRequest, LightOdrClient, Peer, PeerRegistry, PeerSubscriber,
    RequestDistributor, RequestId, RequestTicket, RetrieveManager, ServerPool, ValueTracker,
    ValueTrackerHandle, ValueTrackerSubscription,
};
pub use config::{DistributorConfig, OdrConfig, ServerPoolConfig, ValueTrackerConfig};
pub use domain::{
    ConfigError, CostTable, DialError, EntryState, Hash, HeaderOrigin, OdrError, OdrRequest,
    PeerCapabilities, PeerId, PeerValueStats, PoolEntry, RequestCost, RequestKind, Retrieved,
    ServerAddress, SessionKind, StorageError, Timestamp, Topic, TransportError, ValidationError,
    NEUTRAL_SCORE,
};
pub use ports::{
    Clock, DiscoverySource, KeyValueStore, OdrApi, PeerConnection, PoolDialer, ResponseCheck,
    ResponseValidator,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
