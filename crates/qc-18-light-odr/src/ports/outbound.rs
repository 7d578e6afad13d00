//! # Outbound Ports
//!
//! Traits for external dependencies: the per-peer send primitive,
//! discovery, dialing, durable storage, time and response validation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{
    DialError, OdrRequest, PeerId, ServerAddress, StorageError, Timestamp, Topic,
    TransportError, ValidationError,
};

/// Send capability of one established peer session.
///
/// Owned by the transport layer; the registry only keeps a reference.
/// Each call maps to exactly one completion: a raw response payload or
/// a transport failure. Callers impose their own timeout.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Deliver `request` and wait for the raw response.
    async fn send(&self, request: &OdrRequest) -> Result<Vec<u8>, TransportError>;
}

/// Candidate server source (DNS lists, discovery tables, static lists).
///
/// Lazy and effectively infinite; `None` means the source is drained for
/// now and should be restarted.
#[async_trait]
pub trait DiscoverySource: Send {
    /// Next candidate serving `topic`.
    async fn next_candidate(&mut self, topic: &Topic) -> Option<ServerAddress>;

    /// Rewind the source so it can produce candidates again.
    fn restart(&mut self);
}

/// Outbound connection management used by the server pool.
#[async_trait]
pub trait PoolDialer: Send + Sync {
    /// Dial `address` and run the protocol handshake.
    ///
    /// On success the session layer registers the peer with the registry
    /// before this returns.
    async fn dial(&self, address: &ServerAddress, topic: &Topic) -> Result<(), DialError>;

    /// Disconnect an established session (eviction).
    async fn drop_peer(&self, id: &PeerId);
}

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbKVStore` (feature `rocksdb`)
/// Testing: `InMemoryKVStore`
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// Wall-clock time source (for testability).
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Caller-supplied response check.
///
/// Typically verifies a Merkle proof against a trusted root taken from
/// the light chain, and decodes the payload on success.
pub trait ResponseValidator: Send + Sync + 'static {
    /// Decoded value produced on acceptance.
    type Output: Send + 'static;

    /// Accept and decode, or reject.
    fn validate(&self, response: &[u8]) -> Result<Self::Output, ValidationError>;
}

impl<F, T> ResponseValidator for F
where
    F: Fn(&[u8]) -> Result<T, ValidationError> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn validate(&self, response: &[u8]) -> Result<T, ValidationError> {
        self(response)
    }
}

/// Type-erased acceptance check run by the distributor after each response.
///
/// Built by the retrieve manager around a `ResponseValidator`; the decoded
/// value is kept on the caller's side.
pub type ResponseCheck = Arc<dyn Fn(&[u8]) -> Result<(), ValidationError> + Send + Sync>;
