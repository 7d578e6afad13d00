//! # Domain Errors
//!
//! Error types for Light Client On-Demand Retrieval.
//!
//! Only terminal request outcomes reach callers. Per-attempt failures
//! (timeouts, transport errors, invalid payloads) are absorbed by the
//! distributor and turned into retry-with-exclusion.

use super::value_objects::PeerId;
use thiserror::Error;

/// ODR error taxonomy surfaced by the public API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OdrError {
    /// A peer with this ID is already registered.
    #[error("Peer already registered: {0}")]
    DuplicatePeer(PeerId),

    /// No peer with this ID is registered (non-fatal).
    #[error("Peer not found: {0}")]
    NotFound(PeerId),

    /// The request deadline passed before any peer delivered a valid answer.
    #[error("Request timed out")]
    Timeout,

    /// Every eligible peer was tried and none produced a valid answer.
    #[error("Retrieval exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of peers that were tried
        attempts: usize,
    },

    /// A response failed validation.
    ///
    /// Internal: converted into retry-with-exclusion by the distributor.
    #[error("Response validation failed: {0}")]
    ValidationFailed(String),

    /// Explicit cancellation or distributor shutdown.
    #[error("Request cancelled")]
    Cancelled,

    /// The peer set has been closed; no more registrations.
    #[error("Peer registry closed")]
    Closed,

    /// Durable storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OdrError {
    /// Whether the caller may reasonably retry the same retrieval later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OdrError::Exhausted { .. } | OdrError::Timeout)
    }
}

/// Transport-level failure reported by a peer connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The remote peer disconnected while the request was in flight.
    #[error("Peer disconnected")]
    Disconnected,

    /// The response frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Rejection returned by a caller-supplied response validator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    /// Why the response was rejected.
    pub reason: String,
}

impl ValidationError {
    /// Create a validation error with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Database backend failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Dial failures reported by the pool's connection dialer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialError {
    /// Remote refused or did not answer.
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Protocol handshake failed (wrong network, version mismatch).
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Dial did not complete in time.
    #[error("Dial timed out")]
    Timeout,
}

/// Configuration parsing and validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// TOML could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
