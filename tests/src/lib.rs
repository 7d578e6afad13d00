//! # Light ODR Test Suite
//!
//! End-to-end scenarios driving the full client through its public API
//! with scripted peers.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Client builders, peers, validators
//! └── integration/
//!     ├── failover.rs   # Retry, timeout, exhaustion, disconnects
//!     └── lifecycle.rs  # Shutdown, persistence, server pool
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p odr-tests
//! cargo bench -p odr-tests
//! ```

pub mod fixtures;
pub mod integration;
