//! # Adapters
//!
//! Concrete implementations of the outbound ports.
//!
//! - `SystemClock` - wall clock
//! - `InMemoryKVStore` - volatile store (tests, ephemeral nodes)
//! - `RocksDbKVStore` - durable store (requires "rocksdb" feature)

pub mod clock;
pub mod memory_store;
#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;

pub use clock::SystemClock;
pub use memory_store::InMemoryKVStore;
#[cfg(feature = "rocksdb")]
pub use rocksdb_store::{RocksDbConfig, RocksDbKVStore};
