//! # Application Module
//!
//! Application services orchestrating the domain and outbound ports.

pub mod client;
pub mod distributor;
pub mod registry;
pub mod retrieval;
pub mod server_pool;
pub mod value_tracker;

pub use client::LightOdrClient;
pub use distributor::{Delivery, DistributorRequest, RequestDistributor, RequestId, RequestTicket};
pub use registry::{Peer, PeerRegistry, PeerSubscriber};
pub use retrieval::RetrieveManager;
pub use server_pool::ServerPool;
pub use value_tracker::{ValueTracker, ValueTrackerHandle, ValueTrackerSubscription};
