//! # Inbound Ports
//!
//! API trait defining what the ODR core offers to the rest of the node.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    Hash, OdrError, OdrRequest, PeerCapabilities, PeerId, PeerValueStats, Retrieved,
};
use crate::ports::outbound::{PeerConnection, ResponseCheck};

/// On-demand retrieval API - inbound port.
///
/// The protocol handler calls the peer lifecycle methods; light chain,
/// state and transaction-pool code calls `retrieve_raw`.
#[async_trait]
pub trait OdrApi: Send + Sync {
    /// A server completed its handshake.
    fn register_peer(
        &self,
        id: PeerId,
        capabilities: PeerCapabilities,
        connection: Arc<dyn PeerConnection>,
    ) -> Result<(), OdrError>;

    /// A server disconnected.
    fn unregister_peer(&self, id: &PeerId) -> Result<(), OdrError>;

    /// A server announced a new head.
    fn announce_head(&self, id: &PeerId, number: u64, hash: Hash) -> Result<(), OdrError>;

    /// Fetch `request`, accepting the first response that passes `check`.
    async fn retrieve_raw(
        &self,
        request: OdrRequest,
        check: ResponseCheck,
        deadline: Option<Duration>,
    ) -> Result<Retrieved<Vec<u8>>, OdrError>;

    /// Connected servers.
    fn peer_count(&self) -> usize;

    /// Value tracker view of every active server.
    fn value_stats(&self) -> Vec<PeerValueStats>;

    /// Shut down. Idempotent.
    async fn close(&self);
}
