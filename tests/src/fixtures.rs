//! Shared builders for the integration scenarios.

use std::sync::Arc;

use qc_18_light_odr::test_utils::{ManualClock, MockConnection, MockDiscovery};
use qc_18_light_odr::{
    InMemoryKVStore, KeyValueStore, LightOdrClient, OdrApi, OdrConfig, OdrRequest,
    PeerCapabilities, PeerId, ServerAddress, ValidationError,
};

/// Payload the scripted "honest" servers return.
pub const VALID_PAYLOAD: &[u8] = b"valid";

/// Client over a fresh in-memory store.
pub fn client() -> LightOdrClient {
    client_with_store(Arc::new(InMemoryKVStore::new()), Vec::new())
}

/// Client over `store`, discovering `candidates`.
pub fn client_with_store(
    store: Arc<dyn KeyValueStore>,
    candidates: Vec<ServerAddress>,
) -> LightOdrClient {
    odr_telemetry::init_test_logging();
    LightOdrClient::new(
        OdrConfig::for_testing(),
        store,
        Arc::new(ManualClock::new(1_000_000)),
        Box::new(MockDiscovery::new(candidates)),
    )
    .expect("test config is valid")
}

/// Peer ID built from one repeated byte.
pub fn peer_id(byte: u8) -> PeerId {
    PeerId::new([byte; 32])
}

/// Register a server with a high head behind `connection`.
pub fn add_peer(client: &LightOdrClient, byte: u8, connection: Arc<MockConnection>) -> PeerId {
    let id = peer_id(byte);
    client
        .register_peer(id, PeerCapabilities::new(4, 1_000_000), connection)
        .expect("fresh peer registers");
    id
}

/// Receipts request anchored at `block_number`.
pub fn receipts(block_number: u64) -> OdrRequest {
    OdrRequest::Receipts {
        block_hash: [block_number as u8; 32],
        block_number,
    }
}

/// Accepts only [`VALID_PAYLOAD`].
pub fn expect_valid(raw: &[u8]) -> Result<Vec<u8>, ValidationError> {
    if raw == VALID_PAYLOAD {
        Ok(raw.to_vec())
    } else {
        Err(ValidationError::new("proof does not match root"))
    }
}

/// Server candidate reachable at a made-up endpoint.
pub fn candidate(byte: u8) -> ServerAddress {
    ServerAddress::new(peer_id(byte), format!("192.0.2.{byte}:30303"))
}
