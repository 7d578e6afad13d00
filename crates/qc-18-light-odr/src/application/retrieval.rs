//! # Retrieve Manager
//!
//! Client-facing retrieval: wraps a validator around a distributor request
//! and hands back a single validated, decoded result.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::application::distributor::{DistributorRequest, RequestDistributor, RequestId};
use crate::domain::{OdrError, OdrRequest, Retrieved, ValidationError};
use crate::ports::{ResponseCheck, ResponseValidator};

/// Cancels the distributor request if the caller stops waiting.
struct CancelOnDrop<'a> {
    distributor: &'a RequestDistributor,
    id: RequestId,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.distributor.cancel(self.id);
        }
    }
}

/// Retrieval front end over a shared distributor.
pub struct RetrieveManager {
    distributor: Arc<RequestDistributor>,
    default_deadline: Duration,
}

impl RetrieveManager {
    /// Create a manager; `default_deadline` applies when a call passes none.
    pub fn new(distributor: Arc<RequestDistributor>, default_deadline: Duration) -> Self {
        Self {
            distributor,
            default_deadline,
        }
    }

    /// Fetch `request` and return the first response `validator` accepts.
    ///
    /// Rejected responses exclude the responding peer and the request moves
    /// on. Terminal errors are `Exhausted`, `Timeout` and `Cancelled`.
    /// Dropping the returned future cancels the request.
    pub async fn retrieve<V>(
        &self,
        request: OdrRequest,
        validator: V,
        deadline: Option<Duration>,
    ) -> Result<Retrieved<V::Output>, OdrError>
    where
        V: ResponseValidator,
    {
        let slot: Arc<Mutex<Option<V::Output>>> = Arc::new(Mutex::new(None));
        let check: ResponseCheck = {
            let slot = Arc::clone(&slot);
            Arc::new(move |raw: &[u8]| -> Result<(), ValidationError> {
                let value = validator.validate(raw)?;
                *slot.lock() = Some(value);
                Ok(())
            })
        };

        let deadline = Instant::now() + deadline.unwrap_or(self.default_deadline);
        let ticket = self.distributor.submit(DistributorRequest {
            request,
            check,
            deadline: Some(deadline),
        });

        let mut guard = CancelOnDrop {
            distributor: &self.distributor,
            id: ticket.id(),
            armed: true,
        };
        let outcome = ticket.wait().await;
        guard.armed = false;

        let delivery = outcome?;
        let value = slot
            .lock()
            .take()
            .ok_or_else(|| OdrError::ValidationFailed("accepted response left no value".into()))?;
        Ok(Retrieved {
            value,
            peer: delivery.peer,
            attempts: delivery.attempts,
        })
    }

    /// Run several independent retrievals concurrently.
    ///
    /// Results are returned in request order.
    pub async fn retrieve_many<V>(
        &self,
        requests: Vec<OdrRequest>,
        validator: V,
        deadline: Option<Duration>,
    ) -> Vec<Result<Retrieved<V::Output>, OdrError>>
    where
        V: ResponseValidator + Clone,
    {
        join_all(
            requests
                .into_iter()
                .map(|request| self.retrieve(request, validator.clone(), deadline)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKVStore;
    use crate::application::registry::{Peer, PeerRegistry};
    use crate::application::value_tracker::{ValueTracker, ValueTrackerSubscription};
    use crate::config::{DistributorConfig, ValueTrackerConfig};
    use crate::domain::{PeerCapabilities, PeerId};
    use crate::test_utils::{ManualClock, MockConnection};

    fn setup() -> (Arc<PeerRegistry>, Arc<RequestDistributor>, RetrieveManager) {
        let registry = Arc::new(PeerRegistry::new());
        let tracker = Arc::new(ValueTracker::new(
            ValueTrackerConfig::for_testing(),
            Arc::new(InMemoryKVStore::new()),
            Arc::new(ManualClock::new(0)),
        ));
        let distributor = Arc::new(RequestDistributor::new(
            DistributorConfig::for_testing(),
            registry.clone(),
            tracker.clone(),
        ));
        registry.subscribe(distributor.subscription());
        registry.subscribe(Arc::new(ValueTrackerSubscription::new(tracker)));
        let manager = RetrieveManager::new(distributor.clone(), Duration::from_secs(2));
        (registry, distributor, manager)
    }

    fn add_peer(registry: &PeerRegistry, byte: u8, payload: &[u8]) -> PeerId {
        let id = PeerId::new([byte; 32]);
        registry
            .register(Arc::new(Peer::new(
                id,
                PeerCapabilities::new(3, 100),
                MockConnection::responding(payload.to_vec()),
            )))
            .unwrap();
        id
    }

    fn code_request(n: u8) -> OdrRequest {
        OdrRequest::Code {
            block_hash: [0; 32],
            block_number: 1,
            code_hash: [n; 32],
        }
    }

    /// Accepts payloads of the form "len:<n>" and decodes n.
    fn decode_len(raw: &[u8]) -> Result<usize, ValidationError> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.strip_prefix("len:"))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ValidationError::new("not a length record"))
    }

    #[tokio::test]
    async fn test_retrieve_returns_decoded_value() {
        let (registry, _, manager) = setup();
        let peer = add_peer(&registry, 1, b"len:42");

        let got = manager.retrieve(code_request(1), decode_len, None).await.unwrap();
        assert_eq!(got.value, 42);
        assert_eq!(got.peer, peer);
        assert_eq!(got.attempts, 1);
    }

    #[tokio::test]
    async fn test_validation_failure_excludes_peer() {
        let (registry, _, manager) = setup();
        add_peer(&registry, 1, b"garbage");
        let good = add_peer(&registry, 2, b"len:7");

        let got = manager.retrieve(code_request(1), decode_len, None).await.unwrap();
        assert_eq!(got.peer, good);
        assert_eq!(got.attempts, 2);
    }

    #[tokio::test]
    async fn test_every_response_invalid_exhausts() {
        let (registry, _, manager) = setup();
        add_peer(&registry, 1, b"garbage");
        add_peer(&registry, 2, b"also garbage");

        let err = manager
            .retrieve(code_request(1), decode_len, None)
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Exhausted { attempts: 2 });
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_without_peers() {
        let (_, _, manager) = setup();
        let err = manager
            .retrieve(code_request(1), decode_len, Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Timeout);
    }

    #[tokio::test]
    async fn test_retrieve_many_independent() {
        let (registry, _, manager) = setup();
        add_peer(&registry, 1, b"len:3");

        let results = manager
            .retrieve_many((0..5).map(code_request).collect(), decode_len, None)
            .await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.as_ref().map(|g| g.value) == Ok(3)));
    }

    #[tokio::test]
    async fn test_dropped_future_cancels_request() {
        let (_, distributor, manager) = setup();
        let fut = manager.retrieve(code_request(1), decode_len, None);
        let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        assert_eq!(distributor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_distributor_cancels() {
        let (registry, distributor, manager) = setup();
        add_peer(&registry, 1, b"len:1");
        distributor.close();
        let err = manager
            .retrieve(code_request(1), decode_len, None)
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Cancelled);
    }
}
