//! # Test Utilities
//!
//! Deterministic stand-ins for the outbound ports: a manually advanced
//! clock, scripted peer connections, a fixed discovery list and a dialer
//! that registers peers straight into a [`PeerRegistry`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::application::registry::{Peer, PeerRegistry};
use crate::domain::{
    DialError, OdrError, OdrRequest, PeerCapabilities, PeerId, ServerAddress, Timestamp, Topic,
    TransportError,
};
use crate::ports::{Clock, DiscoverySource, PeerConnection, PoolDialer};

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Clock reading `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute reading.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// What a [`MockConnection`] does with each request.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Answer immediately.
    Respond(Vec<u8>),
    /// Answer after a delay.
    RespondAfter(Duration, Vec<u8>),
    /// Never answer.
    Hang,
    /// Fail with a transport error.
    Fail(TransportError),
}

/// Scripted peer connection that counts requests.
#[derive(Debug)]
pub struct MockConnection {
    behavior: Mutex<MockBehavior>,
    calls: AtomicUsize,
}

impl MockConnection {
    /// Connection following `behavior`.
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always answers `payload`.
    pub fn responding(payload: Vec<u8>) -> Arc<Self> {
        Self::new(MockBehavior::Respond(payload))
    }

    /// Never answers.
    pub fn hanging() -> Arc<Self> {
        Self::new(MockBehavior::Hang)
    }

    /// Always fails as if disconnected.
    pub fn failing() -> Arc<Self> {
        Self::new(MockBehavior::Fail(TransportError::Disconnected))
    }

    /// Change behavior for subsequent requests.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn send(&self, _request: &OdrRequest) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().clone();
        match behavior {
            MockBehavior::Respond(payload) => Ok(payload),
            MockBehavior::RespondAfter(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Fail(err) => Err(err),
        }
    }
}

/// Discovery source yielding a fixed list, then `None` until restarted.
#[derive(Debug, Default)]
pub struct MockDiscovery {
    candidates: Vec<ServerAddress>,
    position: usize,
}

impl MockDiscovery {
    /// Source over `candidates`.
    pub fn new(candidates: Vec<ServerAddress>) -> Self {
        Self {
            candidates,
            position: 0,
        }
    }
}

#[async_trait]
impl DiscoverySource for MockDiscovery {
    async fn next_candidate(&mut self, _topic: &Topic) -> Option<ServerAddress> {
        let next = self.candidates.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        next
    }

    fn restart(&mut self) {
        self.position = 0;
    }
}

/// Dialer that "connects" by registering a responsive peer.
pub struct MockDialer {
    registry: Arc<PeerRegistry>,
    refused: Mutex<HashSet<PeerId>>,
    dialed: Mutex<Vec<PeerId>>,
    dropped: Mutex<Vec<PeerId>>,
    head: u64,
}

impl MockDialer {
    /// Dialer registering into `registry`; peers advertise head 1,000,000.
    pub fn new(registry: Arc<PeerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            refused: Mutex::new(HashSet::new()),
            dialed: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
            head: 1_000_000,
        })
    }

    /// Fail future dials to `id`.
    pub fn refuse(&self, id: PeerId) {
        self.refused.lock().insert(id);
    }

    /// Let dials to `id` succeed again.
    pub fn accept(&self, id: PeerId) {
        self.refused.lock().remove(&id);
    }

    /// Every dial attempt, in order.
    pub fn dialed(&self) -> Vec<PeerId> {
        self.dialed.lock().clone()
    }

    /// Dial attempts to `id`.
    pub fn dial_count(&self, id: &PeerId) -> usize {
        self.dialed.lock().iter().filter(|d| *d == id).count()
    }

    /// Every dropped peer, in order.
    pub fn dropped(&self) -> Vec<PeerId> {
        self.dropped.lock().clone()
    }
}

#[async_trait]
impl PoolDialer for MockDialer {
    async fn dial(&self, address: &ServerAddress, _topic: &Topic) -> Result<(), DialError> {
        self.dialed.lock().push(address.id);
        if self.refused.lock().contains(&address.id) {
            return Err(DialError::Refused(address.endpoint.clone()));
        }
        let peer = Arc::new(Peer::new(
            address.id,
            PeerCapabilities::new(3, self.head),
            MockConnection::responding(b"ok".to_vec()),
        ));
        match self.registry.register(peer) {
            Ok(()) | Err(OdrError::DuplicatePeer(_)) => Ok(()),
            Err(e) => Err(DialError::Handshake(e.to_string())),
        }
    }

    async fn drop_peer(&self, id: &PeerId) {
        self.dropped.lock().push(*id);
        let _ = self.registry.unregister(id);
    }
}
