//! # Light ODR Client
//!
//! Wires the registry, value tracker, distributor, retrieve manager and
//! server pool into one lifecycle.
//!
//! Registry subscribers are attached in a fixed order: distributor, value
//! tracker, server pool. On connect the distributor attaches the tracker
//! handle before it wakes dispatch. On disconnect it charges the failed
//! attempts while the peer still has that handle, and the pool reads the
//! final long-term score after the tracker has flushed it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::distributor::RequestDistributor;
use crate::application::registry::{Peer, PeerRegistry};
use crate::application::retrieval::RetrieveManager;
use crate::application::server_pool::ServerPool;
use crate::application::value_tracker::{ValueTracker, ValueTrackerSubscription};
use crate::config::OdrConfig;
use crate::domain::{
    Hash, OdrError, OdrRequest, PeerCapabilities, PeerId, PeerValueStats, Retrieved, Topic,
    ValidationError,
};
use crate::ports::{
    Clock, DiscoverySource, KeyValueStore, OdrApi, PeerConnection, PoolDialer, ResponseCheck,
    ResponseValidator,
};

/// The ODR core of a light client.
pub struct LightOdrClient {
    registry: Arc<PeerRegistry>,
    tracker: Arc<ValueTracker>,
    distributor: Arc<RequestDistributor>,
    retriever: RetrieveManager,
    pool: ServerPool,
    closed: AtomicBool,
}

impl LightOdrClient {
    /// Build every component. Must be called from within a Tokio runtime.
    pub fn new(
        config: OdrConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        discovery: Box<dyn DiscoverySource>,
    ) -> Result<Self, OdrError> {
        config.validate()?;

        let registry = Arc::new(PeerRegistry::new());
        let tracker = Arc::new(ValueTracker::new(
            config.value_tracker.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let default_deadline = config.distributor.default_deadline();
        let distributor = Arc::new(RequestDistributor::new(
            config.distributor,
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));
        let retriever = RetrieveManager::new(Arc::clone(&distributor), default_deadline);
        let pool = ServerPool::new(
            config.server_pool,
            discovery,
            Arc::clone(&tracker),
            store,
            clock,
        )?;

        registry.subscribe(distributor.subscription());
        registry.subscribe(Arc::new(ValueTrackerSubscription::new(Arc::clone(&tracker))));
        registry.subscribe(pool.subscription());

        info!("[qc-18] Light ODR client initialized");
        Ok(Self {
            registry,
            tracker,
            distributor,
            retriever,
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Start looking for servers of the network identified by `genesis`.
    pub fn start(&self, dialer: Arc<dyn PoolDialer>, genesis: &Hash, protocol_version: u32) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.pool
            .start(dialer, Topic::for_protocol(genesis, protocol_version));
    }

    /// Fetch `request` and return the first response `validator` accepts.
    pub async fn retrieve<V>(
        &self,
        request: OdrRequest,
        validator: V,
        deadline: Option<Duration>,
    ) -> Result<Retrieved<V::Output>, OdrError>
    where
        V: ResponseValidator,
    {
        self.retriever.retrieve(request, validator, deadline).await
    }

    /// Run several independent retrievals concurrently.
    pub async fn retrieve_many<V>(
        &self,
        requests: Vec<OdrRequest>,
        validator: V,
        deadline: Option<Duration>,
    ) -> Vec<Result<Retrieved<V::Output>, OdrError>>
    where
        V: ResponseValidator + Clone,
    {
        self.retriever
            .retrieve_many(requests, validator, deadline)
            .await
    }

    /// Peer registry.
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Value tracker.
    pub fn tracker(&self) -> &Arc<ValueTracker> {
        &self.tracker
    }

    /// Request distributor.
    pub fn distributor(&self) -> &Arc<RequestDistributor> {
        &self.distributor
    }

    /// Server pool.
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut down: refuse new peers, cancel pending requests, stop the
    /// pool and flush the value tracker. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.close();
        self.distributor.close();
        self.pool.stop().await;
        self.tracker.stop();
        info!("[qc-18] Light ODR client closed");
    }
}

/// Runs a type-erased check and hands back the raw payload.
struct RawCheck(ResponseCheck);

impl ResponseValidator for RawCheck {
    type Output = Vec<u8>;

    fn validate(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError> {
        (self.0)(response)?;
        Ok(response.to_vec())
    }
}

#[async_trait]
impl OdrApi for LightOdrClient {
    fn register_peer(
        &self,
        id: PeerId,
        capabilities: PeerCapabilities,
        connection: Arc<dyn PeerConnection>,
    ) -> Result<(), OdrError> {
        self.registry
            .register(Arc::new(Peer::new(id, capabilities, connection)))
    }

    fn unregister_peer(&self, id: &PeerId) -> Result<(), OdrError> {
        self.registry.unregister(id).map(|_| ())
    }

    fn announce_head(&self, id: &PeerId, number: u64, hash: Hash) -> Result<(), OdrError> {
        let peer = self.registry.peer(id).ok_or(OdrError::NotFound(*id))?;
        peer.update_head(number, hash);
        self.distributor.redispatch();
        Ok(())
    }

    async fn retrieve_raw(
        &self,
        request: OdrRequest,
        check: ResponseCheck,
        deadline: Option<Duration>,
    ) -> Result<Retrieved<Vec<u8>>, OdrError> {
        self.retrieve(request, RawCheck(check), deadline).await
    }

    fn peer_count(&self) -> usize {
        self.registry.len()
    }

    fn value_stats(&self) -> Vec<PeerValueStats> {
        self.tracker.snapshot()
    }

    async fn close(&self) {
        LightOdrClient::close(self).await;
    }
}
