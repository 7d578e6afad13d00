//! # Server Pool
//!
//! Discovers candidate servers, keeps a bounded set of outbound
//! connections and remembers long-term reputation across restarts.
//!
//! ## Slot Policy
//!
//! | Slot kind | Chosen from | Count |
//! |-----------|-------------|-------|
//! | Trusted | configured trusted servers | all, always dialed |
//! | Explore | never-connected candidates, random | `explore_fraction` of target |
//! | Exploit | best reputation first | remaining target |
//!
//! Under pressure (target reached while unexplored candidates wait) the
//! weakest non-trusted connection below the eviction threshold is dropped.
//! Dial failures push the candidate's next dial out exponentially; they
//! are never fatal.

use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::algorithms::dial_backoff;
use crate::application::registry::{Peer, PeerSubscriber};
use crate::application::value_tracker::ValueTracker;
use crate::config::ServerPoolConfig;
use crate::domain::{
    DialError, EntryState, OdrError, PeerId, PoolEntry, ServerAddress, SessionKind, StorageError,
    Timestamp, Topic,
};
use crate::ports::{Clock, DiscoverySource, KeyValueStore, PoolDialer};

const KEY_PREFIX: &[u8] = b"sp:";

fn entry_key(id: &PeerId) -> Vec<u8> {
    let mut key = KEY_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

struct PoolState {
    entries: BTreeMap<PeerId, PoolEntry>,
    rng: StdRng,
}

struct PoolInner {
    config: ServerPoolConfig,
    tracker: Arc<ValueTracker>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState>,
    discovery: tokio::sync::Mutex<Box<dyn DiscoverySource>>,
    shutdown: Notify,
    stopped: AtomicBool,
}

/// Outbound server connection manager.
pub struct ServerPool {
    inner: Arc<PoolInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerPool {
    /// Create the pool, reloading persisted entries from `store`.
    pub fn new(
        config: ServerPoolConfig,
        discovery: Box<dyn DiscoverySource>,
        tracker: Arc<ValueTracker>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OdrError> {
        let trusted = config.trusted_addresses()?;
        let now = clock.now();

        let mut entries = BTreeMap::new();
        for (key, bytes) in store.prefix_scan(KEY_PREFIX)? {
            match bincode::deserialize::<PoolEntry>(&bytes) {
                Ok(entry) => {
                    entries.insert(entry.address.id, entry);
                }
                Err(e) => {
                    warn!(key = %hex::encode(&key), error = %e, "[qc-18] Skipping unreadable pool entry");
                }
            }
        }
        for address in trusted {
            let entry = entries
                .entry(address.id)
                .or_insert_with(|| PoolEntry::discovered(address.clone(), now));
            entry.address = address;
            entry.trusted = true;
        }
        info!(known = entries.len(), "[qc-18] Server pool loaded");

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                tracker,
                store,
                clock,
                state: Mutex::new(PoolState { entries, rng }),
                discovery: tokio::sync::Mutex::new(discovery),
                shutdown: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    /// Registry subscriber tracking session state and reputation.
    pub fn subscription(&self) -> Arc<dyn PeerSubscriber> {
        Arc::new(PoolSubscription {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Begin background discovery and dialing for `topic`. Idempotent.
    pub fn start(&self, dialer: Arc<dyn PoolDialer>, topic: Topic) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        info!(%topic, "[qc-18] Server pool started");
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run(dialer, topic)));
    }

    /// Halt the dial loop and persist all entries. Idempotent.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_one();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.inner.persist_all();
        info!("[qc-18] Server pool stopped");
    }

    /// One maintenance pass: discover, evict, dial.
    pub async fn maintain(&self, dialer: &dyn PoolDialer, topic: &Topic) {
        self.inner.maintain(dialer, topic).await;
    }

    /// Remember a candidate. Returns false if the pool is full.
    pub fn add_candidate(&self, address: ServerAddress) -> bool {
        self.inner.add_candidate(address)
    }

    /// Copy of one entry.
    pub fn entry(&self, id: &PeerId) -> Option<PoolEntry> {
        self.inner.state.lock().entries.get(id).cloned()
    }

    /// Number of remembered candidates.
    pub fn known_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Live sessions and why each exists.
    pub fn connected(&self) -> Vec<(PeerId, SessionKind)> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .filter_map(|(id, e)| match e.state {
                EntryState::Connected { kind, .. } => Some((*id, kind)),
                _ => None,
            })
            .collect()
    }

    /// Whether the dial loop is running.
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some() && !self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

struct DialPlan {
    address: ServerAddress,
    kind: SessionKind,
}

impl PoolInner {
    async fn run(self: Arc<Self>, dialer: Arc<dyn PoolDialer>, topic: Topic) {
        let interval = Duration::from_millis(self.config.maintain_interval_ms);
        while !self.stopped.load(Ordering::Acquire) {
            self.maintain(dialer.as_ref(), &topic).await;
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("[qc-18] Server pool loop stopped");
    }

    async fn maintain(&self, dialer: &dyn PoolDialer, topic: &Topic) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.discover(topic).await;

        if let Some(victim) = self.pick_eviction() {
            info!(peer = %victim.short(), "[qc-18] Evicting low-value server");
            dialer.drop_peer(&victim).await;
        }

        let plan = self.plan_dials();
        if plan.is_empty() {
            return;
        }
        let results = join_all(plan.iter().map(|p| dialer.dial(&p.address, topic))).await;
        for (p, result) in plan.iter().zip(results) {
            self.dial_finished(&p.address.id, p.kind, result);
        }
    }

    async fn discover(&self, topic: &Topic) {
        let wait = Duration::from_millis(self.config.discovery_wait_ms);
        let mut source = self.discovery.lock().await;
        for _ in 0..self.config.discovery_batch {
            match tokio::time::timeout(wait, source.next_candidate(topic)).await {
                Ok(Some(address)) => {
                    self.add_candidate(address);
                }
                Ok(None) => {
                    source.restart();
                    break;
                }
                Err(_) => break,
            }
        }
    }

    fn add_candidate(&self, address: ServerAddress) -> bool {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&address.id) {
            if entry.address.endpoint != address.endpoint && !entry.trusted {
                entry.address = address;
            }
            return true;
        }
        if state.entries.len() >= self.config.max_known_candidates {
            debug!(peer = %address.id.short(), "[qc-18] Candidate table full");
            return false;
        }
        debug!(peer = %address.id.short(), "[qc-18] New server candidate");
        let entry = PoolEntry::discovered(address, self.clock.now());
        self.persist(&entry);
        state.entries.insert(entry.address.id, entry);
        true
    }

    fn dialable(entry: &PoolEntry, now: Timestamp) -> bool {
        entry.is_dialable(now) && !entry.address.endpoint.is_empty()
    }

    fn plan_dials(&self) -> Vec<DialPlan> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut active = 0;
        let mut explore_active = 0;
        let mut dialing = 0;
        for entry in state.entries.values() {
            match entry.state {
                EntryState::Connected { kind, .. } => {
                    active += 1;
                    if kind == SessionKind::Explore {
                        explore_active += 1;
                    }
                }
                EntryState::Dialing(kind) => {
                    active += 1;
                    dialing += 1;
                    if kind == SessionKind::Explore {
                        explore_active += 1;
                    }
                }
                EntryState::Idle => {}
            }
        }

        let mut dial_budget = self.config.max_dialing.saturating_sub(dialing);
        let mut free = self.config.target_connections.saturating_sub(active);
        let mut plan = Vec::new();

        // Trusted servers are dialed regardless of the target.
        for entry in state.entries.values() {
            if dial_budget == 0 {
                break;
            }
            if entry.trusted && Self::dialable(entry, now) {
                plan.push(DialPlan {
                    address: entry.address.clone(),
                    kind: SessionKind::Trusted,
                });
                dial_budget -= 1;
                free = free.saturating_sub(1);
            }
        }

        let explore_free = self
            .config
            .explore_slots()
            .saturating_sub(explore_active)
            .min(free)
            .min(dial_budget);
        if explore_free > 0 {
            let mut unexplored: Vec<&PoolEntry> = state
                .entries
                .values()
                .filter(|e| !e.trusted && !e.explored && Self::dialable(e, now))
                .collect();
            unexplored.shuffle(&mut state.rng);
            for entry in unexplored.into_iter().take(explore_free) {
                plan.push(DialPlan {
                    address: entry.address.clone(),
                    kind: SessionKind::Explore,
                });
            }
        }
        let taken = plan.iter().filter(|p| p.kind == SessionKind::Explore).count();
        free = free.saturating_sub(taken);
        dial_budget = dial_budget.saturating_sub(taken);

        let exploit_free = free.min(dial_budget);
        if exploit_free > 0 {
            let mut ranked: Vec<&PoolEntry> = state
                .entries
                .values()
                .filter(|e| !e.trusted && Self::dialable(e, now))
                .filter(|e| !plan.iter().any(|p| p.address.id == e.address.id))
                .collect();
            ranked.sort_by(|a, b| {
                b.reputation
                    .partial_cmp(&a.reputation)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.explored.cmp(&a.explored))
                    .then(a.address.id.cmp(&b.address.id))
            });
            let picks: Vec<ServerAddress> = ranked
                .into_iter()
                .take(exploit_free)
                .map(|e| e.address.clone())
                .collect();
            for address in picks {
                plan.push(DialPlan {
                    address,
                    kind: SessionKind::Exploit,
                });
            }
        }

        for p in &plan {
            if let Some(entry) = state.entries.get_mut(&p.address.id) {
                entry.state = EntryState::Dialing(p.kind);
            }
            debug!(peer = %p.address.id.short(), kind = ?p.kind, "[qc-18] Dialing server");
        }
        plan
    }

    fn dial_finished(&self, id: &PeerId, kind: SessionKind, result: Result<(), DialError>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(id) else {
            return;
        };
        if entry.is_dialing() {
            // Dial returned without a registered session.
            entry.state = EntryState::Idle;
        }
        match result {
            Ok(()) => {
                entry.dial_failures = 0;
            }
            Err(e) => {
                entry.dial_failures = entry.dial_failures.saturating_add(1);
                let delay = dial_backoff(
                    entry.dial_failures,
                    Duration::from_millis(self.config.dial_backoff_base_ms),
                    Duration::from_millis(self.config.dial_backoff_max_ms),
                );
                entry.next_dial_at = now.add(delay);
                warn!(
                    peer = %id.short(),
                    kind = ?kind,
                    failures = entry.dial_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "[qc-18] Dial failed"
                );
            }
        }
        let entry = entry.clone();
        drop(state);
        self.persist(&entry);
    }

    /// Weakest evictable connection, if the pool is under pressure.
    fn pick_eviction(&self) -> Option<PeerId> {
        let now = self.clock.now();
        let min_session = Duration::from_secs(self.config.min_session_secs).as_millis() as u64;
        let mut state = self.state.lock();

        let connected = state.entries.values().filter(|e| e.is_connected()).count();
        let waiting = state
            .entries
            .values()
            .any(|e| !e.trusted && !e.explored && Self::dialable(e, now));
        if connected < self.config.target_connections || !waiting {
            return None;
        }

        let mut victim: Option<(PeerId, f64)> = None;
        for (id, entry) in state.entries.iter_mut() {
            let EntryState::Connected { kind, since } = entry.state else {
                continue;
            };
            if entry.trusted || kind == SessionKind::Trusted {
                continue;
            }
            entry.reputation = self.tracker.long_term_score(id);
            if now.millis_since(since) < min_session {
                continue;
            }
            if entry.reputation >= self.config.eviction_threshold {
                continue;
            }
            if victim.map_or(true, |(_, rep)| entry.reputation < rep) {
                victim = Some((*id, entry.reputation));
            }
        }
        victim.map(|(id, _)| id)
    }

    fn persist(&self, entry: &PoolEntry) {
        let result = bincode::serialize(entry)
            .map_err(StorageError::from)
            .and_then(|bytes| self.store.put(&entry_key(&entry.address.id), &bytes));
        if let Err(e) = result {
            warn!(peer = %entry.address.id.short(), error = %e, "[qc-18] Failed to persist pool entry");
        }
    }

    fn persist_all(&self) {
        let entries: Vec<PoolEntry> = self.state.lock().entries.values().cloned().collect();
        for entry in &entries {
            self.persist(entry);
        }
        debug!(entries = entries.len(), "[qc-18] Server pool persisted");
    }

    fn session_started(&self, peer: &Arc<Peer>) {
        let now = self.clock.now();
        let id = peer.id();
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(id)
            .or_insert_with(|| PoolEntry::discovered(ServerAddress::new(id, ""), now));
        let kind = match entry.state {
            EntryState::Dialing(kind) => kind,
            _ if entry.trusted => SessionKind::Trusted,
            _ => SessionKind::External,
        };
        entry.state = EntryState::Connected { kind, since: now };
        entry.explored = true;
        entry.sessions += 1;
        entry.last_connected = Some(now);
        let entry = entry.clone();
        drop(state);
        debug!(peer = %id.short(), kind = ?kind, "[qc-18] Server session started");
        self.persist(&entry);
    }

    fn session_ended(&self, peer: &Arc<Peer>) {
        let id = peer.id();
        let reputation = self.tracker.long_term_score(&id);
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        entry.state = EntryState::Idle;
        entry.reputation = reputation;
        let entry = entry.clone();
        drop(state);
        debug!(peer = %id.short(), reputation, "[qc-18] Server session ended");
        self.persist(&entry);
    }
}

struct PoolSubscription {
    inner: Weak<PoolInner>,
}

impl PeerSubscriber for PoolSubscription {
    fn on_register(&self, peer: &Arc<Peer>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.session_started(peer);
        }
    }

    fn on_unregister(&self, peer: &Arc<Peer>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.session_ended(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKVStore;
    use crate::application::registry::PeerRegistry;
    use crate::application::value_tracker::ValueTrackerSubscription;
    use crate::config::ValueTrackerConfig;
    use crate::domain::{RequestKind, Timestamp, NEUTRAL_SCORE};
    use crate::test_utils::{ManualClock, MockDialer, MockDiscovery};

    struct Harness {
        registry: Arc<PeerRegistry>,
        tracker: Arc<ValueTracker>,
        store: Arc<InMemoryKVStore>,
        clock: Arc<ManualClock>,
        dialer: Arc<MockDialer>,
        topic: Topic,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryKVStore::new());
            let clock = Arc::new(ManualClock::new(1_000_000));
            let registry = Arc::new(PeerRegistry::new());
            let tracker = Arc::new(ValueTracker::new(
                ValueTrackerConfig::for_testing(),
                store.clone(),
                clock.clone(),
            ));
            registry.subscribe(Arc::new(ValueTrackerSubscription::new(tracker.clone())));
            Self {
                dialer: MockDialer::new(registry.clone()),
                registry,
                tracker,
                store,
                clock,
                topic: Topic::for_protocol(&[0; 32], 4),
            }
        }

        fn pool(&self, config: ServerPoolConfig, candidates: Vec<ServerAddress>) -> ServerPool {
            let pool = ServerPool::new(
                config,
                Box::new(MockDiscovery::new(candidates)),
                self.tracker.clone(),
                self.store.clone(),
                self.clock.clone(),
            )
            .unwrap();
            self.registry.subscribe(pool.subscription());
            pool
        }

        async fn maintain(&self, pool: &ServerPool) {
            pool.maintain(self.dialer.as_ref(), &self.topic).await;
        }
    }

    fn addr(byte: u8) -> ServerAddress {
        ServerAddress::new(PeerId::new([byte; 32]), format!("10.0.0.{byte}:30303"))
    }

    fn config() -> ServerPoolConfig {
        ServerPoolConfig {
            discovery_batch: 16,
            ..ServerPoolConfig::for_testing()
        }
    }

    #[tokio::test]
    async fn test_discovery_and_dial_to_target() {
        let h = Harness::new();
        let pool = h.pool(config(), (1..=6).map(addr).collect());

        h.maintain(&pool).await;
        assert_eq!(pool.known_count(), 6);
        // max_dialing bounds one pass
        assert_eq!(pool.connected().len(), 2);

        h.maintain(&pool).await;
        assert_eq!(pool.connected().len(), 3);
        assert_eq!(h.registry.len(), 3);

        h.maintain(&pool).await;
        assert_eq!(pool.connected().len(), 3);
    }

    #[tokio::test]
    async fn test_explore_slots_reserved() {
        let h = Harness::new();
        // Four well-known good servers from a previous run.
        for byte in 1..=4 {
            let mut entry = PoolEntry::discovered(addr(byte), Timestamp::from_millis(0));
            entry.explored = true;
            entry.reputation = 0.9;
            h.store
                .put(&entry_key(&entry.address.id), &bincode::serialize(&entry).unwrap())
                .unwrap();
        }
        let cfg = ServerPoolConfig {
            target_connections: 4,
            max_dialing: 8,
            explore_fraction: 0.5,
            ..config()
        };
        let pool = h.pool(cfg, (10..=13).map(addr).collect());

        h.maintain(&pool).await;
        let connected = pool.connected();
        let explore = connected.iter().filter(|(_, k)| *k == SessionKind::Explore).count();
        let exploit = connected.iter().filter(|(_, k)| *k == SessionKind::Exploit).count();
        assert_eq!((explore, exploit), (2, 2));
        for (id, kind) in connected {
            let known_good = id.as_bytes()[0] <= 4;
            assert_eq!(known_good, kind == SessionKind::Exploit);
        }
    }

    #[tokio::test]
    async fn test_dial_failure_backs_off() {
        let h = Harness::new();
        let bad = addr(1);
        h.dialer.refuse(bad.id);
        let pool = h.pool(config(), vec![bad.clone()]);

        h.maintain(&pool).await;
        let entry = pool.entry(&bad.id).unwrap();
        assert_eq!(entry.dial_failures, 1);
        assert_eq!(entry.state, EntryState::Idle);
        assert!(entry.next_dial_at > h.clock.now());

        h.maintain(&pool).await;
        assert_eq!(h.dialer.dial_count(&bad.id), 1);

        h.clock.advance(Duration::from_millis(150));
        h.maintain(&pool).await;
        assert_eq!(h.dialer.dial_count(&bad.id), 2);
        assert_eq!(pool.entry(&bad.id).unwrap().dial_failures, 2);

        h.dialer.accept(bad.id);
        h.clock.advance(Duration::from_secs(5));
        h.maintain(&pool).await;
        assert_eq!(pool.entry(&bad.id).unwrap().dial_failures, 0);
        assert!(pool.entry(&bad.id).unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_trusted_always_dialed_never_evicted() {
        let h = Harness::new();
        let trusted = addr(9);
        let cfg = ServerPoolConfig {
            target_connections: 1,
            explore_fraction: 0.0,
            trusted_servers: vec![trusted.to_string()],
            eviction_threshold: 1.0,
            ..config()
        };
        let pool = h.pool(cfg, vec![addr(1), addr(2)]);

        h.maintain(&pool).await;
        assert!(pool
            .connected()
            .contains(&(trusted.id, SessionKind::Trusted)));

        // Ruin the trusted server's score; it must still stay.
        let handle = h.registry.peer(&trusted.id).unwrap().value_handle().unwrap();
        h.tracker.update(handle, RequestKind::Code, 1_000.0, 0.0);
        h.maintain(&pool).await;
        assert!(h.dialer.dropped().is_empty());
        assert!(pool.entry(&trusted.id).unwrap().trusted);
    }

    #[tokio::test]
    async fn test_low_value_connection_evicted_under_pressure() {
        let h = Harness::new();
        let cfg = ServerPoolConfig {
            target_connections: 1,
            max_dialing: 1,
            explore_fraction: 0.0,
            ..config()
        };
        let pool = h.pool(cfg, vec![addr(1)]);
        h.maintain(&pool).await;
        assert_eq!(pool.connected().len(), 1);

        let handle = h.registry.peer(&addr(1).id).unwrap().value_handle().unwrap();
        for _ in 0..5 {
            h.tracker.update(handle, RequestKind::Receipts, 1_000.0, 0.0);
        }
        pool.add_candidate(addr(2));

        h.maintain(&pool).await;
        assert_eq!(h.dialer.dropped(), vec![addr(1).id]);
        let evicted = pool.entry(&addr(1).id).unwrap();
        assert!(evicted.reputation < NEUTRAL_SCORE);
        assert!(pool.connected().contains(&(addr(2).id, SessionKind::Exploit)));
    }

    #[tokio::test]
    async fn test_good_connection_not_evicted() {
        let h = Harness::new();
        let cfg = ServerPoolConfig {
            target_connections: 1,
            max_dialing: 1,
            explore_fraction: 0.0,
            ..config()
        };
        let pool = h.pool(cfg, vec![addr(1)]);
        h.maintain(&pool).await;
        pool.add_candidate(addr(2));
        h.maintain(&pool).await;
        assert!(h.dialer.dropped().is_empty());
    }

    #[tokio::test]
    async fn test_external_session_tracked() {
        let h = Harness::new();
        let pool = h.pool(config(), Vec::new());
        h.dialer.dial(&addr(5), &h.topic).await.unwrap();
        assert!(pool.connected().contains(&(addr(5).id, SessionKind::External)));
        assert!(pool.entry(&addr(5).id).unwrap().explored);
    }

    #[tokio::test]
    async fn test_stop_persists_and_reloads() {
        let h = Harness::new();
        let pool = h.pool(config(), vec![addr(1), addr(2)]);
        h.maintain(&pool).await;
        h.registry.unregister(&addr(1).id).unwrap();

        pool.stop().await;
        pool.stop().await;
        assert!(!pool.is_running());

        let reloaded = h.pool(config(), Vec::new());
        assert_eq!(reloaded.known_count(), 2);
        let entry = reloaded.entry(&addr(1).id).unwrap();
        assert!(entry.explored);
        assert_eq!(entry.sessions, 1);
        assert_eq!(entry.state, EntryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_dials() {
        let h = Harness::new();
        let pool = h.pool(config(), (1..=3).map(addr).collect());
        pool.start(h.dialer.clone(), h.topic.clone());
        pool.start(h.dialer.clone(), h.topic.clone());
        assert!(pool.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.connected().len(), 3);

        pool.stop().await;
        assert!(!pool.is_running());
        pool.start(h.dialer.clone(), h.topic.clone());
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_candidate_table_bounded() {
        let h = Harness::new();
        let cfg = ServerPoolConfig {
            max_known_candidates: 2,
            ..config()
        };
        let pool = h.pool(cfg, Vec::new());
        assert!(pool.add_candidate(addr(1)));
        assert!(pool.add_candidate(addr(2)));
        assert!(!pool.add_candidate(addr(3)));
        assert!(pool.add_candidate(addr(1)));
        assert_eq!(pool.known_count(), 2);
    }
}
