//! # Value Tracker
//!
//! Per peer and per request kind, exponentially decayed estimates of value
//! delivered per unit of cost, at several half-lives.
//!
//! ## Lifecycle
//!
//! - `register` activates a peer, reloading its persisted record if the
//!   peer was seen before
//! - `update` folds one completed request into the accumulators
//! - `unregister` flushes the record to the store and deactivates it
//! - `stop` flushes every active record
//!
//! Records older than the configured update interval are queued by `update`
//! and written by `write_back`, which callers run outside their own locks.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::algorithms::{DecayAccumulator, DecaySet};
use crate::application::registry::{Peer, PeerSubscriber};
use crate::config::ValueTrackerConfig;
use crate::domain::{OdrError, PeerId, PeerValueStats, RequestKind, StorageError, Timestamp};
use crate::ports::{Clock, KeyValueStore};

const KEY_PREFIX: &[u8] = b"vt:";

fn record_key(peer: &PeerId) -> Vec<u8> {
    let mut key = KEY_PREFIX.to_vec();
    key.extend_from_slice(peer.as_bytes());
    key
}

/// Registration handle for one active peer.
///
/// Updates through a handle from an earlier registration are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueTrackerHandle {
    peer: PeerId,
    generation: u64,
}

impl ValueTrackerHandle {
    /// Peer this handle belongs to.
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

/// Persisted statistics of one peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PeerValueRecord {
    kinds: BTreeMap<RequestKind, DecaySet>,
    /// Cost counts responses, value sums latency in milliseconds.
    latency: DecayAccumulator,
}

struct PeerValueEntry {
    generation: u64,
    record: PeerValueRecord,
    last_flush: Timestamp,
}

/// Statistical peer-value estimator.
pub struct ValueTracker {
    config: ValueTrackerConfig,
    half_lives: Vec<Duration>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<PeerId, Arc<Mutex<PeerValueEntry>>>>,
    due: Mutex<Vec<PeerId>>,
    next_generation: AtomicU64,
    stopped: AtomicBool,
}

impl ValueTracker {
    /// Create a tracker persisting to `store`.
    pub fn new(
        config: ValueTrackerConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let half_lives = config.half_lives();
        Self {
            config,
            half_lives,
            store,
            clock,
            entries: RwLock::new(HashMap::new()),
            due: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    fn fresh_record(&self, now: Timestamp) -> PeerValueRecord {
        PeerValueRecord {
            kinds: BTreeMap::new(),
            latency: DecayAccumulator::new(self.config.latency_half_life(), now),
        }
    }

    fn load_record(&self, peer: &PeerId) -> Result<Option<PeerValueRecord>, StorageError> {
        match self.store.get(&record_key(peer))? {
            Some(bytes) => {
                let mut record: PeerValueRecord = bincode::deserialize(&bytes)?;
                // Half-lives changed since the record was written.
                record.kinds.retain(|_, set| set.matches(&self.half_lives));
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn save_record(&self, peer: &PeerId, record: &PeerValueRecord) -> Result<(), StorageError> {
        let bytes = bincode::serialize(record)?;
        self.store.put(&record_key(peer), &bytes)
    }

    fn entry(&self, peer: &PeerId) -> Option<Arc<Mutex<PeerValueEntry>>> {
        self.entries.read().get(peer).cloned()
    }

    /// Activate a peer and return its handle.
    ///
    /// Registering an already active peer returns the existing handle.
    pub fn register(&self, peer: PeerId) -> ValueTrackerHandle {
        if let Some(entry) = self.entry(&peer) {
            let generation = entry.lock().generation;
            return ValueTrackerHandle { peer, generation };
        }

        let now = self.clock.now();
        let record = match self.load_record(&peer) {
            Ok(Some(record)) => {
                debug!(peer = %peer.short(), "[qc-18] Reloaded value record");
                record
            }
            Ok(None) => self.fresh_record(now),
            Err(e) => {
                warn!(peer = %peer.short(), error = %e, "[qc-18] Discarding unreadable value record");
                if let Err(e) = self.store.delete(&record_key(&peer)) {
                    warn!(peer = %peer.short(), error = %e, "[qc-18] Failed to delete value record");
                }
                self.fresh_record(now)
            }
        };

        let mut entries = self.entries.write();
        // Lost a race with a concurrent register of the same peer.
        if let Some(entry) = entries.get(&peer) {
            let generation = entry.lock().generation;
            return ValueTrackerHandle { peer, generation };
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            peer,
            Arc::new(Mutex::new(PeerValueEntry {
                generation,
                record,
                last_flush: now,
            })),
        );
        ValueTrackerHandle { peer, generation }
    }

    /// Give `peer` its tracker handle unless it already has one.
    pub fn attach(&self, peer: &Peer) -> ValueTrackerHandle {
        match peer.value_handle() {
            Some(handle) => handle,
            None => {
                let handle = self.register(peer.id());
                peer.set_value_handle(Some(handle));
                handle
            }
        }
    }

    /// Flush and deactivate a peer. Unknown peers are ignored.
    pub fn unregister(&self, peer: &PeerId) {
        let Some(entry) = self.entries.write().remove(peer) else {
            return;
        };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let entry = entry.lock();
        if let Err(e) = self.save_record(peer, &entry.record) {
            warn!(peer = %peer.short(), error = %e, "[qc-18] Failed to persist value record");
        }
    }

    fn with_active<F>(&self, handle: ValueTrackerHandle, f: F)
    where
        F: FnOnce(&mut PeerValueEntry, Timestamp),
    {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(entry) = self.entry(&handle.peer) else {
            return;
        };
        let now = self.clock.now();
        let mut entry = entry.lock();
        if entry.generation != handle.generation {
            debug!(peer = %handle.peer.short(), "[qc-18] Ignoring update from stale handle");
            return;
        }
        f(&mut *entry, now);

        if now.millis_since(entry.last_flush) >= self.config.update_interval().as_millis() as u64 {
            entry.last_flush = now;
            drop(entry);
            self.due.lock().push(handle.peer);
        }
    }

    /// Persist records queued by `update`. Returns how many were written.
    ///
    /// Store I/O happens here and nowhere on the update path.
    pub fn write_back(&self) -> usize {
        let due = std::mem::take(&mut *self.due.lock());
        if due.is_empty() || self.stopped.load(Ordering::Acquire) {
            return 0;
        }
        let mut written = 0;
        for peer in due {
            let Some(entry) = self.entry(&peer) else {
                continue;
            };
            let bytes = match bincode::serialize(&entry.lock().record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(peer = %peer.short(), error = %e, "[qc-18] Failed to encode value record");
                    continue;
                }
            };
            match self.store.put(&record_key(&peer), &bytes) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(peer = %peer.short(), error = %e, "[qc-18] Failed to persist value record")
                }
            }
        }
        written
    }

    /// Fold one completed request into the peer's accumulators.
    ///
    /// `value` is expected within `[0, cost]`.
    pub fn update(&self, handle: ValueTrackerHandle, kind: RequestKind, cost: f64, value: f64) {
        let half_lives = &self.half_lives;
        self.with_active(handle, |entry, now| {
            entry
                .record
                .kinds
                .entry(kind)
                .or_insert_with(|| DecaySet::new(half_lives, now))
                .add(now, cost, value.min(cost));
        });
    }

    /// Record how long a response took.
    pub fn record_response_time(&self, handle: ValueTrackerHandle, latency: Duration) {
        self.with_active(handle, |entry, now| {
            entry
                .record
                .latency
                .add(now, 1.0, latency.as_millis() as f64);
        });
    }

    fn kind_score(&self, set: &DecaySet, now: Timestamp) -> f64 {
        set.score(
            now,
            &self.config.weights,
            self.config.prior_score,
            self.config.prior_weight,
        )
    }

    /// Ranking score of an active peer for a request kind, in `[0, 1]`.
    ///
    /// Peers without history for the kind, or not registered, get the prior.
    pub fn score(&self, peer: &PeerId, kind: RequestKind) -> f64 {
        let Some(entry) = self.entry(peer) else {
            return self.config.prior_score;
        };
        let now = self.clock.now();
        let entry = entry.lock();
        match entry.record.kinds.get(&kind) {
            Some(set) => self.kind_score(set, now),
            None => self.config.prior_score,
        }
    }

    fn long_term_of(&self, record: &PeerValueRecord, now: Timestamp) -> f64 {
        let (mut value, mut cost) = (0.0, 0.0);
        for set in record.kinds.values() {
            if let Some(longest) = set.accumulators().last() {
                let (v, c) = longest.sums_at(now);
                value += v;
                cost += c;
            }
        }
        let prior = self.config.prior_score;
        let weight = self.config.prior_weight;
        ((value + prior * weight) / (cost + weight)).clamp(0.0, 1.0)
    }

    /// Value per cost at the longest horizon, across all kinds.
    ///
    /// Reads the persisted record for inactive peers; used by the server
    /// pool as reputation.
    pub fn long_term_score(&self, peer: &PeerId) -> f64 {
        let now = self.clock.now();
        if let Some(entry) = self.entry(peer) {
            return self.long_term_of(&entry.lock().record, now);
        }
        match self.load_record(peer) {
            Ok(Some(record)) => self.long_term_of(&record, now),
            Ok(None) => self.config.prior_score,
            Err(e) => {
                warn!(peer = %peer.short(), error = %e, "[qc-18] Unreadable value record");
                self.config.prior_score
            }
        }
    }

    /// Decayed mean response latency of an active peer.
    pub fn expected_latency(&self, peer: &PeerId) -> Option<Duration> {
        let entry = self.entry(peer)?;
        let mean = entry.lock().record.latency.mean()?;
        Some(Duration::from_millis(mean.round() as u64))
    }

    /// Whether `peer` is active.
    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.entries.read().contains_key(peer)
    }

    /// Statistics of every active peer, ordered by peer ID.
    pub fn snapshot(&self) -> Vec<PeerValueStats> {
        let now = self.clock.now();
        let entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect();

        let mut stats: Vec<_> = entries
            .into_iter()
            .map(|(peer, entry)| {
                let entry = entry.lock();
                PeerValueStats {
                    peer,
                    scores: entry
                        .record
                        .kinds
                        .iter()
                        .map(|(kind, set)| (*kind, self.kind_score(set, now)))
                        .collect(),
                    long_term: self.long_term_of(&entry.record, now),
                    expected_latency: entry
                        .record
                        .latency
                        .mean()
                        .map(|ms| Duration::from_millis(ms.round() as u64)),
                }
            })
            .collect();
        stats.sort_by_key(|s| s.peer);
        stats
    }

    /// Write every active record to the store.
    pub fn flush(&self) -> Result<(), OdrError> {
        let now = self.clock.now();
        let entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect();
        for (peer, entry) in entries {
            let mut entry = entry.lock();
            self.save_record(&peer, &entry.record)?;
            entry.last_flush = now;
        }
        Ok(())
    }

    /// Flush all state and stop accepting updates. Idempotent.
    pub fn stop(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(error = %e, "[qc-18] Value tracker flush on stop failed");
        }
        self.stopped.store(true, Ordering::Release);
        info!("[qc-18] Value tracker stopped");
    }
}

/// Registry subscriber attaching peers to the value tracker.
pub struct ValueTrackerSubscription {
    tracker: Arc<ValueTracker>,
}

impl ValueTrackerSubscription {
    /// Subscriber for `tracker`.
    pub fn new(tracker: Arc<ValueTracker>) -> Self {
        Self { tracker }
    }
}

impl PeerSubscriber for ValueTrackerSubscription {
    fn on_register(&self, peer: &Arc<Peer>) {
        self.tracker.attach(peer);
    }

    fn on_unregister(&self, peer: &Arc<Peer>) {
        self.tracker.unregister(&peer.id());
        peer.set_value_handle(None);
    }
}
