//! # Peer Registry
//!
//! Tracks connected server peers and notifies subscribers on connect and
//! disconnect.
//!
//! Subscribers are called synchronously, in subscription order, with the
//! peer map unlocked. Notifications are serialized: a subscriber never
//! sees the unregister of a peer before its register. Subscribers must not
//! call back into `register`/`unregister`.
//!
//! `with_peers` holds the peer map for the duration of its closure, so a
//! peer seen there cannot be removed until the closure returns.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::value_tracker::ValueTrackerHandle;
use crate::domain::{Hash, OdrError, OdrRequest, PeerCapabilities, PeerId};
use crate::ports::PeerConnection;

/// A connected server peer.
pub struct Peer {
    id: PeerId,
    capabilities: RwLock<PeerCapabilities>,
    connection: Arc<dyn PeerConnection>,
    outstanding: AtomicUsize,
    value_handle: RwLock<Option<ValueTrackerHandle>>,
}

impl Peer {
    /// Peer that completed its handshake with these capabilities.
    pub fn new(
        id: PeerId,
        capabilities: PeerCapabilities,
        connection: Arc<dyn PeerConnection>,
    ) -> Self {
        Self {
            id,
            capabilities: RwLock::new(capabilities),
            connection,
            outstanding: AtomicUsize::new(0),
            value_handle: RwLock::new(None),
        }
    }

    /// Peer ID.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Snapshot of the advertised capabilities.
    pub fn capabilities(&self) -> PeerCapabilities {
        self.capabilities.read().clone()
    }

    /// Record a new head announcement.
    pub fn update_head(&self, number: u64, hash: Hash) {
        let mut caps = self.capabilities.write();
        caps.head_number = number;
        caps.head_hash = hash;
    }

    /// Whether this peer can answer `request`.
    pub fn can_serve(&self, request: &OdrRequest) -> bool {
        self.capabilities.read().can_serve(request)
    }

    /// Advertised cost of `request`.
    pub fn cost_of(&self, request: &OdrRequest) -> u64 {
        self.capabilities.read().cost_table.cost_of(request)
    }

    /// In-flight request cap: the configured cap, or the server's own if lower.
    pub fn load_cap(&self, configured: usize) -> usize {
        match self.capabilities.read().max_in_flight {
            Some(limit) => configured.min(limit),
            None => configured,
        }
    }

    /// Send primitive of the session.
    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    /// Requests currently in flight to this peer.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_slot(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_slot(&self) {
        // Never wraps below zero.
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Value tracker registration, set while the peer is registered.
    pub fn value_handle(&self) -> Option<ValueTrackerHandle> {
        *self.value_handle.read()
    }

    pub(crate) fn set_value_handle(&self, handle: Option<ValueTrackerHandle>) {
        *self.value_handle.write() = handle;
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Receives registry connect/disconnect notifications.
pub trait PeerSubscriber: Send + Sync {
    /// Called after `peer` was added.
    fn on_register(&self, peer: &Arc<Peer>);

    /// Called after `peer` was removed, before `unregister` returns.
    fn on_unregister(&self, peer: &Arc<Peer>);
}

#[derive(Default)]
struct RegistryState {
    peers: HashMap<PeerId, (Arc<Peer>, u64)>,
    next_seq: u64,
    closed: bool,
}

/// Set of connected server peers.
#[derive(Default)]
pub struct PeerRegistry {
    state: RwLock<RegistryState>,
    subscribers: RwLock<Vec<Arc<dyn PeerSubscriber>>>,
    notify_lock: Mutex<()>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer and notify subscribers.
    pub fn register(&self, peer: Arc<Peer>) -> Result<(), OdrError> {
        let _serial = self.notify_lock.lock();
        {
            let mut state = self.state.write();
            if state.closed {
                return Err(OdrError::Closed);
            }
            if state.peers.contains_key(&peer.id()) {
                return Err(OdrError::DuplicatePeer(peer.id()));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.peers.insert(peer.id(), (Arc::clone(&peer), seq));
        }

        info!(peer = %peer.id().short(), "[qc-18] Peer registered");
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.on_register(&peer);
        }
        Ok(())
    }

    /// Remove a peer and run subscriber cleanup before returning.
    ///
    /// Unknown IDs yield `NotFound`, which callers may ignore.
    pub fn unregister(&self, id: &PeerId) -> Result<Arc<Peer>, OdrError> {
        let _serial = self.notify_lock.lock();
        let peer = match self.state.write().peers.remove(id) {
            Some((peer, _)) => peer,
            None => {
                debug!(peer = %id.short(), "[qc-18] Unregister of unknown peer");
                return Err(OdrError::NotFound(*id));
            }
        };

        info!(peer = %id.short(), "[qc-18] Peer unregistered");
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.on_unregister(&peer);
        }
        Ok(peer)
    }

    /// Look up a peer.
    pub fn peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.state.read().peers.get(id).map(|(p, _)| Arc::clone(p))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.state.read().peers.contains_key(id)
    }

    /// Visit every peer in registration order.
    pub fn for_each<F: FnMut(&Arc<Peer>)>(&self, mut f: F) {
        for (_, peer) in self.peers_in_order() {
            f(&peer);
        }
    }

    /// All peers in registration order.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers_in_order().into_iter().map(|(_, p)| p).collect()
    }

    /// Peers paired with their registration sequence number, oldest first.
    fn peers_in_order(&self) -> Vec<(u64, Arc<Peer>)> {
        ordered(&self.state.read())
    }

    /// Run `f` over the peers in registration order while holding the map.
    ///
    /// `register` and `unregister` block until `f` returns. `f` must not
    /// call back into the registry.
    pub(crate) fn with_peers<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[(u64, Arc<Peer>)]) -> R,
    {
        let state = self.state.read();
        f(&ordered(&state))
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.state.read().peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a subscriber; it is immediately told about existing peers.
    pub fn subscribe(&self, subscriber: Arc<dyn PeerSubscriber>) {
        let _serial = self.notify_lock.lock();
        self.subscribers.write().push(Arc::clone(&subscriber));
        for (_, peer) in self.peers_in_order() {
            subscriber.on_register(&peer);
        }
    }

    /// Refuse further registrations.
    ///
    /// Registered peers stay until their sessions unregister them.
    pub fn close(&self) {
        let mut state = self.state.write();
        if !state.closed {
            state.closed = true;
            info!(peers = state.peers.len(), "[qc-18] Peer registry closed");
        }
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

fn ordered(state: &RegistryState) -> Vec<(u64, Arc<Peer>)> {
    let mut peers: Vec<_> = state
        .peers
        .values()
        .map(|(p, seq)| (*seq, Arc::clone(p)))
        .collect();
    peers.sort_by_key(|(seq, _)| *seq);
    peers
}
