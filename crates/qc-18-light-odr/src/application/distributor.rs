//! # Request Distributor
//!
//! Single arbitration point between pending requests and server peers.
//!
//! ## Request State Machine
//!
//! ```text
//! queued -> sent(peer) -> completed
//!               |-> timed out / failed / invalid -> queued (peer excluded)
//!               |-> peer unregistered            -> queued (peer excluded)
//! any    -> cancelled (cancel, close) | timeout (deadline) | exhausted
//! ```
//!
//! Selection, state transitions and slot accounting happen under one lock.
//! Sends and response validation run in per-attempt tasks off the lock; an
//! attempt reports back with its attempt number and is ignored if the
//! request has moved on in the meantime.
//!
//! Selection reads the registry through `PeerRegistry::with_peers`, so a
//! peer is never picked after its removal from the registry. Peers become
//! eligible once they carry a value tracker handle; the distributor attaches
//! one itself on register. Value tracker records are written back after the
//! lock is released.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::algorithms::{adaptive_timeout, response_quality, select_best, Candidate};
use crate::application::registry::{Peer, PeerRegistry, PeerSubscriber};
use crate::application::value_tracker::ValueTracker;
use crate::config::DistributorConfig;
use crate::domain::{invariant_peer_untried, OdrError, OdrRequest, PeerId, RequestKind};
use crate::ports::ResponseCheck;

/// Identifier assigned to a submitted request.
pub type RequestId = u64;

/// A request handed to the distributor.
pub struct DistributorRequest {
    /// What to ask for.
    pub request: OdrRequest,
    /// Acceptance check run on every response.
    pub check: ResponseCheck,
    /// Point in time after which the request fails with `Timeout`.
    pub deadline: Option<Instant>,
}

/// Successful completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Peer whose response was accepted.
    pub peer: PeerId,
    /// Number of peers tried.
    pub attempts: usize,
}

type Completion = Result<Delivery, OdrError>;

/// Caller side of a submitted request.
#[derive(Debug)]
pub struct RequestTicket {
    id: RequestId,
    rx: oneshot::Receiver<Completion>,
}

impl RequestTicket {
    /// Request ID, usable with `cancel`.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Completion {
        self.rx.await.unwrap_or(Err(OdrError::Cancelled))
    }
}

enum Phase {
    Queued,
    Sent {
        peer: Arc<Peer>,
        attempt: u64,
        /// Dropping the sender aborts the attempt task.
        _abort: oneshot::Sender<()>,
    },
}

struct PendingRequest {
    request: OdrRequest,
    kind: RequestKind,
    check: ResponseCheck,
    tried: Vec<PeerId>,
    deadline: Option<Instant>,
    phase: Phase,
    done: oneshot::Sender<Completion>,
}

impl PendingRequest {
    /// Leave the sent phase, releasing the peer's slot exactly once.
    fn requeue(&mut self) -> Option<Arc<Peer>> {
        match std::mem::replace(&mut self.phase, Phase::Queued) {
            Phase::Sent { peer, .. } => {
                peer.release_slot();
                Some(peer)
            }
            Phase::Queued => None,
        }
    }

    fn finish(mut self, outcome: Completion) {
        self.requeue();
        let _ = self.done.send(outcome);
    }
}

#[derive(Default)]
struct DispatchState {
    requests: BTreeMap<RequestId, PendingRequest>,
    next_id: RequestId,
    next_attempt: u64,
    closed: bool,
}

impl DispatchState {
    fn next_deadline(&self) -> Option<Instant> {
        self.requests.values().filter_map(|r| r.deadline).min()
    }
}

enum AttemptOutcome {
    Valid,
    Invalid(String),
    Failed(String),
    TimedOut,
}

struct Inner {
    config: DistributorConfig,
    registry: Arc<PeerRegistry>,
    tracker: Arc<ValueTracker>,
    state: Mutex<DispatchState>,
    wake: Notify,
}

/// Request distributor with its dispatch task.
pub struct RequestDistributor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RequestDistributor {
    /// Create the distributor and spawn its dispatch task.
    ///
    /// Must be called from within a Tokio runtime. Attach it to the
    /// registry with `subscription()` so disconnects fail over.
    pub fn new(
        config: DistributorConfig,
        registry: Arc<PeerRegistry>,
        tracker: Arc<ValueTracker>,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            registry,
            tracker,
            state: Mutex::new(DispatchState::default()),
            wake: Notify::new(),
        });
        let task = tokio::spawn(Arc::clone(&inner).run());
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// Registry subscriber handling connects and disconnects.
    ///
    /// On connect it attaches the value tracker before waking the dispatch
    /// task; pair it with a `ValueTrackerSubscription` to detach on
    /// disconnect.
    pub fn subscription(&self) -> Arc<dyn PeerSubscriber> {
        Arc::new(DistributorSubscription {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Queue a request. After `close` the ticket resolves to `Cancelled`.
    pub fn submit(&self, req: DistributorRequest) -> RequestTicket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if state.closed {
            let _ = tx.send(Err(OdrError::Cancelled));
            return RequestTicket { id, rx };
        }

        let kind = req.request.kind();
        debug!(request_id = id, %kind, "[qc-18] Request queued");
        state.requests.insert(
            id,
            PendingRequest {
                request: req.request,
                kind,
                check: req.check,
                tried: Vec::new(),
                deadline: req.deadline,
                phase: Phase::Queued,
                done: tx,
            },
        );
        self.inner.dispatch(&mut state);
        drop(state);
        self.inner.wake.notify_one();
        RequestTicket { id, rx }
    }

    /// Cancel one request. Returns false if it already completed.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut state = self.inner.state.lock();
        match state.requests.remove(&id) {
            Some(req) => {
                debug!(request_id = id, "[qc-18] Request cancelled");
                req.finish(Err(OdrError::Cancelled));
                drop(state);
                self.inner.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request and stop the dispatch task. Idempotent.
    pub fn close(&self) {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.requests)
        };
        let count = pending.len();
        for (_, req) in pending {
            req.finish(Err(OdrError::Cancelled));
        }
        self.inner.wake.notify_one();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        info!(cancelled = count, "[qc-18] Request distributor closed");
    }

    /// Retry queued requests, e.g. after a peer announced a new head.
    pub fn redispatch(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        self.inner.dispatch(&mut state);
        drop(state);
        self.inner.wake.notify_one();
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Requests not yet completed.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().requests.len()
    }

    /// Peers already tried for a pending request.
    pub fn tried_peers(&self, id: RequestId) -> Option<Vec<PeerId>> {
        self.inner
            .state
            .lock()
            .requests
            .get(&id)
            .map(|r| r.tried.clone())
    }
}

impl Drop for RequestDistributor {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        loop {
            let next_deadline = {
                let mut state = self.state.lock();
                if state.closed {
                    break;
                }
                self.expire(&mut state, Instant::now());
                self.dispatch(&mut state);
                state.next_deadline()
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
        debug!("[qc-18] Dispatch loop stopped");
    }

    fn expire(&self, state: &mut DispatchState, now: Instant) {
        let expired: Vec<RequestId> = state
            .requests
            .iter()
            .filter(|(_, r)| r.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(req) = state.requests.remove(&id) {
                debug!(request_id = id, attempts = req.tried.len(), "[qc-18] Request deadline passed");
                req.finish(Err(OdrError::Timeout));
            }
        }
    }

    /// Assign every queued request that has an eligible peer; fail the ones
    /// that have run out of peers.
    fn dispatch(self: &Arc<Self>, state: &mut DispatchState) {
        if state.closed {
            return;
        }
        let queued: Vec<RequestId> = state
            .requests
            .iter()
            .filter(|(_, r)| matches!(r.phase, Phase::Queued))
            .map(|(id, _)| *id)
            .collect();
        if queued.is_empty() {
            return;
        }
        self.registry
            .with_peers(|peers| self.assign(state, queued, peers));
    }

    fn assign(
        self: &Arc<Self>,
        state: &mut DispatchState,
        queued: Vec<RequestId>,
        peers: &[(u64, Arc<Peer>)],
    ) {
        for id in queued {
            let Some(req) = state.requests.get(&id) else {
                continue;
            };

            let best = select_best(
                peers
                    .iter()
                    .filter(|(_, p)| p.value_handle().is_some())
                    .filter(|(_, p)| invariant_peer_untried(&req.tried, &p.id()))
                    .filter(|(_, p)| p.can_serve(&req.request))
                    .filter(|(_, p)| p.outstanding() < p.load_cap(self.config.max_in_flight_per_peer))
                    .map(|(seq, p)| Candidate {
                        id: p.id(),
                        score: self.tracker.score(&p.id(), req.kind),
                        outstanding: p.outstanding(),
                        order: *seq,
                    }),
            );

            match best {
                Some(candidate) => {
                    let Some(peer) = peers
                        .iter()
                        .find(|(_, p)| p.id() == candidate.id)
                        .map(|(_, p)| Arc::clone(p))
                    else {
                        continue;
                    };
                    let attempt = state.next_attempt;
                    state.next_attempt += 1;
                    if let Some(req) = state.requests.get_mut(&id) {
                        self.send(id, attempt, req, peer);
                    }
                }
                None => {
                    let exhausted = !req.tried.is_empty()
                        && peers
                            .iter()
                            .filter(|(_, p)| p.can_serve(&req.request))
                            .all(|(_, p)| req.tried.contains(&p.id()));
                    if exhausted {
                        if let Some(req) = state.requests.remove(&id) {
                            let attempts = req.tried.len();
                            info!(request_id = id, attempts, "[qc-18] Request exhausted");
                            req.finish(Err(OdrError::Exhausted { attempts }));
                        }
                    }
                }
            }
        }
    }

    fn send(self: &Arc<Self>, id: RequestId, attempt: u64, req: &mut PendingRequest, peer: Arc<Peer>) {
        let timeout = adaptive_timeout(
            self.tracker.expected_latency(&peer.id()),
            self.config.default_timeout(),
            self.config.min_timeout(),
            self.config.timeout_latency_factor,
        );
        let (abort_tx, abort_rx) = oneshot::channel();

        peer.acquire_slot();
        req.tried.push(peer.id());
        req.phase = Phase::Sent {
            peer: Arc::clone(&peer),
            attempt,
            _abort: abort_tx,
        };
        debug!(
            request_id = id,
            attempt = req.tried.len(),
            peer = %peer.id().short(),
            kind = %req.kind,
            timeout_ms = timeout.as_millis() as u64,
            "[qc-18] Request sent"
        );

        let inner = Arc::clone(self);
        let request = req.request.clone();
        let check = Arc::clone(&req.check);
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = abort_rx => return,
                res = tokio::time::timeout(timeout, peer.connection().send(&request)) => match res {
                    Err(_) => AttemptOutcome::TimedOut,
                    Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
                    Ok(Ok(raw)) => match check(&raw) {
                        Ok(()) => AttemptOutcome::Valid,
                        Err(e) => AttemptOutcome::Invalid(e.reason),
                    },
                },
            };
            inner.finish_attempt(id, attempt, started.elapsed(), outcome);
        });
    }

    fn finish_attempt(
        self: &Arc<Self>,
        id: RequestId,
        attempt: u64,
        elapsed: Duration,
        outcome: AttemptOutcome,
    ) {
        self.settle(id, attempt, elapsed, outcome);
        self.tracker.write_back();
    }

    fn settle(
        self: &Arc<Self>,
        id: RequestId,
        attempt: u64,
        elapsed: Duration,
        outcome: AttemptOutcome,
    ) {
        let mut state = self.state.lock();
        let current = match state.requests.get(&id).map(|r| &r.phase) {
            Some(Phase::Sent { attempt: a, .. }) => *a == attempt,
            _ => false,
        };
        if !current {
            return;
        }

        if let AttemptOutcome::Valid = outcome {
            if let Some(req) = state.requests.remove(&id) {
                let peer = match &req.phase {
                    Phase::Sent { peer, .. } => Arc::clone(peer),
                    Phase::Queued => return,
                };
                let cost = peer.cost_of(&req.request) as f64;
                if let Some(handle) = peer.value_handle() {
                    let quality = response_quality(elapsed, self.config.reference_latency());
                    self.tracker.update(handle, req.kind, cost, cost * quality);
                    self.tracker.record_response_time(handle, elapsed);
                }
                let delivery = Delivery {
                    peer: peer.id(),
                    attempts: req.tried.len(),
                };
                debug!(request_id = id, peer = %peer.id().short(), attempts = delivery.attempts, "[qc-18] Request completed");
                req.finish(Ok(delivery));
            }
            self.dispatch(&mut state);
            return;
        }

        let Some(req) = state.requests.get_mut(&id) else {
            return;
        };
        let Some(peer) = req.requeue() else {
            return;
        };
        let cost = peer.cost_of(&req.request) as f64;
        let handle = peer.value_handle();
        match outcome {
            AttemptOutcome::TimedOut => {
                warn!(request_id = id, peer = %peer.id().short(), "[qc-18] Request timed out at peer");
                if let Some(handle) = handle {
                    self.tracker.update(handle, req.kind, cost, 0.0);
                    self.tracker.record_response_time(handle, elapsed);
                }
            }
            AttemptOutcome::Failed(reason) => {
                warn!(request_id = id, peer = %peer.id().short(), %reason, "[qc-18] Send failed");
                if let Some(handle) = handle {
                    self.tracker.update(handle, req.kind, cost, 0.0);
                }
            }
            AttemptOutcome::Invalid(reason) => {
                warn!(request_id = id, peer = %peer.id().short(), %reason, "[qc-18] Invalid response, penalizing peer");
                if let Some(handle) = handle {
                    let penalty = cost * self.config.invalid_response_penalty;
                    self.tracker.update(handle, req.kind, penalty, 0.0);
                }
            }
            AttemptOutcome::Valid => {}
        }
        self.dispatch(&mut state);
    }

    /// Fail over every request in flight to `peer`.
    fn peer_gone(self: &Arc<Self>, peer: &Arc<Peer>) {
        self.fail_over(peer);
        self.tracker.write_back();
    }

    fn fail_over(self: &Arc<Self>, peer: &Arc<Peer>) {
        let mut state = self.state.lock();
        let id = peer.id();
        let mut moved = 0;
        for req in state.requests.values_mut() {
            let addressed = matches!(&req.phase, Phase::Sent { peer: p, .. } if p.id() == id);
            if !addressed {
                continue;
            }
            req.requeue();
            moved += 1;
            if let Some(handle) = peer.value_handle() {
                let cost = peer.cost_of(&req.request) as f64;
                self.tracker.update(handle, req.kind, cost, 0.0);
            }
        }
        if moved > 0 {
            info!(peer = %id.short(), requests = moved, "[qc-18] Failing over requests of disconnected peer");
        }
        self.dispatch(&mut state);
    }
}

struct DistributorSubscription {
    inner: Weak<Inner>,
}

impl PeerSubscriber for DistributorSubscription {
    fn on_register(&self, peer: &Arc<Peer>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.tracker.attach(peer);
            inner.wake.notify_one();
        }
    }

    fn on_unregister(&self, peer: &Arc<Peer>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.peer_gone(peer);
        }
    }
}
