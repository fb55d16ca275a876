//! Per-service request/worker queue and dispatch pairing (C3).

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// A queued client request awaiting a worker.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub client_addr: Bytes,
    pub body: Vec<Bytes>,
    pub expires_at: Instant,
}

/// FIFO requests paired against LIFO ready workers for a single service
/// name. Workers that have gone ready but are never dispatched to stay in
/// `ready_workers` until picked or until they're forgotten via
/// `unregister_worker` (heartbeat eviction, disconnect, re-registration
/// elsewhere).
pub struct ServiceQueue {
    pub name: Bytes,
    requests: VecDeque<PendingRequest>,
    ready_workers: VecDeque<Bytes>,
    known_workers: HashSet<Bytes>,
}

impl ServiceQueue {
    pub fn new(name: Bytes) -> Self {
        ServiceQueue {
            name,
            requests: VecDeque::new(),
            ready_workers: VecDeque::new(),
            known_workers: HashSet::new(),
        }
    }

    pub fn queue_request(&mut self, client_addr: Bytes, body: Vec<Bytes>, timeout: Duration, now: Instant) {
        self.requests.push_back(PendingRequest {
            client_addr,
            body,
            expires_at: now + timeout,
        });
    }

    /// Mark `addr` as a known, ready worker for this service. Idempotent
    /// with respect to `known_workers`; pushing the same address ready
    /// twice puts it at the front of the LIFO queue twice, which is
    /// harmless since `pop_ready_worker` skips addresses no longer in
    /// `known_workers` and duplicate live entries just get deduped as they
    /// are dispatched.
    pub fn worker_ready(&mut self, addr: Bytes) {
        self.known_workers.insert(addr.clone());
        self.ready_workers.push_front(addr);
    }

    /// Forget a worker address entirely: it stops being eligible for
    /// dispatch even if it lingers in the ready queue.
    pub fn unregister_worker(&mut self, addr: &Bytes) {
        self.known_workers.remove(addr);
    }

    pub fn known_worker_count(&self) -> usize {
        self.known_workers.len()
    }

    fn pop_ready_worker(&mut self) -> Option<Bytes> {
        while let Some(addr) = self.ready_workers.pop_front() {
            if self.known_workers.contains(&addr) {
                return Some(addr);
            }
        }
        None
    }

    /// Pair as many requests with ready workers as possible. Expired
    /// requests are dropped silently. Returns `(worker_addr, request)`
    /// pairs in dispatch order; the caller is responsible for actually
    /// sending them and for noting that the paired worker is now busy (it
    /// has already been removed from `ready_workers`).
    pub fn dispatch(&mut self, now: Instant) -> Vec<(Bytes, PendingRequest)> {
        let mut dispatched = Vec::new();
        while !self.requests.is_empty() && !self.ready_workers.is_empty() {
            let request = self.requests.pop_front().expect("checked non-empty");
            if request.expires_at <= now {
                continue;
            }
            match self.pop_ready_worker() {
                Some(worker_addr) => dispatched.push((worker_addr, request)),
                None => {
                    self.requests.push_front(request);
                    break;
                }
            }
        }
        dispatched
    }
}
