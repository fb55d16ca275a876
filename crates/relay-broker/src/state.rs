//! Pure broker state machine: request/worker queues, heartbeats, dispatch.
//!
//! Deliberately free of any socket or async code so its invariants can be
//! driven directly with synthetic timestamps, no `tokio` runtime required.
//! `reactor::run` is the thin I/O shell around this that actually talks to
//! a ROUTER socket.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relay_proto::{ClientMessage, PeerMessage, WorkerMessage};

use crate::heartbeat::HeartbeatManager;
use crate::service::ServiceQueue;
use crate::worker::WorkerRecord;

/// A fully-framed message destined for a peer address, queued for the
/// reactor to actually hand to the router socket.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub addr: Bytes,
    pub frames: Vec<Bytes>,
}

pub struct BrokerState {
    heartbeat: HeartbeatManager,
    workers: HashMap<Bytes, WorkerRecord>,
    services: HashMap<Bytes, ServiceQueue>,
    request_timeout: Duration,
    outbox: Vec<OutboundMessage>,
}

impl BrokerState {
    pub fn new(heartbeat_interval: Duration, heartbeat_liveness: u32, request_timeout: Duration) -> Self {
        BrokerState {
            heartbeat: HeartbeatManager::new(heartbeat_interval, heartbeat_liveness),
            workers: HashMap::new(),
            services: HashMap::new(),
            request_timeout,
            outbox: Vec::new(),
        }
    }

    /// Handle one inbound message from the router socket. `sender_addr` is
    /// the transport-assigned identity frame, already peeled off by the
    /// reactor before the remaining frames reached [`relay_proto::parse_peer_message`].
    pub fn handle_message(&mut self, sender_addr: Bytes, message: PeerMessage, now: Instant) {
        match message {
            PeerMessage::Client(msg) => self.handle_client(sender_addr, msg, now),
            PeerMessage::Worker(msg) => self.handle_worker(sender_addr, msg, now),
        }
    }

    fn handle_client(&mut self, sender_addr: Bytes, msg: ClientMessage, now: Instant) {
        let service_name = msg.service.clone();
        let timeout = self.request_timeout;
        self.services
            .entry(service_name.clone())
            .or_insert_with(|| ServiceQueue::new(service_name.clone()))
            .queue_request(sender_addr, msg.body, timeout, now);
        self.dispatch_service(&service_name, now);
    }

    fn handle_worker(&mut self, sender_addr: Bytes, msg: WorkerMessage, now: Instant) {
        self.heartbeat.hear_from(sender_addr.clone(), now);
        match msg {
            WorkerMessage::Ready { service } => {
                self.register_worker(sender_addr.clone(), service, now);
                self.mark_ready(&sender_addr);
                if let Some(service_name) = self.workers.get(&sender_addr).and_then(|w| w.service.clone()) {
                    self.dispatch_service(&service_name, now);
                }
            }
            WorkerMessage::Reply { client_addr, body } => {
                self.handle_worker_reply(&sender_addr, client_addr, body, now);
            }
            WorkerMessage::Heartbeat => {
                // hear_from above already refreshed liveness; nothing else to do.
            }
            WorkerMessage::Disconnect => {
                self.delete_worker(&sender_addr, false, now);
            }
            WorkerMessage::Request { .. } => {
                tracing::warn!(?sender_addr, "worker sent REQUEST, which is broker-to-worker only; dropping");
            }
        }
    }

    fn handle_worker_reply(&mut self, sender_addr: &Bytes, client_addr: Bytes, body: Vec<Bytes>, now: Instant) {
        let service_name = match self.workers.get(sender_addr).and_then(|w| w.service.clone()) {
            Some(name) => name,
            None => {
                tracing::warn!(?sender_addr, "REPLY from worker with no bound service; dropping");
                return;
            }
        };
        let frames = ClientMessage::new(service_name.clone(), body).to_frames();
        self.outbox.push(OutboundMessage { addr: client_addr, frames });
        self.mark_ready(sender_addr);
        self.dispatch_service(&service_name, now);
    }

    /// Bind `addr` to `service_name`. A worker already bound to a different
    /// service is forcibly disconnected first.
    fn register_worker(&mut self, addr: Bytes, service_name: Bytes, now: Instant) {
        let already_bound = self.workers.get(&addr).and_then(|w| w.service.clone());
        if already_bound.is_some() {
            self.delete_worker(&addr, true, now);
        }
        let record = self
            .workers
            .entry(addr.clone())
            .or_insert_with(|| WorkerRecord::new(addr.clone()));
        record.service = Some(service_name.clone());
        self.services
            .entry(service_name.clone())
            .or_insert_with(|| ServiceQueue::new(service_name));
    }

    fn mark_ready(&mut self, addr: &Bytes) {
        if let Some(service_name) = self.workers.get(addr).and_then(|w| w.service.clone()) {
            if let Some(svc) = self.services.get_mut(&service_name) {
                svc.worker_ready(addr.clone());
            }
        }
    }

    /// Unbind a worker from its service, optionally telling it to
    /// disconnect first. The worker record itself is retained (it may
    /// re-register), only its service binding and heartbeat tracking are
    /// cleared.
    fn delete_worker(&mut self, addr: &Bytes, disconnect: bool, now: Instant) {
        if disconnect {
            self.send_to_worker(addr.clone(), WorkerMessage::Disconnect.to_frames(), now);
        }
        if let Some(service_name) = self.workers.get(addr).and_then(|w| w.service.clone()) {
            if let Some(svc) = self.services.get_mut(&service_name) {
                svc.unregister_worker(addr);
            }
        }
        self.heartbeat.discard_peer(addr);
    }

    fn dispatch_service(&mut self, service_name: &Bytes, now: Instant) {
        let dispatched = match self.services.get_mut(service_name) {
            Some(svc) => svc.dispatch(now),
            None => return,
        };
        for (worker_addr, request) in dispatched {
            let frames = WorkerMessage::Request {
                client_addr: request.client_addr,
                body: request.body,
            }
            .to_frames();
            self.send_to_worker(worker_addr, frames, now);
        }
    }

    /// Queue a frame for a worker and refresh its heartbeat send-timer -
    /// every outbound worker frame counts as a beat.
    fn send_to_worker(&mut self, addr: Bytes, frames: Vec<Bytes>, now: Instant) {
        self.heartbeat.send_to(&addr, now);
        self.outbox.push(OutboundMessage { addr, frames });
    }

    /// Run heartbeat and reap bookkeeping. Called every reactor tick,
    /// including idle poll-interval wakeups, so a worker that's gone
    /// quiet gets reaped promptly rather than only between requests.
    pub fn tick(&mut self, now: Instant) {
        let needing_beats = self.heartbeat.need_beats(now);
        for addr in needing_beats {
            self.send_to_worker(addr, WorkerMessage::Heartbeat.to_frames(), now);
        }
        let dead = self.heartbeat.reap(now);
        for addr in dead {
            self.delete_worker(&addr, false, now);
        }
    }

    /// Drain accumulated outbound messages for the reactor to send.
    pub fn drain_outbox(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn known_worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn service_names(&self) -> Vec<Bytes> {
        self.services.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_proto::parse_peer_message;

    fn addr(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn state() -> BrokerState {
        BrokerState::new(Duration::from_secs(1), 3, Duration::from_secs(5))
    }

    fn ready(service: &str) -> WorkerMessage {
        WorkerMessage::Ready { service: addr(service) }
    }

    #[test]
    fn request_waits_for_worker_then_dispatches() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![addr("hi")])), t0);
        assert!(s.drain_outbox().is_empty());

        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        let outbox = s.drain_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].addr, addr("worker-1"));
        let decoded = parse_peer_message(outbox[0].frames.clone()).unwrap();
        match decoded {
            PeerMessage::Worker(WorkerMessage::Request { client_addr, body }) => {
                assert_eq!(client_addr, addr("client-1"));
                assert_eq!(body, vec![addr("hi")]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn reply_routes_back_to_originating_client() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![addr("hi")])), t0);
        s.drain_outbox(); // the REQUEST to the worker

        s.handle_message(
            addr("worker-1"),
            PeerMessage::Worker(WorkerMessage::Reply {
                client_addr: addr("client-1"),
                body: vec![addr("hi-back")],
            }),
            t0,
        );
        let outbox = s.drain_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].addr, addr("client-1"));
        match parse_peer_message(outbox[0].frames.clone()).unwrap() {
            PeerMessage::Client(msg) => {
                assert_eq!(msg.service, addr("echo"));
                assert_eq!(msg.body, vec![addr("hi-back")]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn worker_becomes_ready_again_after_reply() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![])), t0);
        s.drain_outbox();
        s.handle_message(
            addr("worker-1"),
            PeerMessage::Worker(WorkerMessage::Reply {
                client_addr: addr("client-1"),
                body: vec![],
            }),
            t0,
        );
        s.drain_outbox();

        s.handle_message(addr("client-2"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![])), t0);
        let outbox = s.drain_outbox();
        assert_eq!(outbox.len(), 1, "worker should be dispatched to again after replying");
    }

    #[test]
    fn expired_request_never_reaches_a_worker() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![])), t0);

        let t1 = t0 + Duration::from_secs(10);
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t1);
        assert!(s.drain_outbox().is_empty(), "request should have expired before a worker arrived");
    }

    #[test]
    fn idle_tick_evicts_silent_worker() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        s.drain_outbox();
        assert_eq!(s.known_worker_count(), 1);

        let t1 = t0 + Duration::from_secs(4); // interval(1) * liveness(3) + margin
        s.tick(t1);
        // The tick still emits a catch-up heartbeat to the worker before reaping it.
        s.drain_outbox();
        // No traffic reached the worker after that: it's gone, so a new request just queues.
        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![])), t1);
        assert!(s.drain_outbox().is_empty(), "evicted worker must not receive further dispatch");
    }

    #[test]
    fn tick_emits_heartbeats_to_idle_workers() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        s.drain_outbox();

        let t1 = t0 + Duration::from_millis(1100);
        s.tick(t1);
        let outbox = s.drain_outbox();
        assert_eq!(outbox.len(), 1);
        match parse_peer_message(outbox[0].frames.clone()).unwrap() {
            PeerMessage::Worker(WorkerMessage::Heartbeat) => {}
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn reregistering_worker_rebinds_to_new_service() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("service-a")), t0);
        s.drain_outbox();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("service-b")), t0);
        s.drain_outbox();

        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("service-a"), vec![])), t0);
        assert!(s.drain_outbox().is_empty(), "worker no longer bound to service-a");

        s.handle_message(addr("client-2"), PeerMessage::Client(ClientMessage::new(addr("service-b"), vec![])), t0);
        assert_eq!(s.drain_outbox().len(), 1, "worker now bound to service-b");
    }

    #[test]
    fn disconnect_removes_worker_from_ready_queue() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(ready("echo")), t0);
        s.drain_outbox();
        s.handle_message(addr("worker-1"), PeerMessage::Worker(WorkerMessage::Disconnect), t0);
        s.drain_outbox();

        s.handle_message(addr("client-1"), PeerMessage::Client(ClientMessage::new(addr("echo"), vec![])), t0);
        assert!(s.drain_outbox().is_empty());
    }
}
