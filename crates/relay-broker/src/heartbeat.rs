//! Per-peer liveness tracking (C1).
//!
//! Pure bookkeeping: it knows nothing about sockets or services, only which
//! addresses have been heard from, which have been sent to, and which have
//! gone quiet long enough to be considered dead. Policy (what to send, what
//! to do with a dead peer) belongs to the broker state machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

struct PeerState {
    last_heard: Instant,
    last_sent: Instant,
}

/// Tracks liveness of every peer address the broker has registered.
pub struct HeartbeatManager {
    interval: Duration,
    liveness: u32,
    peers: HashMap<Bytes, PeerState>,
}

impl HeartbeatManager {
    pub fn new(interval: Duration, liveness: u32) -> Self {
        HeartbeatManager {
            interval,
            liveness,
            peers: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record traffic received from `addr`. Resets its liveness countdown.
    /// New peers are seeded with `last_sent = now` so they get their first
    /// heartbeat a full interval out, rather than immediately.
    pub fn hear_from(&mut self, addr: Bytes, now: Instant) {
        self.peers
            .entry(addr)
            .and_modify(|p| p.last_heard = now)
            .or_insert(PeerState {
                last_heard: now,
                last_sent: now,
            });
    }

    /// Record that a frame was sent to `addr`, deferring its next heartbeat.
    pub fn send_to(&mut self, addr: &Bytes, now: Instant) {
        if let Some(peer) = self.peers.get_mut(addr) {
            peer.last_sent = now;
        }
    }

    /// Every address that hasn't been sent anything for a full interval.
    pub fn need_beats(&self, now: Instant) -> Vec<Bytes> {
        self.peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_sent) >= self.interval)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Every address that hasn't been heard from for `interval * liveness`,
    /// removing them from the manager as they're returned.
    pub fn reap(&mut self, now: Instant) -> Vec<Bytes> {
        let threshold = self.interval * self.liveness;
        let dead: Vec<Bytes> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_heard) >= threshold)
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in &dead {
            self.peers.remove(addr);
        }
        dead
    }

    /// Forget an address entirely, e.g. after an explicit disconnect.
    pub fn discard_peer(&mut self, addr: &Bytes) {
        self.peers.remove(addr);
    }
}
