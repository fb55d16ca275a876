//! Per-worker registration state (C2).
//!
//! A record is pure data: address and bound service. Operations like
//! register/ready/delete need access to the broker's service table and
//! heartbeat manager, so they live as
//! [`BrokerState`](crate::state::BrokerState) methods instead of being hung
//! off this struct - there's no back-reference from worker to owner to keep
//! in sync.

use bytes::Bytes;

/// A worker known to the broker: its transport address and, if any, the
/// service it is currently bound to.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub addr: Bytes,
    pub service: Option<Bytes>,
}

impl WorkerRecord {
    pub fn new(addr: Bytes) -> Self {
        WorkerRecord { addr, service: None }
    }
}
