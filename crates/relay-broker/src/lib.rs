//! Service-queue message broker (C1-C4, C6) over ROUTER/DEALER ZMQ sockets.
//!
//! [`state::BrokerState`] is the pure, synchronously-testable state
//! machine; [`reactor::spawn`] wraps it in the socket-owning `tokio` task
//! that actually talks to peers.

pub mod heartbeat;
pub mod reactor;
pub mod service;
pub mod state;
pub mod worker;

pub use reactor::{spawn, BrokerReactor, StopHandle};
pub use state::BrokerState;
