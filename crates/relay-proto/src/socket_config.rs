//! Centralized ZMQ socket configuration for relay peers.
//!
//! All socket setup goes through these helpers so the broker, workers, and
//! control channels share the same linger/reconnect behavior.
//!
//! tmq doesn't export socket types directly, so callers should use generics
//! with trait bounds for stored sockets:
//!
//! ```ignore
//! use futures::{Sink, Stream};
//! use tmq::{Multipart, TmqError};
//!
//! struct MyReactor<S> {
//!     socket: S,
//! }
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{Sink, Stream};
use tmq::{dealer, pull, push, router, TmqError};

pub use tmq::Context as ZmqContext;
pub use tmq::Multipart;

/// Convert our frame representation into tmq's wire `Multipart`.
pub fn frames_to_multipart(frames: &[Bytes]) -> Multipart {
    frames
        .iter()
        .map(|f| f.to_vec())
        .collect::<Vec<_>>()
        .into()
}

/// Convert a received `Multipart` into our frame representation.
pub fn multipart_to_frames(multipart: Multipart) -> Vec<Bytes> {
    multipart.into_iter().map(|msg| Bytes::from(msg.to_vec())).collect()
}

/// Default reconnect interval in milliseconds.
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;

/// Maximum reconnect interval in milliseconds, capping exponential backoff.
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

/// Trait bound for DEALER sockets (send and receive).
pub trait DealerSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> DealerSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Trait bound for ROUTER sockets (send and receive with identities).
pub trait RouterSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> RouterSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Trait bound for PULL sockets (receive only), used for control channels.
pub trait PullSocket: Stream<Item = Result<Multipart, TmqError>> + Unpin + Send {}
impl<T> PullSocket for T where T: Stream<Item = Result<Multipart, TmqError>> + Unpin + Send {}

/// Trait bound for PUSH sockets (send only), used for control channels.
pub trait PushSocket: Sink<Multipart, Error = TmqError> + Unpin + Send {}
impl<T> PushSocket for T where T: Sink<Multipart, Error = TmqError> + Unpin + Send {}

/// Create a configured DEALER socket and connect to an endpoint.
pub fn create_dealer_and_connect(ctx: &ZmqContext, endpoint: &str) -> Result<impl DealerSocket> {
    dealer(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .connect(endpoint)
        .with_context(|| format!("failed to connect DEALER to {endpoint}"))
}

/// Create a configured ROUTER socket and bind to an endpoint.
pub fn create_router_and_bind(ctx: &ZmqContext, endpoint: &str) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .bind(endpoint)
        .with_context(|| format!("failed to bind ROUTER to {endpoint}"))
}

/// Create the PULL side of an in-process control channel, bound at `uri`.
pub fn create_control_pull(ctx: &ZmqContext, uri: &str) -> Result<impl PullSocket> {
    pull(ctx)
        .set_linger(0)
        .bind(uri)
        .with_context(|| format!("failed to bind control PULL to {uri}"))
}

/// Create the PUSH side of an in-process control channel, connected to `uri`.
pub fn create_control_push(ctx: &ZmqContext, uri: &str) -> Result<impl PushSocket> {
    push(ctx)
        .set_linger(0)
        .connect(uri)
        .with_context(|| format!("failed to connect control PUSH to {uri}"))
}
