//! Wire protocol and socket plumbing shared by the relay broker and workers.
//!
//! This crate owns the things that must be byte-identical between a broker
//! and a worker built from different binaries: the protocol magic, the
//! command codes, and the frame encode/decode routines. It also centralizes
//! ZMQ socket construction so linger and reconnect behavior stay consistent.

pub mod error;
pub mod frame;
pub mod socket_config;
pub mod wire;

pub use error::FrameError;
pub use frame::{parse_peer_message, ClientMessage, PeerMessage, WorkerMessage};
pub use socket_config::{frames_to_multipart, multipart_to_frames};
pub use wire::{Command, C_CLIENT, W_WORKER};

/// Build the in-process control URI for a reactor instance, keyed by an
/// arbitrary unique id (an address, a counter, a UUID - anything stable for
/// the reactor's lifetime).
pub fn control_uri(kind: &str, id: &str) -> String {
    format!("inproc://relay-{kind}-{id}")
}
