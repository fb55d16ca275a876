//! Protocol tags and command codes for the relay wire format.
//!
//! Two magic strings distinguish client traffic from worker traffic on the
//! same ROUTER socket; a small command byte string follows the magic on
//! worker frames. Values are frozen - changing them breaks compatibility
//! with any peer built against this crate.

use bytes::Bytes;

/// Client-side protocol magic (`[EMPTY, C_CLIENT, service, ...]`).
pub const C_CLIENT: &[u8] = b"MDPC01";

/// Worker-side protocol magic (`[EMPTY, W_WORKER, command, ...]`).
pub const W_WORKER: &[u8] = b"MDPW01";

/// Worker command codes, carried as the third frame of a worker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ready,
    Request,
    Reply,
    Heartbeat,
    Disconnect,
}

impl Command {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Command::Ready => b"\x01",
            Command::Request => b"\x02",
            Command::Reply => b"\x03",
            Command::Heartbeat => b"\x04",
            Command::Disconnect => b"\x05",
        }
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"\x01" => Some(Command::Ready),
            b"\x02" => Some(Command::Request),
            b"\x03" => Some(Command::Reply),
            b"\x04" => Some(Command::Heartbeat),
            b"\x05" => Some(Command::Disconnect),
            _ => None,
        }
    }
}

/// The mandatory empty separator frame that follows the sender address on
/// every message the broker receives.
pub fn empty_frame() -> Bytes {
    Bytes::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_roundtrip() {
        for cmd in [
            Command::Ready,
            Command::Request,
            Command::Reply,
            Command::Heartbeat,
            Command::Disconnect,
        ] {
            let bytes = cmd.as_bytes();
            assert_eq!(Command::from_bytes(bytes), Some(cmd));
        }
    }

    #[test]
    fn unknown_command_byte_rejected() {
        assert_eq!(Command::from_bytes(b"\xff"), None);
    }

    #[test]
    fn magic_strings_are_distinct() {
        assert_ne!(C_CLIENT, W_WORKER);
    }
}
