//! Encoding and decoding of the relay wire format.
//!
//! Frames arrive from a ROUTER socket as `[sender_addr, EMPTY, magic, ...]`.
//! The sender address is peeled off by the reactor before reaching this
//! module (it is transport-assigned and has no protocol meaning of its
//! own), so everything here operates on `[EMPTY, magic, ...]` onward.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::FrameError;
use crate::wire::{Command, C_CLIENT, W_WORKER};

/// A client request or reply body, tagged with the service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub service: Bytes,
    pub body: Vec<Bytes>,
}

impl ClientMessage {
    pub fn new(service: impl Into<Bytes>, body: Vec<Bytes>) -> Self {
        Self {
            service: service.into(),
            body,
        }
    }

    /// Encode as `[EMPTY, MDPC01, service, ...body]`, the frames following
    /// the destination address on send.
    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(3 + self.body.len());
        frames.push(Bytes::new());
        frames.push(Bytes::from_static(C_CLIENT));
        frames.push(self.service.clone());
        frames.extend(self.body.iter().cloned());
        frames
    }

    /// Decode from `[EMPTY, MDPC01, service, ...body]`. The caller has
    /// already confirmed the magic frame matches `C_CLIENT`.
    fn from_body(mut frames: VecDeque<Bytes>) -> Result<Self, FrameError> {
        let service = frames.pop_front().ok_or(FrameError::TooShort {
            expected: 1,
            got: 0,
        })?;
        Ok(ClientMessage {
            service,
            body: frames.into_iter().collect(),
        })
    }
}

/// A worker-side protocol message: one of READY, REQUEST, REPLY, HEARTBEAT,
/// or DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Ready { service: Bytes },
    Request { client_addr: Bytes, body: Vec<Bytes> },
    Reply { client_addr: Bytes, body: Vec<Bytes> },
    Heartbeat,
    Disconnect,
}

impl WorkerMessage {
    fn command(&self) -> Command {
        match self {
            WorkerMessage::Ready { .. } => Command::Ready,
            WorkerMessage::Request { .. } => Command::Request,
            WorkerMessage::Reply { .. } => Command::Reply,
            WorkerMessage::Heartbeat => Command::Heartbeat,
            WorkerMessage::Disconnect => Command::Disconnect,
        }
    }

    /// Encode as `[EMPTY, MDPW01, command, ...args]`, the frames following
    /// the destination address on send.
    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = vec![Bytes::new(), Bytes::from_static(W_WORKER)];
        frames.push(Bytes::copy_from_slice(self.command().as_bytes()));
        match self {
            WorkerMessage::Ready { service } => frames.push(service.clone()),
            WorkerMessage::Request { client_addr, body } | WorkerMessage::Reply { client_addr, body } => {
                frames.push(client_addr.clone());
                frames.push(Bytes::new());
                frames.extend(body.iter().cloned());
            }
            WorkerMessage::Heartbeat | WorkerMessage::Disconnect => {}
        }
        frames
    }

    /// Decode from `[EMPTY, MDPW01, command, ...args]`. The caller has
    /// already confirmed the magic frame matches `W_WORKER`.
    fn from_body(command: Bytes, mut frames: VecDeque<Bytes>) -> Result<Self, FrameError> {
        let cmd = Command::from_bytes(&command).ok_or(FrameError::UnknownCommand(command))?;
        match cmd {
            Command::Ready => {
                let service = frames.pop_front().ok_or(FrameError::MissingField {
                    command: "READY",
                    field: "service",
                })?;
                Ok(WorkerMessage::Ready { service })
            }
            Command::Request | Command::Reply => {
                let client_addr = frames.pop_front().ok_or(FrameError::MissingField {
                    command: if cmd == Command::Request { "REQUEST" } else { "REPLY" },
                    field: "client_addr",
                })?;
                let sep = frames.pop_front().ok_or(FrameError::MissingField {
                    command: if cmd == Command::Request { "REQUEST" } else { "REPLY" },
                    field: "empty separator",
                })?;
                if !sep.is_empty() {
                    return Err(FrameError::MissingSeparator { len: sep.len() });
                }
                let body = frames.into_iter().collect();
                if cmd == Command::Request {
                    Ok(WorkerMessage::Request { client_addr, body })
                } else {
                    Ok(WorkerMessage::Reply { client_addr, body })
                }
            }
            Command::Heartbeat => Ok(WorkerMessage::Heartbeat),
            Command::Disconnect => Ok(WorkerMessage::Disconnect),
        }
    }
}

/// A message received on the broker's router socket, after the sender
/// address has been peeled off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Client(ClientMessage),
    Worker(WorkerMessage),
}

/// Parse `[EMPTY, magic, ...]` into a typed peer message.
pub fn parse_peer_message(frames: Vec<Bytes>) -> Result<PeerMessage, FrameError> {
    let mut frames: VecDeque<Bytes> = frames.into();
    let empty = frames.pop_front().ok_or(FrameError::TooShort {
        expected: 2,
        got: 0,
    })?;
    if !empty.is_empty() {
        return Err(FrameError::MissingSeparator { len: empty.len() });
    }
    let magic = frames.pop_front().ok_or(FrameError::TooShort {
        expected: 2,
        got: 1,
    })?;
    if magic == C_CLIENT {
        ClientMessage::from_body(frames).map(PeerMessage::Client)
    } else if magic == W_WORKER {
        let command = frames.pop_front().ok_or(FrameError::TooShort {
            expected: 3,
            got: 2,
        })?;
        WorkerMessage::from_body(command, frames).map(PeerMessage::Worker)
    } else {
        Err(FrameError::UnknownMagic(magic))
    }
}
