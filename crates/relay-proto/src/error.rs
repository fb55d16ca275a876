use thiserror::Error;

/// Errors produced while parsing or routing wire frames.
///
/// These are recoverable by construction: every call site that produces one
/// is expected to log it and drop the offending message rather than
/// propagate a hard failure, since a broker or worker reactor must survive
/// arbitrary hostile peer traffic.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("message has too few frames: expected at least {expected}, got {got}")]
    TooShort { expected: usize, got: usize },

    #[error("expected empty separator frame, got {len} bytes")]
    MissingSeparator { len: usize },

    #[error("unknown protocol magic: {0:?}")]
    UnknownMagic(bytes::Bytes),

    #[error("unknown worker command byte: {0:?}")]
    UnknownCommand(bytes::Bytes),

    #[error("worker message with command {command:?} requires {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
}
