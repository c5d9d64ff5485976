use std::io;

use thiserror::Error;

/// Transport-level failures on a [`crate::channel::DuplexChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport returned an I/O error.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
    /// A per-operation read/write timeout elapsed.
    #[error("channel operation timed out")]
    Timeout,
    /// The peer closed the connection in the middle of a frame or a
    /// fixed-size read.
    #[error("premature end of stream")]
    PrematureEof,
}

/// Malformed-wire-data failures: bad frames, unknown
/// tags, version mismatches, and greeting syntax errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A multiplex frame declared a tag byte this implementation does not
    /// recognize.
    #[error("unknown multiplex tag byte {0:#04x}")]
    UnknownTag(u8),
    /// A frame's length prefix or body could not be parsed.
    #[error("malformed multiplex frame: {0}")]
    MalformedFrame(String),
    /// The peer's greeting did not name a protocol version in the
    /// supported range.
    #[error("unsupported protocol version {peer}: need >= {min} and <= {max}")]
    VersionMismatch {
        /// Version the peer offered.
        peer: u32,
        /// Minimum version this implementation supports.
        min: u32,
        /// Maximum version this implementation supports.
        max: u32,
    },
    /// The greeting line was not ASCII, not newline-terminated, or did not
    /// start with the expected `@RSYNCD:` prefix.
    #[error("invalid greeting line: {0:?}")]
    InvalidGreeting(String),
    /// A variable-length signed index could not be decoded.
    #[error("malformed variable-length index encoding")]
    MalformedVarint,
    /// The underlying transport failed while a protocol structure was
    /// being read or written.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
