//! Multiplex frame header encoding: `{ tag: u8, length: u24_le }` followed
//! by `length` bytes of body.

use std::io::{self, Read, Write};

use crate::error::ChannelError;
use crate::tag::Tag;

/// Largest body a single frame can carry (`2^24 - 1`).
pub const MAX_FRAME_BODY_LEN: u32 = 0x00FF_FFFF;

/// A decoded frame header: the tag and the length of the body that follows
/// it on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Which kind of payload the frame body carries.
    pub tag: Tag,
    /// Length of the body in bytes, always `<= MAX_FRAME_BODY_LEN`.
    pub length: u32,
}

/// Writes a frame header: one tag byte followed by a little-endian 24-bit
/// length.
///
/// # Errors
///
/// Returns [`ChannelError::Io`] if `length` exceeds [`MAX_FRAME_BODY_LEN`]
/// or the writer rejects the write.
pub fn write_header<W: Write>(out: &mut W, tag: Tag, length: u32) -> Result<(), ChannelError> {
    if length > MAX_FRAME_BODY_LEN {
        return Err(ChannelError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame body of {length} bytes exceeds the 24-bit length limit"),
        )));
    }
    let bytes = length.to_le_bytes();
    out.write_all(&[tag.as_u8(), bytes[0], bytes[1], bytes[2]])?;
    Ok(())
}

/// Reads a frame header, translating an unrecognized tag byte or a
/// mid-header EOF into the appropriate error.
///
/// # Errors
///
/// Returns [`ChannelError::PrematureEof`] if the stream ends before a full
/// header is read, [`ChannelError::Io`] on any other read failure, or
/// wraps [`crate::error::ProtocolError::UnknownTag`] via the `From` impl
/// when the tag byte is not recognized (surfaced to callers as
/// `ChannelError::Io` carrying an `InvalidData` error, since header framing
/// itself is transport-layer but an unknown tag is a protocol violation the
/// caller should treat as fatal).
pub fn read_header<R: Read>(input: &mut R) -> Result<FrameHeader, FrameReadError> {
    let mut buf = [0u8; 4];
    match input.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FrameReadError::Channel(ChannelError::PrematureEof))
        }
        Err(e) => return Err(FrameReadError::Channel(ChannelError::Io(e))),
    }

    let tag = Tag::try_from(buf[0]).map_err(FrameReadError::Protocol)?;
    let length = u32::from_le_bytes([buf[1], buf[2], buf[3], 0]);
    Ok(FrameHeader { tag, length })
}

/// Error raised while reading a frame header: either a transport fault or
/// an unrecognized tag byte.
#[derive(Debug, thiserror::Error)]
pub enum FrameReadError {
    /// The transport failed or was truncated mid-header.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The tag byte did not match any known [`Tag`] variant.
    #[error(transparent)]
    Protocol(#[from] crate::error::ProtocolError),
}
