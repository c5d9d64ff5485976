//! Variable-length signed index encoding used by the multiplex layer's
//! control messages.
//!
//! The spec leaves the exact shape of the "two or four bytes" escape
//! unspecified; this implementation resolves it as: `0xFE` is followed by a
//! one-byte width tag (`2` or `4`), then the value itself, little-endian,
//! sign-extended to `i32` when the width is `2`. `0xFF` is reserved and
//! never emitted; decoding it is a [`ProtocolError::MalformedVarint`].

use std::io::{self, Read, Write};

use crate::error::ProtocolError;

const DONE: u8 = 0x00;
const ESCAPE: u8 = 0xFE;
const RESERVED: u8 = 0xFF;

/// Lowest value representable in the one-byte form.
const ONE_BYTE_MIN: i32 = -126;
/// Highest value representable in the one-byte form.
const ONE_BYTE_MAX: i32 = 126;

/// Encodes `value` as a one-byte index, or the `0xFE`-escaped wide form if
/// it falls outside `[-126, 126]`.
///
/// # Errors
///
/// Propagates the writer's I/O errors.
pub fn encode_index<W: Write>(value: i32, out: &mut W) -> io::Result<()> {
    if (ONE_BYTE_MIN..=ONE_BYTE_MAX).contains(&value) {
        let byte = (value - ONE_BYTE_MIN + 1) as u8;
        return out.write_all(&[byte]);
    }

    if let Ok(narrow) = i16::try_from(value) {
        out.write_all(&[ESCAPE, 2])?;
        out.write_all(&narrow.to_le_bytes())
    } else {
        out.write_all(&[ESCAPE, 4])?;
        out.write_all(&value.to_le_bytes())
    }
}

/// Writes the "done" sentinel that terminates a sequence of indices.
///
/// # Errors
///
/// Propagates the writer's I/O errors.
pub fn encode_done<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(&[DONE])
}

/// Reads one index from `input`, or `None` if the next byte is the "done"
/// sentinel.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedVarint`] if the stream encodes a width
/// tag other than `2` or `4`, or the reserved byte `0xFF`; returns
/// [`ProtocolError::Channel`] on an underlying I/O failure, including a
/// premature end of stream.
pub fn decode_index<R: Read>(input: &mut R) -> Result<Option<i32>, ProtocolError> {
    let tag = read_byte(input)?;
    if tag == DONE {
        return Ok(None);
    }
    if tag == RESERVED {
        return Err(ProtocolError::MalformedVarint);
    }
    if tag == ESCAPE {
        let width = read_byte(input)?;
        return match width {
            2 => {
                let mut buf = [0u8; 2];
                read_exact(input, &mut buf)?;
                Ok(Some(i32::from(i16::from_le_bytes(buf))))
            }
            4 => {
                let mut buf = [0u8; 4];
                read_exact(input, &mut buf)?;
                Ok(Some(i32::from_le_bytes(buf)))
            }
            _ => Err(ProtocolError::MalformedVarint),
        };
    }

    let value = i32::from(tag) - 1 + ONE_BYTE_MIN;
    Ok(Some(value))
}

fn read_byte<R: Read>(input: &mut R) -> Result<u8, ProtocolError> {
    let mut buf = [0u8; 1];
    read_exact(input, &mut buf)?;
    Ok(buf[0])
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Channel(crate::error::ChannelError::PrematureEof))
        }
        Err(e) => Err(ProtocolError::Channel(crate::error::ChannelError::Io(e))),
    }
}
