//! Wire codec for the checksum header, chunk list, and delta token stream
//! exchanged per file during `SEND_HEADER` / `SEND_CHECKSUMS` / `MATCH_STREAM`.

use std::io::{self, Read, Write};

use matching::{ChecksumHeader, ChecksumTable, Chunk, DeltaScript, DeltaToken, HeaderError, TableError};
use thiserror::Error;

use crate::varint;

/// Errors raised while encoding or decoding delta-protocol wire structures.
#[derive(Debug, Error)]
pub enum DeltaWireError {
    /// The underlying transport failed.
    #[error("delta wire I/O error: {0}")]
    Io(#[from] io::Error),
    /// A decoded header violated a [`matching`] invariant.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Building or reconstructing a checksum table failed.
    #[error(transparent)]
    Table(#[from] TableError),
    /// A variable-length index in the token stream was malformed.
    #[error(transparent)]
    Varint(#[from] crate::error::ProtocolError),
}

/// Writes a [`ChecksumHeader`] as four little-endian `u32` fields:
/// `chunk_count`, `block_length`, `remainder`, `digest_length` (the last
/// widened to `u32` for field-width uniformity; only the low byte is ever
/// nonzero since `digest_length <= 16`).
///
/// # Errors
///
/// Propagates the writer's I/O errors.
pub fn write_header<W: Write>(out: &mut W, header: &ChecksumHeader) -> io::Result<()> {
    out.write_all(&header.chunk_count().to_le_bytes())?;
    out.write_all(&header.block_length().to_le_bytes())?;
    out.write_all(&header.remainder().to_le_bytes())?;
    out.write_all(&u32::from(header.digest_length()).to_le_bytes())
}

/// Reads a [`ChecksumHeader`] written by [`write_header`].
///
/// # Errors
///
/// Returns [`DeltaWireError::Io`] on a transport failure and
/// [`DeltaWireError::Header`] if the decoded fields violate an invariant.
pub fn read_header<R: Read>(input: &mut R) -> Result<ChecksumHeader, DeltaWireError> {
    let chunk_count = read_u32(input)?;
    let block_length = read_u32(input)?;
    let remainder = read_u32(input)?;
    let digest_length = read_u32(input)?;
    Ok(ChecksumHeader::new(
        chunk_count,
        block_length,
        remainder,
        digest_length as u8,
    )?)
}

/// Writes the chunk list that follows a checksum header: each chunk's
/// rolling checksum value, `index`, `length`, then its `digest_length`-byte
/// strong digest, in ascending-index order. The rolling value travels on the
/// wire (rather than being recomputed) because the sender never sees the
/// receiver's basis bytes directly -- only this checksum table.
///
/// # Errors
///
/// Propagates the writer's I/O errors.
pub fn write_chunks<W: Write>(out: &mut W, chunks: &[(u32, Chunk)]) -> io::Result<()> {
    for (rolling_value, chunk) in chunks {
        out.write_all(&rolling_value.to_le_bytes())?;
        out.write_all(&chunk.index().to_le_bytes())?;
        out.write_all(&chunk.length().to_le_bytes())?;
        out.write_all(chunk.strong_digest())?;
    }
    Ok(())
}

/// Reads `chunk_count` chunks written by [`write_chunks`], each carrying a
/// `digest_length`-byte strong digest.
///
/// # Errors
///
/// Returns [`DeltaWireError::Io`] on a transport failure.
pub fn read_chunks<R: Read>(
    input: &mut R,
    chunk_count: u32,
    digest_length: u8,
) -> Result<Vec<(u32, Chunk)>, DeltaWireError> {
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        let rolling_value = read_u32(input)?;
        let index = read_u32(input)?;
        let length = read_u32(input)?;
        let mut digest = vec![0u8; digest_length as usize];
        input.read_exact(&mut digest)?;
        chunks.push((rolling_value, Chunk::new(index, length, digest)));
    }
    Ok(chunks)
}

/// Rebuilds a [`ChecksumTable`] from a header and chunk list read off the
/// wire, for the sender side of the delta exchange.
#[must_use]
pub fn table_from_wire(header: ChecksumHeader, chunks: Vec<(u32, Chunk)>) -> ChecksumTable {
    ChecksumTable::from_wire_chunks(header, chunks)
}

/// Writes a [`DeltaScript`] as a stream of signed 32-bit wire counts
/// (literal runs as their byte length followed by the literal bytes, copies
/// as a negative chunk reference), terminated by the `n == 0` sentinel.
///
/// # Errors
///
/// Returns [`DeltaWireError::Io`] on a transport failure, or wraps
/// [`matching::DeltaError`] if a token cannot be encoded as a 32-bit count
/// (surfaced as [`DeltaWireError::Io`] carrying an `InvalidData` error, since
/// the wire format has no dedicated slot for that failure).
pub fn write_delta_script<W: Write>(out: &mut W, script: &DeltaScript) -> Result<(), DeltaWireError> {
    for token in script.tokens() {
        let count = token
            .wire_count()
            .map_err(|e| DeltaWireError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        varint::encode_index(count, out)?;
        if let DeltaToken::Literal(bytes) = token {
            out.write_all(bytes)?;
        }
    }
    varint::encode_index(0, out)?;
    Ok(())
}

/// Reads a delta token stream written by [`write_delta_script`], resolving
/// copy tokens' lengths against `header`.
///
/// # Errors
///
/// Returns [`DeltaWireError::Io`] on a transport failure, or
/// [`DeltaWireError::Header`]-adjacent failure surfaced as `Io` if a copy
/// token references a chunk index outside the header's range.
pub fn read_delta_script<R: Read>(
    input: &mut R,
    header: &ChecksumHeader,
) -> Result<DeltaScript, DeltaWireError> {
    let mut tokens = Vec::new();
    loop {
        let count = varint::decode_index(input)?;
        let Some(count) = count else { break };
        if count == 0 {
            break;
        }
        if count > 0 {
            let mut bytes = vec![0u8; count as usize];
            input.read_exact(&mut bytes)?;
            tokens.push(DeltaToken::Literal(bytes));
        } else {
            let chunk_index = (-(count as i64) - 1) as u32;
            let length = header.chunk_length(chunk_index).ok_or_else(|| {
                DeltaWireError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("delta stream referenced unknown chunk index {chunk_index}"),
                ))
            })?;
            tokens.push(DeltaToken::Copy { chunk_index, length });
        }
    }
    Ok(DeltaScript::new(tokens))
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trips() {
        let header = ChecksumHeader::for_file_size(10_000, 4096, 16).unwrap();
        let mut buf = Vec::new();
        write_header(&mut buf, &header).unwrap();
        let decoded = read_header(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn chunks_round_trip() {
        let chunks = vec![
            (111u32, Chunk::new(0, 4096, vec![1; 16])),
            (222u32, Chunk::new(1, 512, vec![2; 16])),
        ];
        let mut buf = Vec::new();
        write_chunks(&mut buf, &chunks).unwrap();
        let decoded = read_chunks(&mut Cursor::new(buf), 2, 16).unwrap();
        assert_eq!(decoded, chunks);
    }

    #[test]
    fn table_from_wire_round_trips_through_matching() {
        use matching::StrongAlgorithm;
        use std::io::Cursor as DataCursor;

        let data = vec![3u8; 9000];
        let original =
            ChecksumTable::build(DataCursor::new(&data), 4096, StrongAlgorithm::Md5, 16).unwrap();
        let header = *original.header().unwrap();
        let wire_chunks = original.chunks_with_rolling();

        let mut buf = Vec::new();
        write_chunks(&mut buf, &wire_chunks).unwrap();
        let decoded = read_chunks(&mut Cursor::new(buf), header.chunk_count(), 16).unwrap();
        let rebuilt = table_from_wire(header, decoded);
        assert_eq!(rebuilt.chunk_count(), original.chunk_count());
    }

    #[test]
    fn delta_script_round_trips_literal_and_copy_tokens() {
        let header = ChecksumHeader::new(2, 4, 2, 16).unwrap();
        let script = DeltaScript::new(vec![
            DeltaToken::Literal(vec![9, 9, 9]),
            DeltaToken::Copy { chunk_index: 0, length: 4 },
            DeltaToken::Copy { chunk_index: 1, length: 2 },
        ]);
        let mut buf = Vec::new();
        write_delta_script(&mut buf, &script).unwrap();
        let decoded = read_delta_script(&mut Cursor::new(buf), &header).unwrap();
        assert_eq!(decoded, script);
    }

    #[test]
    fn empty_script_is_just_the_sentinel() {
        let header = ChecksumHeader::new(0, 0, 0, 16).unwrap();
        let script = DeltaScript::default();
        let mut buf = Vec::new();
        write_delta_script(&mut buf, &script).unwrap();
        assert_eq!(buf, vec![0u8]);
        let decoded = read_delta_script(&mut Cursor::new(buf), &header).unwrap();
        assert_eq!(decoded, script);
    }

    #[test]
    fn copy_token_referencing_unknown_chunk_is_rejected() {
        let header = ChecksumHeader::new(1, 4, 0, 16).unwrap();
        let mut buf = Vec::new();
        varint::encode_index(-10, &mut buf).unwrap();
        varint::encode_index(0, &mut buf).unwrap();
        let err = read_delta_script(&mut Cursor::new(buf), &header).unwrap_err();
        assert!(matches!(err, DeltaWireError::Io(_)));
    }
}
