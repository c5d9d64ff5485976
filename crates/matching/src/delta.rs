use std::io::{Read, Seek, SeekFrom, Write};

use thiserror::Error;

use crate::table::ChecksumTable;

/// One element of a delta script: either a run of literal bytes that
/// follow on the wire, or a reference to a chunk of the basis file to copy.
///
/// On the wire this collapses to a single signed 32-bit count:
/// `n > 0` is `n` literal bytes, `n < 0` is a copy of chunk `-n-1`, and
/// `n == 0` is the end-of-file sentinel (not represented here — callers know
/// the script has ended when they run out of tokens).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeltaToken {
    /// Bytes the sender had no basis match for and sent in full.
    Literal(Vec<u8>),
    /// Reference to a basis chunk, identified by its index within the table.
    Copy {
        /// Index of the matched chunk in the basis file's checksum table.
        chunk_index: u32,
        /// Length in bytes of the matched chunk, carried alongside the index
        /// so callers can account for reconstructed bytes without consulting
        /// the checksum header a second time.
        length: u32,
    },
}

impl DeltaToken {
    /// Encodes the token as the signed wire count.
    #[must_use]
    pub fn wire_count(&self) -> Result<i32, DeltaError> {
        match self {
            Self::Literal(bytes) => i32::try_from(bytes.len())
                .map_err(|_| DeltaError::LiteralTooLarge(bytes.len())),
            Self::Copy { chunk_index, .. } => {
                let index = i64::from(*chunk_index);
                i32::try_from(-(index + 1)).map_err(|_| DeltaError::ChunkIndexTooLarge(*chunk_index))
            }
        }
    }
}

/// Ordered sequence of [`DeltaToken`]s produced by [`crate::engine::generate_delta`]
/// and consumed by [`apply_delta`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeltaScript {
    tokens: Vec<DeltaToken>,
}

impl DeltaScript {
    /// Wraps a token sequence.
    #[must_use]
    pub const fn new(tokens: Vec<DeltaToken>) -> Self {
        Self { tokens }
    }

    /// The token sequence.
    #[must_use]
    pub fn tokens(&self) -> &[DeltaToken] {
        &self.tokens
    }

    /// Total literal bytes across the whole script.
    #[must_use]
    pub fn literal_bytes(&self) -> usize {
        self.tokens
            .iter()
            .map(|t| match t {
                DeltaToken::Literal(bytes) => bytes.len(),
                DeltaToken::Copy { .. } => 0,
            })
            .sum()
    }

    /// Total bytes reconstructed via chunk copies.
    #[must_use]
    pub fn copy_bytes(&self) -> usize {
        self.tokens
            .iter()
            .map(|t| match t {
                DeltaToken::Copy { length, .. } => *length as usize,
                DeltaToken::Literal(_) => 0,
            })
            .sum()
    }
}

/// Errors raised while encoding or applying a [`DeltaScript`].
#[derive(Debug, Error)]
pub enum DeltaError {
    /// A literal run was longer than `i32::MAX` bytes and cannot be encoded.
    #[error("literal run of {0} bytes cannot be encoded as a 32-bit wire count")]
    LiteralTooLarge(usize),
    /// A chunk index was too large to encode as a negative 32-bit count.
    #[error("chunk index {0} cannot be encoded as a 32-bit wire count")]
    ChunkIndexTooLarge(u32),
    /// The script referenced a chunk index absent from the checksum table.
    #[error("delta script referenced unknown chunk index {0}")]
    UnknownChunk(u32),
    /// Reading from or seeking within the basis file failed.
    #[error("basis file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reconstructs the sender's file by replaying `script` against `basis`,
/// writing the result to `output`. The receiver-side counterpart to
/// [`crate::engine::generate_delta`].
///
/// # Errors
///
/// Returns [`DeltaError::UnknownChunk`] if a copy token references a chunk
/// index that is not present in `table`'s header, or [`DeltaError::Io`] on a
/// basis-file read/seek failure or an output-write failure.
pub fn apply_delta<B: Read + Seek, W: Write>(
    basis: &mut B,
    output: &mut W,
    table: &ChecksumTable,
    script: &DeltaScript,
) -> Result<(), DeltaError> {
    let header = table.header();
    let block_length = header.map(|h| u64::from(h.block_length())).unwrap_or(0);

    for token in script.tokens() {
        match token {
            DeltaToken::Literal(bytes) => {
                output.write_all(bytes)?;
            }
            DeltaToken::Copy { chunk_index, length } => {
                let expected = header
                    .and_then(|h| h.chunk_length(*chunk_index))
                    .ok_or(DeltaError::UnknownChunk(*chunk_index))?;
                if expected != *length {
                    return Err(DeltaError::UnknownChunk(*chunk_index));
                }
                let offset = u64::from(*chunk_index) * block_length;
                basis.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; *length as usize];
                basis.read_exact(&mut buf)?;
                output.write_all(&buf)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn wire_count_encodes_literal_as_positive() {
        let token = DeltaToken::Literal(vec![1, 2, 3]);
        assert_eq!(token.wire_count().unwrap(), 3);
    }

    #[test]
    fn wire_count_encodes_copy_as_negative() {
        let token = DeltaToken::Copy { chunk_index: 0, length: 4 };
        assert_eq!(token.wire_count().unwrap(), -1);
        let token = DeltaToken::Copy { chunk_index: 5, length: 4 };
        assert_eq!(token.wire_count().unwrap(), -6);
    }

    #[test]
    fn apply_delta_rejects_unknown_chunk() {
        use crate::table::{ChecksumTable, StrongAlgorithm};
        let table =
            ChecksumTable::build(Cursor::new(b"abc" as &[u8]), 1, StrongAlgorithm::Md5, 16)
                .unwrap();
        let script = DeltaScript::new(vec![DeltaToken::Copy { chunk_index: 99, length: 1 }]);
        let mut out = Vec::new();
        let err = apply_delta(&mut Cursor::new(b"abc" as &[u8]), &mut out, &table, &script)
            .unwrap_err();
        assert!(matches!(err, DeltaError::UnknownChunk(99)));
    }
}
