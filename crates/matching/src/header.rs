use thiserror::Error;

/// Largest block length the wire format allows (`2^17`).
pub const MAX_BLOCK_LENGTH: u32 = 1 << 17;

/// Errors raised while constructing or validating a [`ChecksumHeader`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HeaderError {
    /// `block_length` exceeded [`MAX_BLOCK_LENGTH`].
    #[error("block length {0} exceeds the maximum of {MAX_BLOCK_LENGTH}")]
    BlockLengthTooLarge(u32),
    /// `chunk_count` and `block_length` disagreed on whether the file has any
    /// blocks at all: exactly one of them was zero.
    #[error("chunk count {chunk_count} is inconsistent with block length {block_length}")]
    ChunkCountBlockLengthMismatch {
        /// The chunk count as given.
        chunk_count: u32,
        /// The block length as given.
        block_length: u32,
    },
    /// The final chunk's `remainder` was longer than a full chunk.
    #[error("remainder {remainder} exceeds block length {block_length}")]
    RemainderExceedsBlockLength {
        /// The remainder length as given.
        remainder: u32,
        /// The block length it was checked against.
        block_length: u32,
    },
    /// `digest_length` was nonzero but outside `[2, 16]`.
    #[error("digest length {0} is outside the allowed range of 2..=16")]
    DigestLengthOutOfRange(u8),
    /// The file is large enough that `chunk_count` would overflow a signed 32-bit integer.
    #[error("file of {size} bytes needs more chunks than a signed 32-bit count can hold at block length {block_length}")]
    ChunkCountOverflow {
        /// File size that triggered the overflow.
        size: u64,
        /// Block length that was requested.
        block_length: u32,
    },
}

/// Per-file parameters describing how a basis file was split into blocks for
/// checksum comparison.
///
/// Constructing one by hand (rather than via [`Self::for_file_size`]) is only
/// valid for headers parsed off the wire, where the invariants were already
/// checked by the peer that built the table; [`Self::new`] re-validates them
/// regardless so a malicious peer cannot smuggle an invariant violation in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChecksumHeader {
    chunk_count: u32,
    block_length: u32,
    remainder: u32,
    digest_length: u8,
}

impl ChecksumHeader {
    /// Validates and builds a header from its wire fields.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if any field invariant is violated.
    pub fn new(
        chunk_count: u32,
        block_length: u32,
        remainder: u32,
        digest_length: u8,
    ) -> Result<Self, HeaderError> {
        if block_length > MAX_BLOCK_LENGTH {
            return Err(HeaderError::BlockLengthTooLarge(block_length));
        }
        if (chunk_count == 0) != (block_length == 0) {
            return Err(HeaderError::ChunkCountBlockLengthMismatch { chunk_count, block_length });
        }
        if block_length > 0 && remainder > block_length {
            return Err(HeaderError::RemainderExceedsBlockLength { remainder, block_length });
        }
        if digest_length != 0 && !(2..=16).contains(&digest_length) {
            return Err(HeaderError::DigestLengthOutOfRange(digest_length));
        }
        Ok(Self {
            chunk_count,
            block_length,
            remainder,
            digest_length,
        })
    }

    /// Derives a header for a basis file of `size` bytes split into blocks of
    /// `block_length` bytes (`block_length == 0` means "no blocks, all
    /// literal").
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::ChunkCountOverflow`] if the resulting chunk
    /// count would not fit in a signed 32-bit integer, and propagates the
    /// other [`HeaderError`] variants from [`Self::new`].
    pub fn for_file_size(
        size: u64,
        block_length: u32,
        digest_length: u8,
    ) -> Result<Self, HeaderError> {
        if block_length == 0 {
            return Self::new(0, 0, 0, digest_length);
        }

        let block_length_u64 = u64::from(block_length);
        let chunk_count = size.div_ceil(block_length_u64);
        if chunk_count > i32::MAX as u64 {
            return Err(HeaderError::ChunkCountOverflow { size, block_length });
        }
        let remainder = (size % block_length_u64) as u32;

        Self::new(chunk_count as u32, block_length, remainder, digest_length)
    }

    /// Number of chunks the basis file was split into.
    #[must_use]
    pub const fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Nominal length of every chunk but the last.
    #[must_use]
    pub const fn block_length(&self) -> u32 {
        self.block_length
    }

    /// Length of the final chunk when it is shorter than `block_length`; zero
    /// when the file size is an exact multiple of `block_length`.
    #[must_use]
    pub const fn remainder(&self) -> u32 {
        self.remainder
    }

    /// Negotiated strong-digest truncation length.
    #[must_use]
    pub const fn digest_length(&self) -> u8 {
        self.digest_length
    }

    /// Length in bytes of the chunk at `index`, or `None` if out of range.
    #[must_use]
    pub fn chunk_length(&self, index: u32) -> Option<u32> {
        if index >= self.chunk_count {
            return None;
        }
        let is_last = index + 1 == self.chunk_count;
        Some(if is_last && self.remainder > 0 {
            self.remainder
        } else {
            self.block_length
        })
    }
}

/// A single block of the basis file along with the checksums that identify it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    index: u32,
    length: u32,
    strong_digest: Vec<u8>,
}

impl Chunk {
    /// Builds a chunk descriptor.
    #[must_use]
    pub fn new(index: u32, length: u32, strong_digest: Vec<u8>) -> Self {
        Self { index, length, strong_digest }
    }

    /// Position of this chunk within the basis file, counting from zero.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Number of bytes this chunk covers.
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Strong digest truncated to the header's negotiated `digest_length`.
    #[must_use]
    pub fn strong_digest(&self) -> &[u8] {
        &self.strong_digest
    }
}
