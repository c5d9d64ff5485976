use core::fmt;

/// Errors raised while updating a [`RollingChecksum`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RollingError {
    /// The window has not been seeded with any bytes yet.
    EmptyWindow,
    /// The window is longer than what the packed 32-bit representation can track.
    WindowTooLarge {
        /// Number of bytes currently held in the window.
        len: usize,
    },
    /// `roll_many` was called with outgoing/incoming slices of different lengths.
    MismatchedSliceLength {
        /// Number of bytes being evicted from the window.
        outgoing: usize,
        /// Number of bytes being admitted into the window.
        incoming: usize,
    },
}

impl fmt::Display for RollingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyWindow => write!(f, "rolling checksum requires a non-empty window"),
            Self::WindowTooLarge { len } => {
                write!(f, "rolling checksum window of {len} bytes exceeds the 32-bit limit")
            }
            Self::MismatchedSliceLength { outgoing, incoming } => write!(
                f,
                "rolling checksum requires outgoing ({outgoing}) and incoming ({incoming}) slices of equal length"
            ),
        }
    }
}

impl std::error::Error for RollingError {}

/// A 32-bit weak checksum updatable in O(1) as a fixed-size window slides
/// across a byte stream (the "rsum" of the checksum engine design).
///
/// `s1` accumulates the byte sum plus a small fixed offset used to avoid a
/// zero bias on all-zero windows; `s2` accumulates the running sum of `s1`.
/// Both components are truncated to 16 bits after every update so the
/// packed value stays within 32 bits and stays interoperable with peers that
/// transmit the checksum as two `u16` halves.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RollingChecksum {
    s1: u32,
    s2: u32,
    len: usize,
}

/// Fixed bias folded into `s1` so an all-zero window does not collide with
/// the "no checksum yet" state.
const CHAR_OFFSET: u32 = 31;

impl RollingChecksum {
    /// Creates a rolling checksum with no bytes observed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { s1: 0, s2: 0, len: 0 }
    }

    /// Reconstructs a rolling checksum from a digest captured earlier, e.g.
    /// one read off the wire as part of a checksum header exchange.
    #[must_use]
    pub const fn from_digest(digest: RollingDigest) -> Self {
        Self {
            s1: digest.s1 as u32,
            s2: digest.s2 as u32,
            len: digest.len,
        }
    }

    /// Clears the checksum back to its initial state.
    pub fn reset(&mut self) {
        self.s1 = 0;
        self.s2 = 0;
        self.len = 0;
    }

    /// Number of bytes that contributed to the current state.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes have been observed yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Feeds a block of bytes into the checksum from scratch (equivalent to
    /// [`reset`](Self::reset) followed by [`update`](Self::update)).
    pub fn update_from_block(&mut self, block: &[u8]) {
        self.reset();
        self.update(block);
    }

    /// Accumulates additional bytes into the running checksum.
    pub fn update(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let mut s1 = self.s1;
        let mut s2 = self.s2;

        let mut iter = chunk.chunks_exact(4);
        for quad in &mut iter {
            for &byte in quad {
                s1 = s1.wrapping_add(u32::from(byte)).wrapping_add(CHAR_OFFSET);
                s2 = s2.wrapping_add(s1);
            }
        }
        for &byte in iter.remainder() {
            s1 = s1.wrapping_add(u32::from(byte)).wrapping_add(CHAR_OFFSET);
            s2 = s2.wrapping_add(s1);
        }

        self.s1 = s1 & 0xffff;
        self.s2 = s2 & 0xffff;
        self.len = self.len.saturating_add(chunk.len());
    }

    fn window_len_u32(&self) -> Result<u32, RollingError> {
        if self.len == 0 {
            return Err(RollingError::EmptyWindow);
        }
        u32::try_from(self.len).map_err(|_| RollingError::WindowTooLarge { len: self.len })
    }

    /// Slides the window forward by one byte: `outgoing` leaves, `incoming`
    /// enters. This is the hot path of the block-matching scan: it must stay
    /// O(1) regardless of window length.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::EmptyWindow`] if no block has been hashed yet,
    /// or [`RollingError::WindowTooLarge`] if the window exceeds 2^32 bytes.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) -> Result<(), RollingError> {
        let window_len = self.window_len_u32()?;

        let out = u32::from(outgoing) + CHAR_OFFSET;
        let inn = u32::from(incoming) + CHAR_OFFSET;

        let new_s1 = self.s1.wrapping_sub(out).wrapping_add(inn) & 0xffff;
        let new_s2 = self
            .s2
            .wrapping_sub(window_len.wrapping_mul(out))
            .wrapping_add(new_s1)
            & 0xffff;

        self.s1 = new_s1;
        self.s2 = new_s2;
        Ok(())
    }

    /// Rolls the window forward by more than one byte at once. Equivalent to
    /// repeated [`roll`](Self::roll) calls but avoids per-byte branch
    /// overhead for callers that already know how far to advance.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::MismatchedSliceLength`] if the two slices
    /// differ in length, otherwise the same errors as [`roll`](Self::roll).
    pub fn roll_many(&mut self, outgoing: &[u8], incoming: &[u8]) -> Result<(), RollingError> {
        if outgoing.len() != incoming.len() {
            return Err(RollingError::MismatchedSliceLength {
                outgoing: outgoing.len(),
                incoming: incoming.len(),
            });
        }
        if outgoing.is_empty() {
            return Ok(());
        }

        let window_len = self.window_len_u32()?;
        let mut s1 = self.s1;
        let mut s2 = self.s2;

        for (&out, &inn) in outgoing.iter().zip(incoming.iter()) {
            let out = u32::from(out) + CHAR_OFFSET;
            let inn = u32::from(inn) + CHAR_OFFSET;
            s1 = s1.wrapping_sub(out).wrapping_add(inn) & 0xffff;
            s2 = s2.wrapping_sub(window_len.wrapping_mul(out)).wrapping_add(s1) & 0xffff;
        }

        self.s1 = s1;
        self.s2 = s2;
        Ok(())
    }

    /// The checksum in its packed 32-bit wire representation (`s2 << 16 | s1`).
    #[must_use]
    pub const fn value(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }

    /// Snapshots the current state as a [`RollingDigest`].
    #[must_use]
    pub fn digest(&self) -> RollingDigest {
        RollingDigest {
            s1: self.s1 as u16,
            s2: self.s2 as u16,
            len: self.len,
        }
    }
}

impl From<RollingDigest> for RollingChecksum {
    fn from(digest: RollingDigest) -> Self {
        Self::from_digest(digest)
    }
}

/// Captured state of a [`RollingChecksum`] at a point in time, cheap to copy
/// and to pack onto the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RollingDigest {
    s1: u16,
    s2: u16,
    len: usize,
}

/// Error returned when a rolling digest cannot be parsed from a byte slice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RollingSliceError {
    len: usize,
}

impl RollingSliceError {
    /// Number of bytes a caller must supply to decode a rolling digest.
    pub const EXPECTED_LEN: usize = 4;

    /// Number of bytes that were actually supplied.
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }
}

impl fmt::Display for RollingSliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rolling checksum digest requires {} bytes, received {}",
            Self::EXPECTED_LEN,
            self.len
        )
    }
}

impl std::error::Error for RollingSliceError {}

impl RollingDigest {
    /// Builds a digest from its raw components.
    #[must_use]
    pub const fn new(sum1: u16, sum2: u16, len: usize) -> Self {
        Self { s1: sum1, s2: sum2, len }
    }

    /// Unpacks a digest from the 32-bit wire representation.
    #[must_use]
    pub const fn from_value(value: u32, len: usize) -> Self {
        Self {
            s1: value as u16,
            s2: (value >> 16) as u16,
            len,
        }
    }

    /// Unpacks a digest from its little-endian wire bytes.
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 4], len: usize) -> Self {
        Self::from_value(u32::from_le_bytes(bytes), len)
    }

    /// Unpacks a digest from a little-endian byte slice, validating length.
    ///
    /// # Errors
    ///
    /// Returns [`RollingSliceError`] if `bytes` is not exactly four bytes.
    pub fn from_le_slice(bytes: &[u8], len: usize) -> Result<Self, RollingSliceError> {
        if bytes.len() != RollingSliceError::EXPECTED_LEN {
            return Err(RollingSliceError { len: bytes.len() });
        }
        let mut array = [0u8; RollingSliceError::EXPECTED_LEN];
        array.copy_from_slice(bytes);
        Ok(Self::from_le_bytes(array, len))
    }

    /// First checksum component (byte sum).
    #[must_use]
    pub const fn sum1(&self) -> u16 {
        self.s1
    }

    /// Second checksum component (sum of prefix sums).
    #[must_use]
    pub const fn sum2(&self) -> u16 {
        self.s2
    }

    /// Number of bytes that contributed to this digest.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the digest was computed over zero bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed 32-bit wire representation.
    #[must_use]
    pub const fn value(&self) -> u32 {
        ((self.s2 as u32) << 16) | (self.s1 as u32)
    }

    /// Little-endian wire bytes.
    #[must_use]
    pub const fn to_le_bytes(&self) -> [u8; 4] {
        self.value().to_le_bytes()
    }
}
