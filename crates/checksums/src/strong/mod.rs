//! Strong (cryptographic-strength) digests used to verify block and whole-file
//! matches after the cheap rolling checksum narrows candidates down.
//!
//! A strong digest on the wire is truncated to a
//! negotiated `digest_length` in `[2, 16]` bytes; [`StrongDigest::truncated`]
//! applies that truncation uniformly across algorithms so callers never slice
//! the raw digest array by hand.

mod md4;
mod md5;

pub use md4::Md4;
pub use md5::Md5;

/// Smallest strong-digest length the wire format allows.
pub const MIN_DIGEST_LEN: usize = 2;
/// Largest strong-digest length the wire format allows.
pub const MAX_DIGEST_LEN: usize = 16;

/// Streaming strong-digest algorithm used by the checksum engine.
///
/// Implementors hash a full 16-byte digest internally; higher layers then
/// truncate to the module's negotiated `digest_length` via
/// [`Self::truncated`] rather than reimplementing the truncation rule.
pub trait StrongDigest: Sized {
    /// Full, untruncated digest produced by the algorithm.
    type Digest: AsRef<[u8]> + Copy;

    /// Byte width of [`Self::Digest`].
    const DIGEST_LEN: usize;

    /// Starts a new hasher with empty state.
    fn new() -> Self;

    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);

    /// Finalizes the digest.
    fn finalize(self) -> Self::Digest;

    /// Hashes `data` in one call.
    fn digest(data: &[u8]) -> Self::Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hashes `data` and truncates the result to `digest_length` bytes.
    ///
    /// `digest_length` is clamped into `[MIN_DIGEST_LEN, MAX_DIGEST_LEN]`
    /// first; callers that already validated a [`crate::ChecksumHeader`]
    /// never hit the clamp in practice.
    fn truncated(data: &[u8], digest_length: usize) -> Vec<u8> {
        let len = digest_length.clamp(MIN_DIGEST_LEN, MAX_DIGEST_LEN).min(Self::DIGEST_LEN);
        let digest = Self::digest(data);
        digest.as_ref()[..len].to_vec()
    }
}
