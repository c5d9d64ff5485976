use std::io::Read;

use checksums::{strong::StrongDigest, RollingChecksum};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::header::{Chunk, ChecksumHeader, HeaderError};

/// Errors raised while building or reconstructing a [`ChecksumTable`].
#[derive(Debug, Error)]
pub enum TableError {
    /// The basis file could not be read while hashing its blocks.
    #[error("reading basis data: {0}")]
    Io(#[from] std::io::Error),
    /// The derived checksum header violated an invariant.
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// Strong-digest algorithm a [`ChecksumTable`] was built with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrongAlgorithm {
    /// RSA Data Security MD4.
    Md4,
    /// RSA Data Security MD5.
    Md5,
}

impl StrongAlgorithm {
    fn digest(self, data: &[u8], digest_length: usize) -> Vec<u8> {
        match self {
            Self::Md4 => checksums::strong::Md4::truncated(data, digest_length),
            Self::Md5 => checksums::strong::Md5::truncated(data, digest_length),
        }
    }
}

/// Block-indexed table associating a rolling checksum value to every basis
/// chunk that produced it, preserving insertion (ascending index) order
/// within each bucket.
#[derive(Clone, Debug, Default)]
pub struct ChecksumTable {
    header: Option<ChecksumHeader>,
    buckets: FxHashMap<u32, Vec<Chunk>>,
}

impl ChecksumTable {
    /// Builds a table by sequentially hashing `basis` into fixed-size blocks.
    ///
    /// `block_length == 0` produces an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Io`] on a read failure and
    /// [`TableError::Header`] if the resulting header would violate an
    /// invariant (e.g. the file is too large for the requested block length).
    pub fn build<R: Read>(
        mut basis: R,
        block_length: u32,
        algorithm: StrongAlgorithm,
        digest_length: u8,
    ) -> Result<Self, TableError> {
        let mut table = Self::default();
        if block_length == 0 {
            table.header = Some(ChecksumHeader::new(0, 0, 0, digest_length)?);
            return Ok(table);
        }

        let mut buf = vec![0u8; block_length as usize];
        let mut index: u32 = 0;
        let mut total_size: u64 = 0;
        let mut last_len: u32 = block_length;

        loop {
            let n = read_full(&mut basis, &mut buf)?;
            if n == 0 {
                break;
            }

            let block = &buf[..n];
            let mut rolling = RollingChecksum::new();
            rolling.update(block);
            let strong = algorithm.digest(block, digest_length as usize);

            table
                .buckets
                .entry(rolling.value())
                .or_default()
                .push(Chunk::new(index, n as u32, strong));

            total_size += n as u64;
            last_len = n as u32;
            index += 1;

            if n < buf.len() {
                break;
            }
        }

        let _ = last_len;
        table.header = Some(ChecksumHeader::for_file_size(
            total_size,
            block_length,
            digest_length,
        )?);
        Ok(table)
    }

    /// Rebuilds a table from a header and a `(rolling_value, chunk)` list
    /// received off the wire.
    #[must_use]
    pub fn from_wire_chunks(header: ChecksumHeader, chunks: Vec<(u32, Chunk)>) -> Self {
        let mut buckets: FxHashMap<u32, Vec<Chunk>> = FxHashMap::default();
        for (rolling_value, chunk) in chunks {
            buckets.entry(rolling_value).or_default().push(chunk);
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by_key(Chunk::index);
        }
        Self { header: Some(header), buckets }
    }

    /// The header describing this table's block layout, if it has been built.
    #[must_use]
    pub const fn header(&self) -> Option<&ChecksumHeader> {
        self.header.as_ref()
    }

    /// Chunks sharing the given rolling checksum value, in ascending index
    /// order, or `None` if no chunk produced that value.
    #[must_use]
    pub fn bucket(&self, rolling_value: u32) -> Option<&[Chunk]> {
        self.buckets.get(&rolling_value).map(Vec::as_slice)
    }

    /// Total number of chunks across all buckets.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Every chunk paired with its rolling checksum value, in ascending
    /// index order, for transmission to a sender peer (the wire counterpart
    /// of [`Self::from_wire_chunks`]).
    #[must_use]
    pub fn chunks_with_rolling(&self) -> Vec<(u32, Chunk)> {
        let mut all: Vec<(u32, Chunk)> = self
            .buckets
            .iter()
            .flat_map(|(&rolling, chunks)| chunks.iter().map(move |c| (rolling, c.clone())))
            .collect();
        all.sort_by_key(|(_, chunk)| chunk.index());
        all
    }
}

/// Reads into `buf` until it is full or the reader is exhausted, returning
/// the number of bytes actually read (short only at end-of-file).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Picks the entry within `bucket` most likely to extend the previous match,
/// yielding it ahead of the rest of the bucket.
///
/// `bucket` must be sorted ascending by [`Chunk::index`], which is always
/// true for buckets produced by [`ChecksumTable::build`].
#[must_use]
pub fn close_index_of(bucket: &[Chunk], preferred_index: u32) -> Vec<usize> {
    if bucket.is_empty() {
        return Vec::new();
    }

    let preferred_pos = match bucket.binary_search_by_key(&preferred_index, Chunk::index) {
        Ok(pos) => pos,
        Err(pos) => pos.min(bucket.len() - 1),
    };

    let mut order = Vec::with_capacity(bucket.len());
    order.push(preferred_pos);
    for i in 0..bucket.len() {
        if i != preferred_pos {
            order.push(i);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn build_produces_ceil_chunk_count() {
        let data = vec![7u8; 10_000];
        let table = ChecksumTable::build(Cursor::new(&data), 4096, StrongAlgorithm::Md5, 16)
            .expect("build succeeds");
        assert_eq!(table.header().unwrap().chunk_count(), 3);
        assert_eq!(table.chunk_count(), 3);
    }

    #[test]
    fn chunks_with_rolling_round_trip_through_from_wire_chunks() {
        let data = vec![7u8; 10_000];
        let original = ChecksumTable::build(Cursor::new(&data), 4096, StrongAlgorithm::Md5, 16)
            .expect("build succeeds");
        let header = *original.header().unwrap();

        let wire_chunks = original.chunks_with_rolling();
        assert_eq!(wire_chunks.len(), original.chunk_count());

        let rebuilt = ChecksumTable::from_wire_chunks(header, wire_chunks);
        assert_eq!(rebuilt.header(), original.header());
        assert_eq!(rebuilt.chunk_count(), original.chunk_count());
        for (rolling, chunk) in original.chunks_with_rolling() {
            let bucket = rebuilt.bucket(rolling).expect("bucket exists");
            assert!(bucket.iter().any(|c| c.index() == chunk.index()));
        }
    }

    #[test]
    fn build_with_zero_block_length_yields_empty_table() {
        let data = vec![1u8; 500];
        let table = ChecksumTable::build(Cursor::new(&data), 0, StrongAlgorithm::Md5, 16).unwrap();
        assert_eq!(table.header().unwrap().chunk_count(), 0);
        assert_eq!(table.chunk_count(), 0);
    }

    #[test]
    fn build_on_empty_file_yields_no_chunks() {
        let table = ChecksumTable::build(Cursor::new(&[] as &[u8]), 4096, StrongAlgorithm::Md5, 16)
            .unwrap();
        assert_eq!(table.header().unwrap().chunk_count(), 0);
    }

    #[test]
    fn close_index_of_prefers_exact_match() {
        let bucket = vec![
            Chunk::new(0, 4, vec![]),
            Chunk::new(2, 4, vec![]),
            Chunk::new(5, 4, vec![]),
        ];
        let order = close_index_of(&bucket, 2);
        assert_eq!(bucket[order[0]].index(), 2);
    }

    #[test]
    fn close_index_of_falls_back_to_insertion_point() {
        let bucket = vec![Chunk::new(0, 4, vec![]), Chunk::new(5, 4, vec![])];
        // preferred=3 is not present; insertion point is position 1 (index 5).
        let order = close_index_of(&bucket, 3);
        assert_eq!(bucket[order[0]].index(), 5);
    }

    #[test]
    fn close_index_of_clamps_past_last_entry() {
        let bucket = vec![Chunk::new(0, 4, vec![])];
        let order = close_index_of(&bucket, 99);
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn close_index_of_visits_every_entry_exactly_once() {
        let bucket = vec![
            Chunk::new(0, 4, vec![]),
            Chunk::new(1, 4, vec![]),
            Chunk::new(2, 4, vec![]),
        ];
        let mut order = close_index_of(&bucket, 1);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
