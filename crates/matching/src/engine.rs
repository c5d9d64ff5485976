use checksums::{strong::StrongDigest, RollingChecksum, RollingError};
use thiserror::Error;

use crate::delta::{DeltaScript, DeltaToken};
use crate::table::{close_index_of, ChecksumTable, StrongAlgorithm};

/// Errors raised while matching a sender's file against a [`ChecksumTable`].
#[derive(Debug, Error)]
pub enum MatchError {
    /// The table was never built with [`ChecksumTable::build`].
    #[error("checksum table has no header; it was never built")]
    MissingHeader,
    /// The rolling checksum window hit an internal invariant violation.
    #[error("rolling checksum error: {0}")]
    Rolling(#[from] RollingError),
}

fn strong_digest_for(algorithm: StrongAlgorithm, data: &[u8], digest_length: usize) -> Vec<u8> {
    match algorithm {
        StrongAlgorithm::Md4 => checksums::strong::Md4::truncated(data, digest_length),
        StrongAlgorithm::Md5 => checksums::strong::Md5::truncated(data, digest_length),
    }
}

/// Scans `input` against `table` and produces the literal/copy token stream
/// a sender would emit during the match stream phase of the delta protocol.
/// This is the sender-side half of delta transfer; [`apply`](
/// crate::delta::apply_delta) is the receiver-side half.
///
/// # Errors
///
/// Returns [`MatchError::MissingHeader`] if `table` was never built, or
/// [`MatchError::Rolling`] if the rolling checksum window is advanced past
/// its internal 32-bit length limit (practically unreachable for files that
/// fit in memory).
pub fn generate_delta(
    input: &[u8],
    table: &ChecksumTable,
    algorithm: StrongAlgorithm,
) -> Result<DeltaScript, MatchError> {
    let header = table.header().ok_or(MatchError::MissingHeader)?;
    let block_length = header.block_length() as usize;
    let digest_length = header.digest_length() as usize;
    let len = input.len();

    let mut tokens = Vec::new();
    if block_length == 0 || len == 0 {
        if len > 0 {
            tokens.push(DeltaToken::Literal(input.to_vec()));
        }
        return Ok(DeltaScript::new(tokens));
    }

    let mut literal_start = 0usize;
    let mut preferred_index: u32 = 0;
    let mut pos = 0usize;

    if len >= block_length {
        let last_full_window_start = len - block_length;
        let mut rolling = RollingChecksum::new();
        rolling.update(&input[pos..pos + block_length]);

        loop {
            let matched = find_match(
                table,
                rolling.value(),
                &input[pos..pos + block_length],
                block_length as u32,
                preferred_index,
                algorithm,
                digest_length,
            );

            if let Some(matched_index) = matched {
                flush_literal(&mut tokens, input, literal_start, pos);
                tokens.push(DeltaToken::Copy {
                    chunk_index: matched_index,
                    length: block_length as u32,
                });
                preferred_index = matched_index + 1;
                pos += block_length;
                literal_start = pos;

                if pos > last_full_window_start {
                    break;
                }
                rolling = RollingChecksum::new();
                rolling.update(&input[pos..pos + block_length]);
                continue;
            }

            if pos >= last_full_window_start {
                pos += 1;
                break;
            }

            let outgoing = input[pos];
            let incoming = input[pos + block_length];
            rolling.roll(outgoing, incoming)?;
            pos += 1;
        }
        pos = pos.min(len);
    }

    // Tail: fewer than `block_length` bytes remain. Only the designated
    // remainder length may match, and only flush against the file tail.
    let remaining = len - pos.min(len);
    let tail_start = len - remaining;
    if header.remainder() > 0 && remaining == header.remainder() as usize {
        let tail = &input[tail_start..len];
        let mut rolling = RollingChecksum::new();
        rolling.update(tail);
        if let Some(matched_index) = find_match(
            table,
            rolling.value(),
            tail,
            header.remainder(),
            preferred_index,
            algorithm,
            digest_length,
        ) {
            flush_literal(&mut tokens, input, literal_start, tail_start);
            tokens.push(DeltaToken::Copy {
                chunk_index: matched_index,
                length: header.remainder(),
            });
            literal_start = len;
        }
    }

    flush_literal(&mut tokens, input, literal_start, len);
    Ok(DeltaScript::new(tokens))
}

#[allow(clippy::too_many_arguments)]
fn find_match(
    table: &ChecksumTable,
    rolling_value: u32,
    window: &[u8],
    window_len: u32,
    preferred_index: u32,
    algorithm: StrongAlgorithm,
    digest_length: usize,
) -> Option<u32> {
    let bucket = table.bucket(rolling_value)?;
    let order = close_index_of(bucket, preferred_index);
    let strong = strong_digest_for(algorithm, window, digest_length);

    for idx in order {
        let chunk = &bucket[idx];
        if chunk.length() != window_len {
            continue;
        }
        if chunk.strong_digest() == strong.as_slice() {
            return Some(chunk.index());
        }
    }
    None
}

fn flush_literal(tokens: &mut Vec<DeltaToken>, input: &[u8], start: usize, end: usize) {
    if start < end {
        tokens.push(DeltaToken::Literal(input[start..end].to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::apply_delta;
    use std::io::Cursor;

    fn round_trip(basis: &[u8], input: &[u8], block_length: u32) -> DeltaScript {
        let table =
            ChecksumTable::build(Cursor::new(basis), block_length, StrongAlgorithm::Md5, 16)
                .unwrap();
        let script = generate_delta(input, &table, StrongAlgorithm::Md5).unwrap();
        let mut out = Vec::new();
        apply_delta(&mut Cursor::new(basis), &mut out, &table, &script).unwrap();
        assert_eq!(out, input, "reconstructed output must equal input");
        script
    }

    #[test]
    fn identical_files_are_mostly_copies() {
        let data = vec![0xAAu8; 8192];
        let script = round_trip(&data, &data, 1024);
        assert!(script.copy_bytes() > 0);
        assert_eq!(script.literal_bytes(), 0);
    }

    #[test]
    fn completely_different_files_are_all_literal() {
        let basis = vec![0u8; 4096];
        let input = vec![0xFFu8; 4096];
        let script = round_trip(&basis, &input, 1024);
        assert_eq!(script.copy_bytes(), 0);
        assert_eq!(script.literal_bytes(), input.len());
    }

    #[test]
    fn localized_edit_produces_one_literal_run() {
        let a: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let mut b = a.clone();
        for byte in &mut b[100_000..100_100] {
            *byte ^= 0xFF;
        }
        let table = ChecksumTable::build(Cursor::new(&a), 8192, StrongAlgorithm::Md5, 16).unwrap();
        let script = generate_delta(&b, &table, StrongAlgorithm::Md5).unwrap();

        let literal_tokens = script
            .tokens()
            .iter()
            .filter(|t| matches!(t, DeltaToken::Literal(_)))
            .count();
        assert!(literal_tokens <= 2, "expected one contiguous literal run, got {literal_tokens}");

        let mut out = Vec::new();
        apply_delta(&mut Cursor::new(&a), &mut out, &table, &script).unwrap();
        assert_eq!(out, b);
    }

    #[test]
    fn empty_input_yields_empty_script() {
        let table = ChecksumTable::build(Cursor::new(&[] as &[u8]), 700, StrongAlgorithm::Md5, 16)
            .unwrap();
        let script = generate_delta(&[], &table, StrongAlgorithm::Md5).unwrap();
        assert!(script.tokens().is_empty());
    }

    #[test]
    fn single_byte_file_with_block_length_one_terminates() {
        round_trip(b"x", b"y", 1);
        round_trip(b"x", b"x", 1);
    }

    #[test]
    fn zero_block_length_is_entirely_literal() {
        let table =
            ChecksumTable::build(Cursor::new(b"anything" as &[u8]), 0, StrongAlgorithm::Md5, 16)
                .unwrap();
        let script = generate_delta(b"fresh data", &table, StrongAlgorithm::Md5).unwrap();
        assert_eq!(script.copy_bytes(), 0);
        assert_eq!(script.literal_bytes(), "fresh data".len());
    }
}
