//! Total, reproducible ordering over [`FileInfo`] entries.
//!
//! The rule is entirely byte-based so it never depends on platform locale:
//! the root marker `"."` sorts strictly first, and otherwise two names
//! compare by raw bytes with one tie-break -- a directory's name compares
//! as if a trailing `0x00` followed it, modeling the fact that a directory
//! `"a"` is logically the prefix `"a/"` and must sort before a sibling file
//! literally named `"a0"`.

use std::cmp::Ordering;

use crate::entry::FileInfo;

/// The byte-comparison key for a single path component, used to order
/// siblings within one directory level.
#[must_use]
pub fn sort_key(name: &[u8], is_directory: bool) -> Vec<u8> {
    let mut key = name.to_vec();
    if is_directory {
        key.push(0);
    }
    key
}

/// Compares two sibling [`FileInfo`] entries for wire-list ordering.
///
/// This only compares the two entries' final path components; callers
/// walking a tree are expected to call this on siblings within the same
/// directory (the root marker check makes it safe to call on arbitrary
/// pairs too, since `"."` is only ever the first entry of the whole list).
#[must_use]
pub fn compare(a: &FileInfo, b: &FileInfo) -> Ordering {
    match (a.is_root_marker(), b.is_root_marker()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => {
            let key_a = sort_key(a.basename_bytes(), a.kind().is_directory());
            let key_b = sort_key(b.basename_bytes(), b.kind().is_directory());
            key_a.cmp(&key_b)
        }
    }
}
