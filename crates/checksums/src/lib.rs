#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the rolling and strong checksum primitives consumed
//! by the delta-transfer engine (see the `matching` crate, which builds a
//! per-file checksum table on top of these primitives and drives the actual
//! block search).
//!
//! - [`rolling`] implements the O(1)-updatable weak checksum used to scan a
//!   sender's file for blocks that may match the receiver's basis file.
//! - [`strong`] implements the MD4/MD5 strong digests used to confirm a weak
//!   match and to verify whole-file reconstruction.
//!
//! # Invariants
//!
//! - [`rolling::RollingChecksum`] truncates both internal components to 16
//!   bits after every update.
//! - [`strong::StrongDigest::truncated`] clamps its output length into
//!   `[strong::MIN_DIGEST_LEN, strong::MAX_DIGEST_LEN]`, matching the
//!   `digest_length` invariant on the wire checksum header.

mod rolling;
pub mod strong;

pub use rolling::{RollingChecksum, RollingDigest, RollingError, RollingSliceError};
