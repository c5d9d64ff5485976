#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `matching` builds the block-indexed checksum table a receiver sends to a
//! sender, and drives the rolling/strong match search that turns a sender's
//! file into a literal/copy delta script. It sits directly on
//! top of the `checksums` crate's rolling and strong digest primitives.
//!
//! - [`header`] defines the per-file block layout (`ChecksumHeader`,
//!   `Chunk`).
//! - [`table`] builds and indexes the checksum table, including the
//!   preferred-index locality search (`close_index_of`).
//! - [`engine`] runs the sender-side sliding-window match (`generate_delta`).
//! - [`delta`] defines the token stream (`DeltaToken`, `DeltaScript`) and the
//!   receiver-side reconstruction (`apply_delta`).
//!
//! # Invariants
//!
//! - [`engine::generate_delta`] paired with [`delta::apply_delta`] always
//!   reconstructs its input exactly.
//! - [`table::ChecksumTable::build`] yields exactly `⌈S/B⌉` chunks for a
//!   file of size `S` and block length `B`.

pub mod delta;
pub mod engine;
pub mod header;
pub mod table;

pub use delta::{apply_delta, DeltaError, DeltaScript, DeltaToken};
pub use engine::{generate_delta, MatchError};
pub use header::{ChecksumHeader, Chunk, HeaderError, MAX_BLOCK_LENGTH};
pub use table::{close_index_of, ChecksumTable, StrongAlgorithm, TableError};
