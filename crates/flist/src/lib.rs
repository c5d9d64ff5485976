#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `flist` enumerates a module root into an ordered file list and
//! serializes it in the delta-encoded wire format a daemon session exchanges
//! with its peer.
//!
//! - [`walk::enumerate_module`] performs the depth-first, sorted filesystem
//!   walk.
//! - [`order`] defines the total order entries must appear in.
//! - [`wire`] encodes/decodes one entry at a time against the previous,
//!   matching the delta-flags scheme real rsync peers expect.
//!
//! # Invariants
//!
//! - [`order::compare`] is a total order: the root marker `"."` sorts
//!   first, and a directory name compares as if followed by `0x00`.
//! - [`wire::Encoder`] never emits an all-zero flags byte for a real entry,
//!   since `0x00` is reserved as the list terminator.

pub mod entry;
pub mod order;
pub mod walk;
pub mod wire;

pub use entry::{Attrs, FileInfo, Kind};
pub use walk::{enumerate_module, WalkError};
pub use wire::{DecodeOutcome, Decoder, Encoder, WireError};
