#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` implements the wire-level half of the rsync daemon protocol
//! core: the framed duplex channel, the tagged multiplex layer built on top
//! of it, greeting/version/module negotiation, and the per-file delta wire
//! codec.
//!
//! - [`channel`] defines the capability-set transport traits (`Readable`,
//!   `Writable`, `DuplexChannel`) and a generic `Read + Write` adapter.
//! - [`frame`] and [`tag`] define the multiplex frame header and its tag
//!   byte.
//! - [`varint`] implements the variable-length signed index encoding used
//!   by the multiplex control stream.
//! - [`multiplex`] layers tagged framing over a [`channel::DuplexChannel`],
//!   implementing the auto-flush rule.
//! - [`negotiation`] handles the pre-multiplex ASCII exchanges: greeting,
//!   version negotiation, module listing/selection, and challenge/response
//!   authentication.
//! - [`delta_wire`] encodes and decodes the checksum header, chunk list, and
//!   delta token stream exchanged once a transfer is underway.
//!
//! # Invariants
//!
//! - [`multiplex::MultiplexChannel`] never blocks on a read while output is
//!   still buffered.
//! - [`negotiation::negotiate_version`] only ever agrees on a version inside
//!   [`negotiation::MIN_VERSION`]..=[`negotiation::MAX_VERSION`].

pub mod channel;
pub mod delta_wire;
pub mod error;
pub mod frame;
pub mod multiplex;
pub mod negotiation;
pub mod tag;
pub mod varint;

pub use channel::{ByteCounter, DuplexChannel, GenericChannel, Readable, TcpChannel, Writable};
pub use error::{ChannelError, ProtocolError};
pub use frame::{FrameHeader, FrameReadError, MAX_FRAME_BODY_LEN};
pub use multiplex::{Message, MultiplexChannel};
pub use tag::Tag;
