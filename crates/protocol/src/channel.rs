//! Capability-set traits for the duplex transport a session runs over:
//! [`Readable`] and
//! [`Writable`] are the minimal byte-level operations, and
//! [`DuplexChannel`] is the two combined plus peer identity. Any concrete
//! transport (a plain TCP stream, or a TLS stream handed to this core by an
//! external collaborator) implements `DuplexChannel` by wrapping a
//! `Read + Write` value; [`crate::multiplex::MultiplexChannel`] is a
//! decorator over a `DuplexChannel` that adds the tagged-multiplex
//! operations.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::error::ChannelError;

/// Byte-level read operations a duplex channel's input half exposes.
pub trait Readable {
    /// Fills `buf` completely, or fails with [`ChannelError::PrematureEof`]
    /// if the transport closes first.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault or truncation.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError>;

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault or truncation.
    fn read_u8(&mut self) -> Result<u8, ChannelError> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a little-endian 32-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault or truncation.
    fn read_u32_le(&mut self) -> Result<u32, ChannelError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Discards `len` bytes from the input.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault or truncation.
    fn skip(&mut self, len: usize) -> Result<(), ChannelError> {
        let mut remaining = len;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            self.read_bytes(&mut scratch[..take])?;
            remaining -= take;
        }
        Ok(())
    }
}

/// Byte-level write operations a duplex channel's output half exposes.
pub trait Writable {
    /// Queues or sends `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ChannelError>;

    /// Writes a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault.
    fn write_u8(&mut self, byte: u8) -> Result<(), ChannelError> {
        self.write_bytes(&[byte])
    }

    /// Writes a little-endian 32-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault.
    fn write_u32_le(&mut self, value: u32) -> Result<(), ChannelError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Forces any buffered bytes out to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault.
    fn flush(&mut self) -> Result<(), ChannelError>;
}

/// A two-way transport plus peer identity, the unit a [`crate::multiplex::MultiplexChannel`]
/// decorates.
pub trait DuplexChannel: Readable + Writable {
    /// The remote socket address, when the transport is socket-based.
    fn peer_address(&self) -> Option<SocketAddr>;

    /// An authenticated principal name presented by the transport layer
    /// (e.g. a TLS client certificate subject), when one is available.
    fn peer_principal(&self) -> Option<&str> {
        None
    }

    /// Closes both halves of the channel. Errors closing the second half
    /// are attached to (but do not replace) the first.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered while closing either half.
    fn close(&mut self) -> Result<(), ChannelError> {
        self.flush()
    }
}

/// Running byte counters for one direction of a [`GenericChannel`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ByteCounter(u64);

impl ByteCounter {
    /// Total bytes counted so far.
    #[must_use]
    pub const fn total(self) -> u64 {
        self.0
    }

    fn add(&mut self, n: usize) {
        self.0 += n as u64;
    }
}

/// A [`DuplexChannel`] built from any owned `Read + Write` transport (a
/// plain [`TcpStream`], or a TLS-wrapped stream handed in by an external
/// collaborator). Tracks running byte counters on both directions.
pub struct GenericChannel<S> {
    stream: S,
    peer_address: Option<SocketAddr>,
    peer_principal: Option<String>,
    bytes_read: ByteCounter,
    bytes_written: ByteCounter,
}

impl<S: Read + Write> GenericChannel<S> {
    /// Wraps `stream` with no known peer address.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            peer_address: None,
            peer_principal: None,
            bytes_read: ByteCounter::default(),
            bytes_written: ByteCounter::default(),
        }
    }

    /// Records a peer address to report via [`DuplexChannel::peer_address`].
    #[must_use]
    pub fn with_peer_address(mut self, addr: SocketAddr) -> Self {
        self.peer_address = Some(addr);
        self
    }

    /// Records a peer principal to report via [`DuplexChannel::peer_principal`].
    #[must_use]
    pub fn with_peer_principal(mut self, principal: impl Into<String>) -> Self {
        self.peer_principal = Some(principal.into());
        self
    }

    /// Total bytes read from the transport so far.
    #[must_use]
    pub const fn bytes_read(&self) -> ByteCounter {
        self.bytes_read
    }

    /// Total bytes written to the transport so far.
    #[must_use]
    pub const fn bytes_written(&self) -> ByteCounter {
        self.bytes_written
    }

    /// Borrows the underlying transport.
    pub fn inner(&self) -> &S {
        &self.stream
    }

    /// Mutably borrows the underlying transport, e.g. to set socket options.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Read> Readable for GenericChannel<S> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        match self.stream.read_exact(buf) {
            Ok(()) => {
                self.bytes_read.add(buf.len());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ChannelError::PrematureEof)
            }
            Err(e) => Err(ChannelError::Io(e)),
        }
    }
}

impl<S: Write> Writable for GenericChannel<S> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.stream.write_all(buf)?;
        self.bytes_written.add(buf.len());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.stream.flush()?;
        Ok(())
    }
}

impl<S: Read + Write> DuplexChannel for GenericChannel<S> {
    fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address
    }

    fn peer_principal(&self) -> Option<&str> {
        self.peer_principal.as_deref()
    }
}

/// Convenience alias: a [`GenericChannel`] over a plain [`TcpStream`].
pub type TcpChannel = GenericChannel<TcpStream>;

impl TcpChannel {
    /// Wraps `stream`, recording its peer address for [`DuplexChannel::peer_address`].
    ///
    /// # Errors
    ///
    /// Returns the underlying [`io::Error`] if the peer address cannot be
    /// queried from the socket.
    pub fn from_tcp_stream(stream: TcpStream) -> io::Result<Self> {
        let addr = stream.peer_addr()?;
        Ok(Self::new(stream).with_peer_address(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Duplex {
        read: Cursor<Vec<u8>>,
        write: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_write_round_trip_and_count_bytes() {
        let duplex = Duplex { read: Cursor::new(vec![1, 2, 3, 4]), write: Vec::new() };
        let mut channel = GenericChannel::new(duplex);

        assert_eq!(channel.read_u32_le().unwrap(), u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(channel.bytes_read().total(), 4);

        channel.write_u8(9).unwrap();
        channel.flush().unwrap();
        assert_eq!(channel.inner().write, vec![9]);
        assert_eq!(channel.bytes_written().total(), 1);
    }

    #[test]
    fn truncated_read_is_premature_eof() {
        let duplex = Duplex { read: Cursor::new(vec![1]), write: Vec::new() };
        let mut channel = GenericChannel::new(duplex);
        let err = channel.read_u32_le().unwrap_err();
        assert!(matches!(err, ChannelError::PrematureEof));
    }

    #[test]
    fn skip_discards_requested_length() {
        let duplex = Duplex { read: Cursor::new(vec![0, 0, 0, 9]), write: Vec::new() };
        let mut channel = GenericChannel::new(duplex);
        channel.skip(3).unwrap();
        assert_eq!(channel.read_u8().unwrap(), 9);
    }
}
