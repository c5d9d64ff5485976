//! Tagged multiplex decorator over a [`DuplexChannel`].
//!
//! [`MultiplexChannel`] frames every outbound byte as a `DATA` frame and
//! demultiplexes inbound frames: `DATA` bytes feed the ordinary byte
//! stream (exposed through [`Readable`]/[`Writable`] and, for convenience,
//! [`std::io::Read`]/[`std::io::Write`]), while every other tag is queued
//! for retrieval via [`MultiplexChannel::next_message`].
//!
//! The auto-flush rule is implemented literally: before this channel ever
//! blocks on the underlying transport to satisfy a read, it flushes
//! whatever output is still buffered, unless the input side already holds
//! undelivered bytes from an earlier over-read. This is what prevents a
//! session's reader and writer from deadlocking against each other when
//! both sides are driven by the same thread.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::channel::{DuplexChannel, Readable, Writable};
use crate::error::ChannelError;
use crate::frame::{self, FrameReadError, MAX_FRAME_BODY_LEN};
use crate::tag::Tag;

/// One out-of-band message demultiplexed off the wire: a non-`DATA` tag
/// plus its body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// The frame's tag (never [`Tag::Data`] -- those bytes are folded into
    /// the in-band stream instead of becoming a [`Message`]).
    pub tag: Tag,
    /// The frame's body.
    pub body: Vec<u8>,
}

/// Tagged-multiplex decorator over a [`DuplexChannel`] `C`.
pub struct MultiplexChannel<C> {
    inner: C,
    write_buf: Vec<u8>,
    read_queue: VecDeque<u8>,
    pending: VecDeque<Message>,
}

impl<C: DuplexChannel> MultiplexChannel<C> {
    /// Wraps `inner`, enabling tagged-multiplex framing immediately (the
    /// `MUX_ON` transition happens before construction; this type only
    /// exists once multiplexing is active).
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            write_buf: Vec::new(),
            read_queue: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    /// Bytes queued for the next [`Writable::flush`] but not yet on the wire.
    #[must_use]
    pub fn pending_write_len(&self) -> usize {
        self.write_buf.len()
    }

    /// Sends `body` immediately as a tagged, non-`DATA` frame, flushing any
    /// buffered `DATA` bytes first so ordering is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault, or if `tag` is
    /// [`Tag::Data`] (that tag is reserved for the in-band stream) or the
    /// body exceeds the per-frame length limit.
    pub fn put_message(&mut self, tag: Tag, body: &[u8]) -> Result<(), ChannelError> {
        if tag.is_data() {
            return Err(ChannelError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "DATA is reserved for the in-band byte stream",
            )));
        }
        self.flush_data_frame()?;
        for chunk in chunk_body(body) {
            frame::write_header(&mut self.inner, tag, chunk.len() as u32)?;
            self.inner.write_bytes(chunk)?;
        }
        self.inner.flush()
    }

    /// Returns the next out-of-band message, reading and demultiplexing
    /// frames until one is found or the stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] on any transport fault, or a protocol
    /// error surfaced as [`ChannelError::Io`] if a frame's tag byte is
    /// unrecognized.
    pub fn next_message(&mut self) -> Result<Option<Message>, ChannelError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if !self.demux_one_frame()? {
                return Ok(None);
            }
        }
    }

    /// Flushes buffered `DATA` bytes as one or more framed writes, then
    /// flushes the underlying transport.
    fn flush_data_frame(&mut self) -> Result<(), ChannelError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let body = std::mem::take(&mut self.write_buf);
        for chunk in chunk_body(&body) {
            frame::write_header(&mut self.inner, Tag::Data, chunk.len() as u32)?;
            self.inner.write_bytes(chunk)?;
        }
        self.inner.flush()
    }

    /// Reads and demultiplexes one frame from the transport, appending its
    /// body to `read_queue` (if `DATA`) or `pending` (otherwise). Returns
    /// `false` only if the peer closed cleanly before any frame arrived.
    fn demux_one_frame(&mut self) -> Result<bool, ChannelError> {
        self.flush_data_frame()?;

        let header = match frame::read_header(&mut self.inner) {
            Ok(header) => header,
            Err(FrameReadError::Channel(ChannelError::PrematureEof)) => return Ok(false),
            Err(FrameReadError::Channel(e)) => return Err(e),
            Err(FrameReadError::Protocol(e)) => {
                return Err(ChannelError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
            }
        };

        let mut body = vec![0u8; header.length as usize];
        self.inner.read_bytes(&mut body)?;

        if header.tag.is_data() {
            self.read_queue.extend(body);
        } else {
            self.pending.push_back(Message { tag: header.tag, body });
        }
        Ok(true)
    }

    /// Ensures at least one more byte is available in `read_queue`,
    /// demultiplexing frames (and auto-flushing first) until one arrives
    /// or the transport is exhausted.
    fn fill_read_queue(&mut self) -> Result<bool, ChannelError> {
        while self.read_queue.is_empty() {
            if !self.demux_one_frame()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Closes both halves: flushes any buffered `DATA`, then closes the
    /// inner channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the flush step fails; an error while
    /// closing the inner channel is attached to that error rather than
    /// replacing it.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        let flush_result = self.flush_data_frame();
        let close_result = self.inner.close();
        match (flush_result, close_result) {
            (Ok(()), result) => result,
            (Err(e), _) => Err(e),
        }
    }

    /// Consumes the decorator, returning the underlying channel.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

fn chunk_body(body: &[u8]) -> impl Iterator<Item = &[u8]> {
    body.chunks(MAX_FRAME_BODY_LEN as usize)
}

impl<C: DuplexChannel> Readable for MultiplexChannel<C> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        for slot in buf.iter_mut() {
            if !self.fill_read_queue()? {
                return Err(ChannelError::PrematureEof);
            }
            *slot = self.read_queue.pop_front().expect("queue just confirmed non-empty");
        }
        Ok(())
    }
}

impl<C: DuplexChannel> Writable for MultiplexChannel<C> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.write_buf.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.flush_data_frame()
    }
}

impl<C: DuplexChannel> Read for MultiplexChannel<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.fill_read_queue().map_err(to_io_error)? {
            return Ok(0);
        }
        let n = buf.len().min(self.read_queue.len());
        for slot in &mut buf[..n] {
            *slot = self.read_queue.pop_front().expect("bounded by queue length");
        }
        Ok(n)
    }
}

impl<C: DuplexChannel> Write for MultiplexChannel<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_data_frame().map_err(to_io_error)
    }
}

fn to_io_error(err: ChannelError) -> io::Error {
    match err {
        ChannelError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::GenericChannel;
    use std::collections::VecDeque as Deque;
    use std::io::Cursor;

    /// An in-memory duplex pairing two byte buffers, for testing a
    /// [`MultiplexChannel`] without a real socket.
    struct LoopDuplex {
        read: Cursor<Vec<u8>>,
        write: Vec<u8>,
    }

    impl Read for LoopDuplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for LoopDuplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel_with_frames(frames: Vec<(Tag, Vec<u8>)>) -> MultiplexChannel<GenericChannel<LoopDuplex>> {
        let mut wire = Vec::new();
        for (tag, body) in frames {
            frame::write_header(&mut wire, tag, body.len() as u32).unwrap();
            wire.extend_from_slice(&body);
        }
        let duplex = LoopDuplex { read: Cursor::new(wire), write: Vec::new() };
        MultiplexChannel::new(GenericChannel::new(duplex))
    }

    #[test]
    fn data_frames_feed_the_in_band_stream() {
        let mut channel = channel_with_frames(vec![(Tag::Data, vec![1, 2, 3])]);
        let mut buf = [0u8; 3];
        channel.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn non_data_frames_are_queued_as_messages() {
        let mut channel = channel_with_frames(vec![
            (Tag::Info, b"hello".to_vec()),
            (Tag::Data, vec![9]),
        ]);
        let message = channel.next_message().unwrap().unwrap();
        assert_eq!(message.tag, Tag::Info);
        assert_eq!(message.body, b"hello");

        let mut buf = [0u8; 1];
        channel.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [9]);
    }

    #[test]
    fn messages_interleaved_with_data_are_all_recovered() {
        let mut channel = channel_with_frames(vec![
            (Tag::Data, vec![1]),
            (Tag::Warning, b"careful".to_vec()),
            (Tag::Data, vec![2]),
        ]);
        let mut buf = [0u8; 2];
        channel.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);

        let message = channel.next_message().unwrap().unwrap();
        assert_eq!(message.tag, Tag::Warning);
    }

    #[test]
    fn write_then_flush_emits_a_single_data_frame() {
        let duplex = LoopDuplex { read: Cursor::new(Vec::new()), write: Vec::new() };
        let mut channel = MultiplexChannel::new(GenericChannel::new(duplex));
        channel.write_bytes(b"payload").unwrap();
        assert_eq!(channel.pending_write_len(), 7);
        Writable::flush(&mut channel).unwrap();
        assert_eq!(channel.pending_write_len(), 0);

        let mut decoded = Deque::new();
        let wire = channel.into_inner().into_inner();
        let mut cursor = Cursor::new(wire.write);
        let header = frame::read_header(&mut cursor).unwrap();
        assert_eq!(header.tag, Tag::Data);
        let mut body = vec![0u8; header.length as usize];
        std::io::Read::read_exact(&mut cursor, &mut body).unwrap();
        decoded.push_back(body);
        assert_eq!(decoded.pop_front().unwrap(), b"payload");
    }

    #[test]
    fn put_message_flushes_pending_data_first_to_preserve_ordering() {
        let duplex = LoopDuplex { read: Cursor::new(Vec::new()), write: Vec::new() };
        let mut channel = MultiplexChannel::new(GenericChannel::new(duplex));
        channel.write_bytes(b"lit").unwrap();
        channel.put_message(Tag::Error, b"boom").unwrap();

        let wire = channel.into_inner().into_inner().write;
        let mut cursor = Cursor::new(wire);
        let first = frame::read_header(&mut cursor).unwrap();
        assert_eq!(first.tag, Tag::Data);
        let mut skip = vec![0u8; first.length as usize];
        std::io::Read::read_exact(&mut cursor, &mut skip).unwrap();

        let second = frame::read_header(&mut cursor).unwrap();
        assert_eq!(second.tag, Tag::Error);
    }

    #[test]
    fn reading_past_end_of_stream_is_premature_eof() {
        let mut channel = channel_with_frames(vec![(Tag::Data, vec![1])]);
        let mut buf = [0u8; 2];
        let err = channel.read_bytes(&mut buf).unwrap_err();
        assert!(matches!(err, ChannelError::PrematureEof));
    }

    #[test]
    fn io_read_returns_zero_at_clean_end_of_stream() {
        let mut channel = channel_with_frames(vec![(Tag::Data, vec![1])]);
        let mut buf = [0u8; 1];
        assert_eq!(Read::read(&mut channel, &mut buf).unwrap(), 1);
        assert_eq!(Read::read(&mut channel, &mut buf).unwrap(), 0);
    }

    #[test]
    fn put_message_rejects_data_tag() {
        let duplex = LoopDuplex { read: Cursor::new(Vec::new()), write: Vec::new() };
        let mut channel = MultiplexChannel::new(GenericChannel::new(duplex));
        let err = channel.put_message(Tag::Data, b"x").unwrap_err();
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
