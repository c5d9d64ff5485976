//! Wire serialization of file-list entries.
//!
//! Each entry is emitted as a delta against the previous one: an `xflags`
//! bitmask says which fields are unchanged (and therefore omitted), the
//! name is split into a shared prefix length plus a literal suffix, and
//! the list ends with a single `0x00` terminator byte. `xflags` is never
//! allowed to be the all-zero byte on a real entry -- when every bit would
//! naturally be clear, the encoder forces [`EXTENDED_FLAGS`] on and writes
//! an empty extension byte -- which is what keeps `0x00` unambiguous as
//! the terminator.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::entry::{Attrs, FileInfo, Kind};

const TOP_DIR: u8 = 1 << 0;
const SAME_MODE: u8 = 1 << 1;
const SAME_UID: u8 = 1 << 2;
const SAME_GID: u8 = 1 << 3;
const SAME_NAME_PREFIX: u8 = 1 << 4;
const SAME_MTIME: u8 = 1 << 5;
const RDEV_MAJOR: u8 = 1 << 6;
const EXTENDED_FLAGS: u8 = 1 << 7;

const EXT_NAME_LONG: u8 = 1 << 0;

/// Errors raised while encoding or decoding the file-list wire format.
#[derive(Debug, Error)]
pub enum WireError {
    /// The underlying stream failed.
    #[error("file list I/O error: {0}")]
    Io(#[from] io::Error),
    /// The stream ended before a complete entry could be read.
    #[error("file list entry truncated")]
    Truncated,
    /// A symlink entry had no target text where one was required.
    #[error("symlink entry is missing its target text")]
    MissingSymlinkTarget,
}

struct PrevState {
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
    name: Vec<u8>,
}

/// Stateful encoder for a stream of [`FileInfo`] entries, tracking the
/// previous entry so each new one can be delta-encoded against it.
#[derive(Default)]
pub struct Encoder {
    prev: Option<PrevState>,
}

impl Encoder {
    /// Creates an encoder with no prior entry.
    #[must_use]
    pub fn new() -> Self {
        Self { prev: None }
    }

    /// Encodes one entry onto `out`, updating internal delta state.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Io`] if `out` rejects the write, or
    /// [`WireError::MissingSymlinkTarget`] if `entry` claims to be a
    /// symlink but carries no target text.
    pub fn encode<W: Write>(&mut self, entry: &FileInfo, out: &mut W) -> Result<(), WireError> {
        let attrs = entry.attrs();
        let name = entry.raw_name_bytes();

        let mut flags = 0u8;
        if entry.is_root_marker() {
            flags |= TOP_DIR;
        }

        let common_prefix_len = self
            .prev
            .as_ref()
            .map(|p| common_prefix_len(&p.name, name))
            .unwrap_or(0)
            .min(255);
        if common_prefix_len > 0 {
            flags |= SAME_NAME_PREFIX;
        }

        let same_mode = self.prev.as_ref().is_some_and(|p| p.mode == attrs.mode);
        let same_uid = self.prev.as_ref().is_some_and(|p| p.uid == attrs.uid);
        let same_gid = self.prev.as_ref().is_some_and(|p| p.gid == attrs.gid);
        let same_mtime = self.prev.as_ref().is_some_and(|p| p.mtime == attrs.mtime);
        if same_mode {
            flags |= SAME_MODE;
        }
        if same_uid {
            flags |= SAME_UID;
        }
        if same_gid {
            flags |= SAME_GID;
        }
        if same_mtime {
            flags |= SAME_MTIME;
        }

        let suffix = &name[common_prefix_len..];
        let name_long = suffix.len() >= 0xFF;

        let is_device = matches!(entry.kind(), Kind::Device { .. });
        if is_device {
            flags |= RDEV_MAJOR;
        }

        if name_long {
            flags |= EXTENDED_FLAGS;
        }
        if flags == 0 {
            // Reserve the all-zero byte for the terminator: force an
            // (empty) extension rather than ever emit a bare 0x00 flags
            // byte for a real entry.
            flags = EXTENDED_FLAGS;
        }

        out.write_all(&[flags])?;
        if flags & EXTENDED_FLAGS != 0 {
            let mut ext = 0u8;
            if name_long {
                ext |= EXT_NAME_LONG;
            }
            out.write_all(&[ext])?;
        }

        if common_prefix_len > 0 {
            out.write_all(&[common_prefix_len as u8])?;
        }
        if name_long {
            out.write_all(&(suffix.len() as u32).to_le_bytes())?;
        } else {
            out.write_all(&[suffix.len() as u8])?;
        }
        out.write_all(suffix)?;

        if !same_mode {
            out.write_all(&attrs.mode.to_le_bytes())?;
        }
        if !same_uid {
            out.write_all(&attrs.uid.to_le_bytes())?;
        }
        if !same_gid {
            out.write_all(&attrs.gid.to_le_bytes())?;
        }
        if !same_mtime {
            out.write_all(&attrs.mtime.to_le_bytes())?;
        }

        encode_size(attrs.size, out)?;

        match entry.kind() {
            Kind::Device { major, minor, .. } => {
                out.write_all(&major.to_le_bytes())?;
                out.write_all(&minor.to_le_bytes())?;
            }
            Kind::Symlink(target) => {
                let bytes = target.as_bytes();
                encode_size(bytes.len() as u64, out)?;
                out.write_all(bytes)?;
            }
            _ => {}
        }

        self.prev = Some(PrevState {
            mode: attrs.mode,
            uid: attrs.uid,
            gid: attrs.gid,
            mtime: attrs.mtime,
            name: name.to_vec(),
        });
        Ok(())
    }

    /// Writes the list terminator.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Io`] if `out` rejects the write.
    pub fn finish<W: Write>(self, out: &mut W) -> Result<(), WireError> {
        out.write_all(&[0u8])?;
        Ok(())
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn encode_size<W: Write>(size: u64, out: &mut W) -> Result<(), WireError> {
    if size < 0xFF {
        out.write_all(&[size as u8])?;
    } else if size < 0xFFFF {
        out.write_all(&[0xFF])?;
        out.write_all(&(size as u16).to_le_bytes())?;
    } else {
        out.write_all(&[0xFF])?;
        out.write_all(&0xFFFFu16.to_le_bytes())?;
        out.write_all(&size.to_le_bytes())?;
    }
    Ok(())
}

fn decode_size<R: Read>(input: &mut R) -> Result<u64, WireError> {
    let first = read_byte(input)?;
    if first != 0xFF {
        return Ok(u64::from(first));
    }
    let marker = read_u16(input)?;
    if marker != 0xFFFF {
        return Ok(u64::from(marker));
    }
    read_u64(input)
}

fn read_byte<R: Read>(input: &mut R) -> Result<u8, WireError> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf).map_err(|e| map_eof(e))?;
    Ok(buf[0])
}

fn read_u16<R: Read>(input: &mut R) -> Result<u16, WireError> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf).map_err(|e| map_eof(e))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).map_err(|e| map_eof(e))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64<R: Read>(input: &mut R) -> Result<i64, WireError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).map_err(|e| map_eof(e))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_u64<R: Read>(input: &mut R) -> Result<u64, WireError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).map_err(|e| map_eof(e))?;
    Ok(u64::from_le_bytes(buf))
}

fn map_eof(e: io::Error) -> WireError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        WireError::Truncated
    } else {
        WireError::Io(e)
    }
}

/// Stateful decoder, the mirror image of [`Encoder`].
#[derive(Default)]
pub struct Decoder {
    prev: Option<PrevState>,
}

/// Outcome of decoding one slot of the wire stream.
pub enum DecodeOutcome {
    /// A complete entry plus whether it was marked as a top-level/dir entry.
    Entry(FileInfo),
    /// The terminator byte was read; the list is complete.
    End,
}

impl Decoder {
    /// Creates a decoder with no prior entry.
    #[must_use]
    pub fn new() -> Self {
        Self { prev: None }
    }

    /// Reads the next entry (or the terminator) from `input`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] if the stream ends mid-entry, or
    /// [`WireError::Io`] on any other read failure.
    pub fn decode<R: Read>(&mut self, input: &mut R) -> Result<DecodeOutcome, WireError> {
        let flags = read_byte(input)?;
        if flags == 0 {
            return Ok(DecodeOutcome::End);
        }

        let ext = if flags & EXTENDED_FLAGS != 0 { read_byte(input)? } else { 0 };
        let name_long = ext & EXT_NAME_LONG != 0;

        let common_prefix_len =
            if flags & SAME_NAME_PREFIX != 0 { usize::from(read_byte(input)?) } else { 0 };
        let suffix_len =
            if name_long { read_u32(input)? as usize } else { usize::from(read_byte(input)?) };
        let mut suffix = vec![0u8; suffix_len];
        input.read_exact(&mut suffix).map_err(map_eof)?;

        let mut name = Vec::with_capacity(common_prefix_len + suffix_len);
        if let Some(prev) = &self.prev {
            name.extend_from_slice(&prev.name[..common_prefix_len.min(prev.name.len())]);
        }
        name.extend_from_slice(&suffix);

        let mode = if flags & SAME_MODE != 0 {
            self.prev.as_ref().map_or(0, |p| p.mode)
        } else {
            read_u32(input)?
        };
        let uid = if flags & SAME_UID != 0 {
            self.prev.as_ref().map_or(0, |p| p.uid)
        } else {
            read_u32(input)?
        };
        let gid = if flags & SAME_GID != 0 {
            self.prev.as_ref().map_or(0, |p| p.gid)
        } else {
            read_u32(input)?
        };
        let mtime = if flags & SAME_MTIME != 0 {
            self.prev.as_ref().map_or(0, |p| p.mtime)
        } else {
            read_i64(input)?
        };

        let size = decode_size(input)?;

        let is_dir = mode_is_dir(mode);
        let kind = if flags & RDEV_MAJOR != 0 {
            let major = read_u32(input)?;
            let minor = read_u32(input)?;
            Kind::Device { character: mode_is_chardev(mode), major, minor }
        } else if mode_is_symlink(mode) {
            let len = decode_size(input)? as usize;
            let mut target = vec![0u8; len];
            input.read_exact(&mut target).map_err(map_eof)?;
            Kind::Symlink(String::from_utf8_lossy(&target).into_owned())
        } else if is_dir {
            Kind::Directory
        } else if mode_is_fifo(mode) {
            Kind::Fifo
        } else if mode_is_socket(mode) {
            Kind::Socket
        } else {
            Kind::Regular
        };

        let path_name = String::from_utf8_lossy(&name).into_owned();
        let attrs = Attrs { mode, mtime, size, uid, gid, user_name: None, group_name: None };
        let entry = FileInfo::new(path_name, kind, attrs);

        self.prev = Some(PrevState { mode, uid, gid, mtime, name });
        Ok(DecodeOutcome::Entry(entry))
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const S_IFLNK: u32 = 0o120000;
const S_IFSOCK: u32 = 0o140000;

fn mode_is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

fn mode_is_symlink(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

fn mode_is_chardev(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}

fn mode_is_fifo(mode: u32) -> bool {
    mode & S_IFMT == S_IFIFO
}

fn mode_is_socket(mode: u32) -> bool {
    mode & S_IFMT == S_IFSOCK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Attrs;

    fn attrs(mode: u32, size: u64) -> Attrs {
        Attrs { mode, mtime: 1_700_000_000, size, uid: 1000, gid: 1000, user_name: None, group_name: None }
    }

    fn decode_all(bytes: &[u8]) -> Vec<FileInfo> {
        let mut decoder = Decoder::new();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut out = Vec::new();
        loop {
            match decoder.decode(&mut cursor).unwrap() {
                DecodeOutcome::Entry(e) => out.push(e),
                DecodeOutcome::End => break,
            }
        }
        out
    }

    #[test]
    fn round_trips_a_small_file_list() {
        let entries = vec![
            FileInfo::new(".", Kind::Directory, attrs(S_IFDIR | 0o755, 0)),
            FileInfo::new("alpha.txt", Kind::Regular, attrs(0o100644, 42)),
            FileInfo::new("beta", Kind::Directory, attrs(S_IFDIR | 0o755, 0)),
            FileInfo::new("beta/gamma.txt", Kind::Regular, attrs(0o100644, 9000)),
        ];

        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        for entry in &entries {
            encoder.encode(entry, &mut buf).unwrap();
        }
        encoder.finish(&mut buf).unwrap();

        let decoded = decode_all(&buf);
        assert_eq!(decoded.len(), entries.len());
        for (original, round_tripped) in entries.iter().zip(decoded.iter()) {
            assert_eq!(original.path_name(), round_tripped.path_name());
            assert_eq!(original.attrs().size, round_tripped.attrs().size);
        }
    }

    #[test]
    fn terminator_is_a_single_zero_byte() {
        let mut buf = Vec::new();
        let encoder = Encoder::new();
        encoder.finish(&mut buf).unwrap();
        assert_eq!(buf, vec![0u8]);
    }

    #[test]
    fn flags_byte_is_never_zero_for_a_real_entry() {
        // An entry with no shared prefix and no other flag opportunity
        // (first entry transmitted) must still avoid the all-zero byte.
        let entry = FileInfo::new("solo", Kind::Regular, attrs(0o100644, 0));
        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        encoder.encode(&entry, &mut buf).unwrap();
        assert_ne!(buf[0], 0);
    }

    #[test]
    fn large_size_round_trips_through_eight_byte_path() {
        let entry = FileInfo::new("huge.bin", Kind::Regular, attrs(0o100644, 5_000_000_000));
        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        encoder.encode(&entry, &mut buf).unwrap();
        encoder.finish(&mut buf).unwrap();

        let decoded = decode_all(&buf);
        assert_eq!(decoded[0].attrs().size, 5_000_000_000);
    }

    #[test]
    fn symlink_target_round_trips() {
        let entry =
            FileInfo::new("link", Kind::Symlink("../elsewhere".to_owned()), attrs(S_IFLNK | 0o777, 0));
        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        encoder.encode(&entry, &mut buf).unwrap();
        encoder.finish(&mut buf).unwrap();

        let decoded = decode_all(&buf);
        assert!(matches!(decoded[0].kind(), Kind::Symlink(t) if t == "../elsewhere"));
    }

    #[test]
    fn fifo_and_socket_kinds_round_trip_distinctly() {
        let entries = vec![
            FileInfo::new("pipe", Kind::Fifo, attrs(S_IFIFO | 0o644, 0)),
            FileInfo::new("sock", Kind::Socket, attrs(S_IFSOCK | 0o644, 0)),
        ];
        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        for entry in &entries {
            encoder.encode(entry, &mut buf).unwrap();
        }
        encoder.finish(&mut buf).unwrap();

        let decoded = decode_all(&buf);
        assert!(matches!(decoded[0].kind(), Kind::Fifo));
        assert!(matches!(decoded[1].kind(), Kind::Socket));
    }

    #[test]
    fn chardev_and_blockdev_are_distinguished_on_decode() {
        let entries = vec![
            FileInfo::new(
                "ttyS0",
                Kind::Device { character: true, major: 4, minor: 64 },
                attrs(S_IFCHR | 0o660, 0),
            ),
            FileInfo::new(
                "sda",
                Kind::Device { character: false, major: 8, minor: 0 },
                attrs(0o060000 | 0o660, 0),
            ),
        ];
        let mut buf = Vec::new();
        let mut encoder = Encoder::new();
        for entry in &entries {
            encoder.encode(entry, &mut buf).unwrap();
        }
        encoder.finish(&mut buf).unwrap();

        let decoded = decode_all(&buf);
        assert!(matches!(decoded[0].kind(), Kind::Device { character: true, major: 4, minor: 64 }));
        assert!(matches!(decoded[1].kind(), Kind::Device { character: false, major: 8, minor: 0 }));
    }

    #[test]
    fn decode_rejects_truncated_stream() {
        let mut decoder = Decoder::new();
        let mut cursor = std::io::Cursor::new(&[0x20u8][..]);
        let err = decoder.decode(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::Truncated));
    }
}
