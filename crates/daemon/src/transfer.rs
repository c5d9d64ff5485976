//! Sender and receiver roles of the per-file delta protocol, driven
//! once the session has reached `MUX_ON`.
//!
//! Whichever end holds the prior content always initiates a file's exchange
//! by sending its [`ChecksumHeader`] and chunk list; the matching side of the
//! exchange needs no basis data at all. This module therefore has two entry points,
//! [`run_as_receiver`] and [`run_as_sender`], rather than one function
//! branching internally: the file-list direction and the per-file checksum
//! direction are always opposite ends of the same session.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use thiserror::Error;

use checksums::strong::{Md5, StrongDigest};
use flist::{enumerate_module, DecodeOutcome, Decoder, Encoder, FileInfo, Kind, WalkError, WireError};
use matching::{
    apply_delta, generate_delta, ChecksumHeader, ChecksumTable, DeltaError, DeltaScript, HeaderError,
    MatchError, StrongAlgorithm, TableError,
};
use protocol::channel::DuplexChannel;
use protocol::delta_wire::{
    read_chunks, read_delta_script, read_header, table_from_wire, write_chunks, write_delta_script,
    write_header, DeltaWireError,
};
use protocol::multiplex::MultiplexChannel;
use protocol::tag::Tag;
use restricted_path::{RestrictedPath, SecurityError};

/// Strong-digest algorithm this implementation uses for file content,
/// distinct from [`crate::auth::DaemonAuthDigest`]'s negotiable choice for
/// challenge/response authentication; content checksums are always MD5.
const CONTENT_DIGEST: StrongAlgorithm = StrongAlgorithm::Md5;
/// Truncation length applied to every block and whole-file digest.
const DIGEST_LENGTH: u8 = 16;
/// A file's basis is never split into blocks smaller than this, matching the
/// conventional floor upstream rsync uses to keep tiny files from producing
/// one chunk per byte.
const MIN_BLOCK_LENGTH: u32 = 700;
/// A whole-file digest mismatch is retried exactly once before the file is
/// abandoned.
const MAX_ATTEMPTS: u32 = 2;

/// Errors raised while driving either role of the delta protocol.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A transport fault on the multiplexed channel.
    #[error(transparent)]
    Channel(#[from] protocol::ChannelError),
    /// The file-list wire codec rejected a malformed entry.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Enumerating the module root failed.
    #[error(transparent)]
    Walk(#[from] WalkError),
    /// The delta-protocol wire codec rejected a malformed header, chunk
    /// list, or token stream.
    #[error(transparent)]
    DeltaWire(#[from] DeltaWireError),
    /// Building or reconstructing a checksum table failed.
    #[error(transparent)]
    Table(#[from] TableError),
    /// A checksum header violated an invariant.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Generating a delta script failed.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// Applying a delta script against a basis file failed.
    #[error(transparent)]
    Delta(#[from] DeltaError),
    /// A path sent by the peer escaped its module's sandbox.
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// A local filesystem operation (read, write, rename, chmod) failed.
    #[error("filesystem error on {path}: {source}")]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A transport-level read/write/flush on the multiplexed channel itself
    /// failed, outside of the structured [`protocol::ChannelError`] wrapper
    /// (the wire helpers in [`protocol::delta_wire`] that write directly via
    /// `std::io::Write` surface plain [`std::io::Error`]).
    #[error("transport I/O error: {0}")]
    ChannelIo(#[from] std::io::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io { path: path.to_path_buf(), source }
}

/// Picks a basis block length for a file of `size` bytes: the classic
/// square-root heuristic, floored at [`MIN_BLOCK_LENGTH`] and capped at
/// [`matching::header::MAX_BLOCK_LENGTH`] (re-exported by `matching` as
/// [`matching::MAX_BLOCK_LENGTH`]).
fn block_length_for_size(size: u64) -> u32 {
    if size == 0 {
        return 0;
    }
    let ideal = (size as f64).sqrt() as u64;
    ideal.clamp(u64::from(MIN_BLOCK_LENGTH), u64::from(matching::MAX_BLOCK_LENGTH)) as u32
}

fn whole_file_digest(data: &[u8]) -> Vec<u8> {
    Md5::truncated(data, DIGEST_LENGTH as usize)
}

/// Drives the receiver role: reads the incoming file list, materializes
/// directories and symlinks directly, and runs the checksum-header/apply
/// cycle (with one retry) for every regular file.
///
/// `deferred_write` selects how a regular file's reconstructed content
/// reaches disk: `true` buffers the whole file in memory and writes it only
/// once the whole-file digest has been confirmed (the historical
/// `--delay-updates`-style behavior); `false`, the default, writes each
/// token to the temporary output path as `apply_delta` produces it, hashing
/// the bytes as they are written rather than re-reading them afterward.
///
/// # Errors
///
/// Returns [`TransferError`] on any transport, wire-codec, or filesystem
/// failure. A single file's whole-file digest mismatch survives one retry
/// and is then reported to the peer without aborting the session; every
/// other failure is session-fatal.
pub fn run_as_receiver<C: DuplexChannel>(
    mux: &mut MultiplexChannel<C>,
    resolver: &RestrictedPath,
    deferred_write: bool,
) -> Result<(), TransferError> {
    let mut decoder = Decoder::new();
    loop {
        match decoder.decode(mux)? {
            DecodeOutcome::End => break,
            DecodeOutcome::Entry(entry) => receive_entry(mux, resolver, &entry, deferred_write)?,
        }
    }
    mux.put_message(Tag::Success, b"")?;
    Ok(())
}

fn receive_entry<C: DuplexChannel>(
    mux: &mut MultiplexChannel<C>,
    resolver: &RestrictedPath,
    entry: &FileInfo,
    deferred_write: bool,
) -> Result<(), TransferError> {
    let resolved = resolver.resolve(entry.path_name())?;
    let target = resolved.path();

    match entry.kind() {
        Kind::Directory => {
            fs::create_dir_all(target).map_err(|e| io_err(target, e))?;
        }
        Kind::Symlink(link_target) => {
            create_symlink(link_target, target)?;
        }
        Kind::Device { .. } | Kind::Fifo | Kind::Socket => {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %target.display(), "skipping creation of special file");
        }
        Kind::Regular => receive_regular_file(mux, target, entry, deferred_write)?,
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_target: &str, target: &Path) -> Result<(), TransferError> {
    if target.exists() || target.symlink_metadata().is_ok() {
        let _ = fs::remove_file(target);
    }
    std::os::unix::fs::symlink(link_target, target).map_err(|e| io_err(target, e))
}

#[cfg(not(unix))]
fn create_symlink(_link_target: &str, _target: &Path) -> Result<(), TransferError> {
    Ok(())
}

fn receive_regular_file<C: DuplexChannel>(
    mux: &mut MultiplexChannel<C>,
    target: &Path,
    entry: &FileInfo,
    deferred_write: bool,
) -> Result<(), TransferError> {
    let basis = fs::read(target).unwrap_or_default();
    let block_length = block_length_for_size(basis.len() as u64);

    for attempt in 1..=MAX_ATTEMPTS {
        let table = ChecksumTable::build(Cursor::new(&basis), block_length, CONTENT_DIGEST, DIGEST_LENGTH)?;
        let header = *table.header().expect("build always sets a header");
        write_header(mux, &header)?;
        write_chunks(mux, &table.chunks_with_rolling())?;
        mux.flush()?;

        let script = read_delta_script(mux, &header)?;
        let tmp_path = temp_path_for(target);
        let reconstructed_digest = if deferred_write {
            let mut reconstructed = Vec::new();
            apply_delta(&mut Cursor::new(&basis), &mut reconstructed, &table, &script)?;
            let digest = whole_file_digest(&reconstructed);
            fs::write(&tmp_path, &reconstructed).map_err(|e| io_err(&tmp_path, e))?;
            digest
        } else {
            apply_delta_incrementally(&basis, &table, &script, &tmp_path)?
        };

        let mut peer_digest = vec![0u8; DIGEST_LENGTH as usize];
        mux.read_exact(&mut peer_digest)?;

        if reconstructed_digest == peer_digest {
            apply_attrs(&tmp_path, entry)?;
            fs::rename(&tmp_path, target).map_err(|e| io_err(target, e))?;
            mux.put_message(Tag::Success, entry.raw_name_bytes())?;
            return Ok(());
        }
        let _ = fs::remove_file(&tmp_path);

        // The first mismatch is a retry signal the sender recognizes by its
        // body matching the file's own name exactly; the final one carries a
        // distinct, descriptive body so the sender knows to give up instead.
        if attempt == MAX_ATTEMPTS {
            let message = format!("checksum mismatch reconstructing {}", entry.path_name());
            mux.put_message(Tag::ErrorXfer, message.as_bytes())?;
        } else {
            mux.put_message(Tag::ErrorXfer, entry.raw_name_bytes())?;
        }
    }
    Ok(())
}

fn temp_path_for(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let nonce = rand::random::<u64>();
    parent.join(format!(".~tmp~{nonce:x}"))
}

/// Applies `script` against `basis`, writing each token straight to
/// `tmp_path` instead of an in-memory buffer, and hashes the bytes as they
/// are written so the whole-file digest never requires a second pass over
/// the reconstructed content.
fn apply_delta_incrementally(
    basis: &[u8],
    table: &ChecksumTable,
    script: &DeltaScript,
    tmp_path: &Path,
) -> Result<Vec<u8>, TransferError> {
    let file = fs::File::create(tmp_path).map_err(|e| io_err(tmp_path, e))?;
    let mut writer = DigestingWriter::new(file);
    apply_delta(&mut Cursor::new(basis), &mut writer, table, script)?;
    writer.flush().map_err(|e| io_err(tmp_path, e))?;
    Ok(writer.finalize())
}

/// A [`Write`] adapter that feeds every byte it forwards into a running
/// [`Md5`] digest, so a receiver writing incrementally never has to re-read
/// what it just wrote to compute the whole-file checksum.
struct DigestingWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> DigestingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, hasher: Md5::new() }
    }

    fn finalize(self) -> Vec<u8> {
        let digest = self.hasher.finalize();
        digest.as_ref()[..DIGEST_LENGTH as usize].to_vec()
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(unix)]
fn apply_attrs(path: &Path, entry: &FileInfo) -> Result<(), TransferError> {
    use std::os::unix::fs::PermissionsExt;

    let attrs = entry.attrs();
    fs::set_permissions(path, fs::Permissions::from_mode(attrs.mode & 0o7777))
        .map_err(|e| io_err(path, e))?;

    let modified = UNIX_EPOCH + Duration::from_secs(attrs.mtime.max(0) as u64);
    let times = fs::FileTimes::new().set_modified(modified);
    let file = fs::OpenOptions::new().write(true).open(path).map_err(|e| io_err(path, e))?;
    file.set_times(times).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_attrs(_path: &Path, _entry: &FileInfo) -> Result<(), TransferError> {
    Ok(())
}

/// Drives the sender role: enumerates `root`, transmits its file list, then
/// answers each peer-initiated checksum exchange with a generated delta and
/// whole-file digest, retrying a file the peer reports as mismatched once.
///
/// # Errors
///
/// Returns [`TransferError`] on any transport, wire-codec, or filesystem
/// failure.
pub fn run_as_sender<C: DuplexChannel>(mux: &mut MultiplexChannel<C>, root: &Path) -> Result<(), TransferError> {
    let entries = enumerate_module(root)?;
    let mut encoder = Encoder::new();
    for entry in &entries {
        encoder.encode(entry, mux)?;
    }
    encoder.finish(mux)?;
    mux.flush()?;

    for entry in &entries {
        if matches!(entry.kind(), Kind::Regular) {
            send_regular_file(mux, root, entry)?;
        }
    }

    mux.put_message(Tag::Success, b"")?;
    Ok(())
}

fn send_regular_file<C: DuplexChannel>(
    mux: &mut MultiplexChannel<C>,
    root: &Path,
    entry: &FileInfo,
) -> Result<(), TransferError> {
    let path = root.join(entry.as_path_buf());
    let content = fs::read(&path).map_err(|e| io_err(&path, e))?;

    loop {
        let header = read_header(mux)?;
        let chunks = read_chunks(mux, header.chunk_count(), header.digest_length())?;
        let table = table_from_wire(header, chunks);

        let script = generate_delta(&content, &table, CONTENT_DIGEST)?;
        write_delta_script(mux, &script)?;
        mux.write_all(&whole_file_digest(&content))?;
        mux.flush()?;

        let Some(message) = mux.next_message()? else {
            return Ok(());
        };
        // A retry request for this same file echoes its own name exactly;
        // any other body on `ErrorXfer` (the descriptive final-failure
        // message) or any other tag (`Success`) ends this file's exchange.
        if message.tag != Tag::ErrorXfer || message.body != entry.raw_name_bytes() {
            return Ok(());
        }
    }
}
