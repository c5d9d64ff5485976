//! The file-list entry type and the metadata it carries.

use std::path::PathBuf;

/// Kind of filesystem object a [`FileInfo`] describes.
///
/// Devices, sockets, and FIFOs are reported (mode bits only) but carry no
/// content; symlinks are reported with their target text but are never
/// followed during traversal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Kind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link, carrying its unresolved target text.
    Symlink(String),
    /// A block or character device, carrying its major/minor numbers.
    Device {
        /// Whether this is a character device (`false` = block device).
        character: bool,
        /// Device major number.
        major: u32,
        /// Device minor number.
        minor: u32,
    },
    /// A named pipe (FIFO).
    Fifo,
    /// A Unix domain socket.
    Socket,
}

impl Kind {
    /// Whether this entry is a directory.
    #[must_use]
    pub const fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Per-entry attributes carried alongside a [`FileInfo`]'s name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attrs {
    /// Unix permission and type bits (`st_mode`).
    pub mode: u32,
    /// Last-modified time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Content length in bytes; zero for directories and special files.
    pub size: u64,
    /// Numeric owner id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
    /// Resolved owner name, when the peer negotiated name transmission.
    pub user_name: Option<String>,
    /// Resolved group name, when the peer negotiated name transmission.
    ///
    /// Names are treated as raw bytes and are
    /// never subject to the negotiated filename charset: only path names
    /// go through that conversion.
    pub group_name: Option<String>,
}

/// One entry of a file list: a textual path, its raw wire-format name
/// bytes, its kind, and its attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    path_name: String,
    raw_name_bytes: Vec<u8>,
    kind: Kind,
    attrs: Attrs,
}

impl FileInfo {
    /// Builds a file-list entry.
    ///
    /// `path_name` is normalized to forward slashes; `raw_name_bytes` is
    /// kept separately because wire ordering compares raw bytes, not
    /// (locale-dependent) textual code points.
    #[must_use]
    pub fn new(path_name: impl Into<String>, kind: Kind, attrs: Attrs) -> Self {
        let path_name = path_name.into().replace('\\', "/");
        let raw_name_bytes = path_name.as_bytes().to_vec();
        Self { path_name, raw_name_bytes, kind, attrs }
    }

    /// The module-root-relative, forward-slash path of this entry.
    #[must_use]
    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    /// The path as a native [`PathBuf`], for filesystem operations.
    #[must_use]
    pub fn as_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path_name)
    }

    /// Raw wire-format name bytes (identical to `path_name`'s UTF-8 bytes
    /// for this core, which always normalizes to forward slashes first;
    /// kept distinct so ordering and wire code never assume UTF-8).
    #[must_use]
    pub fn raw_name_bytes(&self) -> &[u8] {
        &self.raw_name_bytes
    }

    /// What kind of filesystem object this entry describes.
    #[must_use]
    pub const fn kind(&self) -> &Kind {
        &self.kind
    }

    /// This entry's metadata.
    #[must_use]
    pub const fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Whether this entry is the synthetic root marker `"."`.
    #[must_use]
    pub fn is_root_marker(&self) -> bool {
        self.path_name == "."
    }

    /// The final path component, used as the sort key's byte source: the
    /// basename for a nested entry, or the whole name (`"."`) for the root.
    #[must_use]
    pub fn basename_bytes(&self) -> &[u8] {
        match self.raw_name_bytes.iter().rposition(|&b| b == b'/') {
            Some(pos) => &self.raw_name_bytes[pos + 1..],
            None => &self.raw_name_bytes,
        }
    }
}
