//! Depth-first, sorted enumeration of a module root.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::entry::{Attrs, FileInfo, Kind};
use crate::order;

/// Errors raised while walking a module root.
#[derive(Debug, Error)]
pub enum WalkError {
    /// A filesystem read failed while walking `path`.
    #[error("reading {path}: {source}")]
    Io {
        /// The path being read when the error occurred.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> WalkError {
    WalkError::Io { path: path.to_path_buf(), source }
}

/// Walks `root` depth-first and returns every entry in wire order: the
/// synthetic root marker `"."` first, then each directory's children in
/// the total sort order, recursing into subdirectories immediately after
/// they are emitted.
///
/// # Errors
///
/// Returns [`WalkError`] if any directory or file under `root` cannot be
/// read.
pub fn enumerate_module(root: &Path) -> Result<Vec<FileInfo>, WalkError> {
    let root_meta = fs::symlink_metadata(root).map_err(|e| io_err(root, e))?;
    let mut out = vec![FileInfo::new(".", Kind::Directory, attrs_from_metadata(&root_meta))];
    visit_dir(root, "", &mut out)?;
    Ok(out)
}

fn visit_dir(root: &Path, rel_prefix: &str, out: &mut Vec<FileInfo>) -> Result<(), WalkError> {
    let dir_path = if rel_prefix.is_empty() { root.to_path_buf() } else { root.join(rel_prefix) };

    let mut children = Vec::new();
    for dirent in fs::read_dir(&dir_path).map_err(|e| io_err(&dir_path, e))? {
        let dirent = dirent.map_err(|e| io_err(&dir_path, e))?;
        let name = dirent.file_name().to_string_lossy().into_owned();
        let entry_path = dirent.path();
        let meta = fs::symlink_metadata(&entry_path).map_err(|e| io_err(&entry_path, e))?;

        let rel_path =
            if rel_prefix.is_empty() { name.clone() } else { format!("{rel_prefix}/{name}") };
        let kind = classify(&meta, &entry_path)?;
        let attrs = attrs_from_metadata(&meta);
        children.push(FileInfo::new(rel_path, kind, attrs));
    }

    children.sort_by(order::compare);

    for child in children {
        let is_dir = child.kind().is_directory();
        let rel = child.path_name().to_owned();
        out.push(child);
        if is_dir {
            visit_dir(root, &rel, out)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn classify(meta: &fs::Metadata, path: &Path) -> Result<Kind, WalkError> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let file_type = meta.file_type();
    if file_type.is_dir() {
        Ok(Kind::Directory)
    } else if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| io_err(path, e))?;
        Ok(Kind::Symlink(target.to_string_lossy().into_owned()))
    } else if file_type.is_char_device() || file_type.is_block_device() {
        let rdev = meta.rdev();
        Ok(Kind::Device {
            character: file_type.is_char_device(),
            major: device_major(rdev),
            minor: device_minor(rdev),
        })
    } else if file_type.is_fifo() {
        Ok(Kind::Fifo)
    } else if file_type.is_socket() {
        Ok(Kind::Socket)
    } else {
        Ok(Kind::Regular)
    }
}

#[cfg(not(unix))]
fn classify(meta: &fs::Metadata, path: &Path) -> Result<Kind, WalkError> {
    if meta.is_dir() {
        Ok(Kind::Directory)
    } else if meta.file_type().is_symlink() {
        let target = fs::read_link(path).map_err(|e| io_err(path, e))?;
        Ok(Kind::Symlink(target.to_string_lossy().into_owned()))
    } else {
        Ok(Kind::Regular)
    }
}

/// Extracts the glibc `major()`/`minor()` components from a packed `st_rdev`.
#[cfg(unix)]
#[must_use]
pub fn device_major(dev: u64) -> u32 {
    (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)) as u32
}

/// See [`device_major`].
#[cfg(unix)]
#[must_use]
pub fn device_minor(dev: u64) -> u32 {
    ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32
}

#[cfg(unix)]
fn attrs_from_metadata(meta: &fs::Metadata) -> Attrs {
    use std::os::unix::fs::MetadataExt;
    Attrs {
        mode: meta.mode(),
        mtime: meta.mtime(),
        size: if meta.is_dir() { 0 } else { meta.size() },
        uid: meta.uid(),
        gid: meta.gid(),
        user_name: None,
        group_name: None,
    }
}

#[cfg(not(unix))]
fn attrs_from_metadata(meta: &fs::Metadata) -> Attrs {
    Attrs {
        mode: if meta.is_dir() { 0o040755 } else { 0o100644 },
        mtime: meta.modified().ok().and_then(|t| {
            t.duration_since(std::time::UNIX_EPOCH).ok().map(|d| d.as_secs() as i64)
        }).unwrap_or(0),
        size: if meta.is_dir() { 0 } else { meta.len() },
        uid: 0,
        gid: 0,
        user_name: None,
        group_name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_marker_is_first_entry() {
        let temp = tempfile::tempdir().unwrap();
        let entries = enumerate_module(temp.path()).unwrap();
        assert_eq!(entries[0].path_name(), ".");
    }

    #[test]
    fn enumeration_is_sorted_and_depth_first() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("b_dir")).unwrap();
        fs::write(root.join("b_dir/inner.txt"), b"x").unwrap();
        fs::write(root.join("a_file.txt"), b"y").unwrap();

        let entries = enumerate_module(root).unwrap();
        let names: Vec<_> = entries.iter().map(FileInfo::path_name).collect();
        assert_eq!(names, vec![".", "a_file.txt", "b_dir", "b_dir/inner.txt"]);
    }

    #[test]
    fn two_enumerations_of_the_same_tree_produce_identical_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        for name in ["z", "m", "a", "q"] {
            fs::write(root.join(name), b"x").unwrap();
        }
        let first: Vec<_> =
            enumerate_module(root).unwrap().iter().map(FileInfo::path_name).map(String::from).collect();
        let second: Vec<_> =
            enumerate_module(root).unwrap().iter().map(FileInfo::path_name).map(String::from).collect();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_reported_but_not_followed() {
        use std::os::unix::fs::symlink;
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("real_dir")).unwrap();
        fs::write(root.join("real_dir/f"), b"x").unwrap();
        symlink("real_dir", root.join("link_to_dir")).unwrap();

        let entries = enumerate_module(root).unwrap();
        let link_entry = entries.iter().find(|e| e.path_name() == "link_to_dir").unwrap();
        assert!(matches!(link_entry.kind(), Kind::Symlink(target) if target == "real_dir"));
        // Traversal must not have descended into the symlink's target.
        assert!(!entries.iter().any(|e| e.path_name().starts_with("link_to_dir/")));
    }
}
