//! PID-file lifecycle: write the process id on daemon start, remove it on
//! clean shutdown.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes `pid` to `path` in upstream rsync's `write_pid_file()` format
/// (`%d\n`), with mode `0644` on Unix, and removes it when dropped.
///
/// The file is removed only once, from whichever of `Drop` or an explicit
/// [`PidFile::remove`] runs first -- a process that panics during shutdown
/// still cleans up via `Drop`.
pub struct PidFile {
    path: PathBuf,
    removed: bool,
}

impl PidFile {
    /// Writes the current process's id to `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`io::Error`] if the file cannot be created or
    /// written.
    pub fn create(path: PathBuf) -> io::Result<Self> {
        Self::create_for_pid(path, std::process::id())
    }

    /// Writes `pid` to `path`, for testing without depending on the real
    /// process id.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`io::Error`] if the file cannot be created or
    /// written.
    pub fn create_for_pid(path: PathBuf, pid: u32) -> io::Result<Self> {
        fs::write(&path, format!("{pid}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        }
        Ok(Self { path, removed: false })
    }

    /// The path this PID file was written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the PID file now, rather than waiting for `Drop`.
    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if !self.removed {
            let _ = fs::remove_file(&self.path);
            self.removed = true;
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove_inner();
    }
}
