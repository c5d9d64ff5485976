//! Module definitions and per-module connection limiting.

use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::hostacl::HostPattern;

/// A single `[name]` module, as parsed from a config section or built
/// directly by a `--module name=path;key=value;...` CLI argument.
#[derive(Clone, Debug)]
pub struct ModuleDef {
    /// Module name, the token clients send to select it.
    pub name: String,
    /// Filesystem root this module exposes, relative to which
    /// [`restricted_path::RestrictedPath`] resolves client-supplied paths.
    pub path: PathBuf,
    /// Free-text comment shown in `#list` output.
    pub comment: Option<String>,
    /// `hosts allow` patterns; an empty list permits every address.
    pub hosts_allow: Vec<HostPattern>,
    /// `hosts deny` patterns; always excludes a matching address.
    pub hosts_deny: Vec<HostPattern>,
    read_only: bool,
    write_only: bool,
    listable: bool,
    auth_users: Vec<String>,
    secrets_file: Option<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    timeout: Option<u64>,
    max_connections: Option<NonZeroU32>,
    numeric_ids: bool,
    fs_uri: Option<String>,
}

impl ModuleDef {
    /// Builds a module with only the required `path` set; every optional
    /// directive takes its rsyncd.conf default.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            comment: None,
            hosts_allow: Vec::new(),
            hosts_deny: Vec::new(),
            read_only: true,
            write_only: false,
            listable: true,
            auth_users: Vec::new(),
            secrets_file: None,
            uid: None,
            gid: None,
            timeout: None,
            max_connections: None,
            numeric_ids: false,
            fs_uri: None,
        }
    }

    /// Whether `name` matches the module-name grammar: one or more
    /// ASCII letters, digits, or underscores.
    #[must_use]
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }

    /// The `fs` directive: a URI naming a non-default filesystem provider
    /// for this module, if one was configured. `None` means the default,
    /// in-process local filesystem.
    #[must_use]
    pub fn fs_uri(&self) -> Option<&str> {
        self.fs_uri.as_deref()
    }

    /// Sets the `fs` directive.
    pub fn set_fs_uri(&mut self, uri: String) {
        self.fs_uri = Some(uri);
    }

    /// Whether clients may only read from this module (`read only`, default `yes`).
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Sets the `read only` directive.
    pub fn set_read_only(&mut self, value: bool) {
        self.read_only = value;
    }

    /// Whether clients may only write to this module (`write only`, default `no`).
    #[must_use]
    pub const fn write_only(&self) -> bool {
        self.write_only
    }

    /// Sets the `write only` directive.
    pub fn set_write_only(&mut self, value: bool) {
        self.write_only = value;
    }

    /// Whether this module appears in `#list` output (`list`, default `yes`).
    #[must_use]
    pub const fn listable(&self) -> bool {
        self.listable
    }

    /// Sets the `list` directive.
    pub fn set_listable(&mut self, value: bool) {
        self.listable = value;
    }

    /// Whether the module enforces a chroot-like filesystem boundary. This
    /// implementation always sandboxes module access via
    /// `restricted_path::RestrictedPath` regardless of configuration, so this
    /// is unconditionally `true`.
    #[must_use]
    pub const fn use_chroot(&self) -> bool {
        true
    }

    /// Whether numeric uid/gid are sent instead of resolved names (`numeric ids`).
    #[must_use]
    pub const fn numeric_ids(&self) -> bool {
        self.numeric_ids
    }

    /// Sets the `numeric ids` directive.
    pub fn set_numeric_ids(&mut self, value: bool) {
        self.numeric_ids = value;
    }

    /// The `uid` directive, if set.
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Sets the `uid` directive.
    pub fn set_uid(&mut self, value: u32) {
        self.uid = Some(value);
    }

    /// The `gid` directive, if set.
    #[must_use]
    pub const fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// Sets the `gid` directive.
    pub fn set_gid(&mut self, value: u32) {
        self.gid = Some(value);
    }

    /// The `timeout` directive in seconds, if set.
    #[must_use]
    pub const fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    /// Sets the `timeout` directive.
    pub fn set_timeout(&mut self, value: u64) {
        self.timeout = Some(value);
    }

    /// The `max connections` directive, if set and nonzero.
    #[must_use]
    pub const fn max_connections(&self) -> Option<NonZeroU32> {
        self.max_connections
    }

    /// Sets the `max connections` directive. `0` is treated as "unset"
    /// (unlimited), matching upstream rsync's treatment of the directive.
    pub fn set_max_connections(&mut self, value: u32) {
        self.max_connections = NonZeroU32::new(value);
    }

    /// Usernames accepted by `auth users`, empty if the module needs no
    /// authentication.
    #[must_use]
    pub fn auth_users(&self) -> &[String] {
        &self.auth_users
    }

    /// Sets the `auth users` directive from its comma-separated value.
    pub fn set_auth_users(&mut self, users: Vec<String>) {
        self.auth_users = users;
    }

    /// The `secrets file` path, if auth is configured.
    #[must_use]
    pub fn secrets_file(&self) -> Option<&Path> {
        self.secrets_file.as_deref()
    }

    /// Sets the `secrets file` directive.
    pub fn set_secrets_file(&mut self, path: PathBuf) {
        self.secrets_file = Some(path);
    }

    /// Whether this module requires authentication before granting access.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        !self.auth_users.is_empty()
    }
}

/// Errors raised while acquiring or releasing a module connection slot.
#[derive(Debug, Error)]
pub enum ModuleConnectionError {
    /// The module's `max connections` limit is already saturated.
    #[error("max connections ({0}) reached -- try again later")]
    Limit(NonZeroU32),
    /// Reading or writing the connection-count lock file failed.
    #[error("connection lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enforces `max connections` per module, tracking live connection counts in
/// memory and mirroring them to a lock file so the count survives process
/// restarts and is inspectable externally.
pub struct ConnectionLimiter {
    lock_path: PathBuf,
    counts: Mutex<HashMap<String, u32>>,
}

impl ConnectionLimiter {
    /// Opens (or creates) the lock file at `lock_path`, seeding in-memory
    /// counts from its current contents if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleConnectionError::Io`] if the existing lock file cannot
    /// be read.
    pub fn open(lock_path: PathBuf) -> Result<Self, ModuleConnectionError> {
        let counts = if lock_path.exists() {
            parse_lock_file(&fs::read_to_string(&lock_path)?)
        } else {
            HashMap::new()
        };
        Ok(Self { lock_path, counts: Mutex::new(counts) })
    }

    /// Attempts to acquire a connection slot for `module`, whose current
    /// count must stay below `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleConnectionError::Limit`] if the module is already at
    /// capacity, or [`ModuleConnectionError::Io`] if the lock file cannot be
    /// rewritten.
    pub fn acquire(
        self: &Arc<Self>,
        module: &str,
        limit: NonZeroU32,
    ) -> Result<ConnectionGuard, ModuleConnectionError> {
        let mut counts = self.counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let current = counts.get(module).copied().unwrap_or(0);
        if current >= limit.get() {
            return Err(ModuleConnectionError::Limit(limit));
        }
        counts.insert(module.to_string(), current + 1);
        write_lock_file(&self.lock_path, &counts)?;
        drop(counts);
        Ok(ConnectionGuard { limiter: Arc::clone(self), module: module.to_string() })
    }

    fn release(&self, module: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(count) = counts.get_mut(module) {
            *count = count.saturating_sub(1);
        }
        let _ = write_lock_file(&self.lock_path, &counts);
    }
}

/// A held connection slot; dropping it decrements the module's live count.
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
    module: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.release(&self.module);
    }
}

fn parse_lock_file(contents: &str) -> HashMap<String, u32> {
    contents
        .lines()
        .filter_map(|line| {
            let (name, count) = line.split_once(' ')?;
            Some((name.to_string(), count.trim().parse().ok()?))
        })
        .collect()
}

fn write_lock_file(path: &Path, counts: &HashMap<String, u32>) -> std::io::Result<()> {
    let mut names: Vec<&String> = counts.keys().collect();
    names.sort();
    let mut contents = String::new();
    for name in names {
        contents.push_str(name);
        contents.push(' ');
        contents.push_str(&counts[name].to_string());
        contents.push('\n');
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn module_name_grammar_accepts_word_characters_only() {
        assert!(ModuleDef::is_valid_name("data"));
        assert!(ModuleDef::is_valid_name("data_2"));
        assert!(!ModuleDef::is_valid_name(""));
        assert!(!ModuleDef::is_valid_name("data/x"));
        assert!(!ModuleDef::is_valid_name("data.x"));
    }

    #[test]
    fn default_module_is_read_only_listable_and_chrooted() {
        let module = ModuleDef::new("docs", "/srv/docs");
        assert!(module.read_only());
        assert!(module.listable());
        assert!(module.use_chroot());
        assert!(!module.requires_auth());
    }

    #[test]
    fn connection_limiter_open_preserves_existing_counts() {
        let temp = tempdir().unwrap();
        let lock_path = temp.path().join("daemon.lock");
        fs::write(&lock_path, b"docs 1\nother 2\n").unwrap();

        let limiter = ConnectionLimiter::open(lock_path.clone()).unwrap();
        drop(limiter);

        let contents = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(contents, "docs 1\nother 2\n");
    }

    #[test]
    fn connection_limiter_enforces_limits_across_guards() {
        let temp = tempdir().unwrap();
        let lock_path = temp.path().join("daemon.lock");
        let limiter = Arc::new(ConnectionLimiter::open(lock_path).unwrap());
        let limit = NonZeroU32::new(2).unwrap();

        let first = limiter.acquire("docs", limit).unwrap();
        let second = limiter.acquire("docs", limit).unwrap();
        assert!(matches!(
            limiter.acquire("docs", limit),
            Err(ModuleConnectionError::Limit(l)) if l == limit
        ));

        drop(second);
        let third = limiter.acquire("docs", limit).unwrap();

        drop(third);
        drop(first);
        assert!(limiter.acquire("docs", limit).is_ok());
    }

    #[test]
    fn connection_limiter_propagates_io_errors() {
        let temp = tempdir().unwrap();
        let lock_path = temp.path().join("daemon.lock");
        let limiter = Arc::new(ConnectionLimiter::open(lock_path.clone()).unwrap());

        fs::remove_file(&lock_path).unwrap();
        fs::create_dir(&lock_path).unwrap();

        match limiter.acquire("docs", NonZeroU32::new(1).unwrap()) {
            Err(ModuleConnectionError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
