//! Daemon-level error taxonomy: wraps the per-crate error types this
//! crate depends on and adds the module-lookup and config failures that only
//! exist at the session level.

use thiserror::Error;

use crate::module::ModuleConnectionError;
use crate::transfer::TransferError;
use protocol::{ChannelError, ProtocolError};
use restricted_path::SecurityError;

/// A module lookup or access-control failure.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module with that name is configured.
    #[error("Unknown module '{0}'")]
    NotFound(String),
    /// The module exists but forbids reads (`write only`).
    #[error("module '{0}' is not readable")]
    NotReadable(String),
    /// The module exists but forbids writes (`read only`).
    #[error("module '{0}' is not writable")]
    NotWritable(String),
    /// The client's address is not covered by `hosts allow` / is covered by
    /// `hosts deny`.
    #[error("module '{0}' refuses connections from this address")]
    Unconfigured(String),
    /// Authentication was required and failed.
    #[error("access denied")]
    AccessDenied,
    /// The module's `max connections` limit is saturated.
    #[error(transparent)]
    ConnectionLimitReached(#[from] ModuleConnectionError),
}

/// Whole-file digest mismatch after applying a delta, or a `secrets file`
/// whose content could not be read.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A frame-level or greeting-level protocol violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A transport fault: I/O failure, timeout, or premature EOF.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// A client path resolved outside its module root.
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// A module could not be selected.
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// The config file was malformed.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    /// A secrets file could not be loaded or had unsafe permissions.
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),
    /// A whole-file strong digest mismatch survived a retry.
    #[error("checksum mismatch reconstructing {0}")]
    Checksum(String),
    /// A failure in the file-list or delta-protocol wire codecs, or in the
    /// filesystem operations the transfer role performs while applying them.
    #[error(transparent)]
    Transfer(#[from] crate::transfer::TransferError),
}

impl DaemonError {
    /// Whether this error should be reported to the peer rather than a bare
    /// connection drop: as an `@ERROR:` line before `MUX_ON`, or as a tagged
    /// `Error` frame once the transfer phase has started.
    #[must_use]
    pub fn is_peer_reportable(&self) -> bool {
        matches!(
            self,
            Self::Module(_) | Self::Security(_) | Self::Transfer(TransferError::Security(_))
        )
    }
}
