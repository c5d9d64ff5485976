#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `daemon` implements the server session driver: it consumes
//! [`protocol`], [`matching`], [`flist`], and [`restricted_path`] to accept a
//! connection, run the greeting/module-select/auth handshake, switch to
//! multiplexed framing, and drive either the sender or receiver half of the
//! delta protocol to completion.
//!
//! - [`config`] parses `rsyncd.conf`-style module definitions.
//! - [`module`] defines [`module::ModuleDef`] and per-module connection
//!   limiting.
//! - [`hostacl`] matches client addresses against `hosts allow`/`hosts deny`.
//! - [`auth`] implements challenge/response authentication and secrets-file
//!   loading.
//! - [`modules`] is the `Modules` collaborator tying the above
//!   together into one session-facing lookup.
//! - [`session`] is the `GREETING → ... → TEARDOWN` state machine.
//! - [`transfer`] implements the sender and receiver roles of the per-file
//!   delta protocol.
//! - [`listener`] runs the thread-per-connection accept loop and the
//!   cooperative-cancellation wrapper it relies on.
//! - [`pidfile`] is the `--pid-file` lifecycle helper.
//! - [`error`] aggregates subordinate crates' errors into [`error::DaemonError`].

pub mod auth;
pub mod config;
pub mod error;
pub mod hostacl;
pub mod listener;
pub mod module;
pub mod modules;
pub mod pidfile;
pub mod session;
pub mod transfer;

pub use auth::{AuthError, DaemonAuthDigest, SecretsFile};
pub use config::ConfigError;
pub use error::{DaemonError, ModuleError};
pub use hostacl::{HostAclError, HostPattern};
pub use listener::{serve, CancelToken, ListenerConfig};
pub use module::{ConnectionGuard, ConnectionLimiter, ModuleConnectionError, ModuleDef};
pub use modules::Modules;
pub use pidfile::PidFile;
pub use session::{Role, Session, SessionConfig};
