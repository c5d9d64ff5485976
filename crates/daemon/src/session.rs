//! The `GREETING → MODULE_SELECT → (AUTH?) → OPTIONS → MUX_ON → TRANSFER →
//! TEARDOWN` state machine, and the `Session` record describing a
//! completed connection.
//!
//! Everything before `MUX_ON` is a line-oriented ASCII exchange the
//! multiplex layer does not apply to yet, so this module owns a small
//! byte-at-a-time line reader over the raw [`DuplexChannel`]; once options
//! are parsed the same channel is handed to a fresh [`MultiplexChannel`] and
//! driven by [`crate::transfer`].

use protocol::channel::{DuplexChannel, Readable, Writable};
use protocol::multiplex::MultiplexChannel;
use protocol::negotiation::{
    format_auth_challenge, format_error_line, negotiate_version, parse_auth_response, render_module_list,
    Greeting, ModuleRequest, EXIT_LINE, MAX_VERSION, OK_LINE,
};
use protocol::tag::Tag;
use protocol::ChannelError;

use crate::auth::verify_daemon_auth_response;
use crate::error::{DaemonError, ModuleError};
use crate::module::ModuleDef;
use crate::modules::Modules;
use crate::transfer;

/// Strong-digest names this daemon's own greeting advertises.
const ADVERTISED_DIGESTS: &[&str] = &["md5", "md4"];

/// Which half of the delta protocol this session's local end plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// This end reads module content and transmits it.
    Sender,
    /// This end receives content and writes it to the module root.
    Receiver,
}

/// Connection-wide settings that do not vary per module.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Charset names are decoded under; paths are always UTF-8 in this core
    /// and names never cross a charset boundary, but the
    /// value is still threaded through for parity with the wire-level
    /// option and for a future non-UTF-8 filesystem provider.
    pub charset: String,
    /// Whether the listener may interrupt this session mid-transfer during
    /// shutdown.
    pub interruptible: bool,
    /// Whether a receiver materializes output only after a file's whole
    /// transfer succeeds, rather than writing its temporary incrementally.
    pub deferred_write: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { charset: "UTF-8".to_string(), interruptible: true, deferred_write: false }
    }
}

/// A completed session's record, useful for logging and for tests that
/// assert on the negotiated outcome.
#[derive(Clone, Debug)]
pub struct Session {
    /// The protocol version both peers agreed on.
    pub protocol_version: u32,
    /// Which half of the transfer this end played.
    pub role: Role,
    /// The selected module's name.
    pub module: String,
    /// Effective connection settings for this session.
    pub charset: String,
    /// Whether this session could have been interrupted mid-transfer.
    pub interruptible: bool,
    /// Whether this session deferred materializing received content.
    pub deferred_write: bool,
}

/// Drives one accepted connection through the full session state machine.
///
/// Returns `Ok(None)` if the peer only requested a `#list` (no module was
/// selected, no transfer ran); returns `Ok(Some(session))` after a
/// completed transfer.
///
/// # Errors
///
/// Returns [`DaemonError`] on any protocol violation, failed module
/// selection or authentication, or transfer failure. Whichever of those is
/// peer-reportable (`DaemonError::is_peer_reportable`) has already been
/// reported before this returns: as a plain `@ERROR:` line if it happened
/// before `MUX_ON`, or as a tagged `Error` frame if it happened during the
/// transfer phase.
pub fn run<C: DuplexChannel>(
    channel: C,
    modules: &Modules,
    config: &SessionConfig,
) -> Result<Option<Session>, DaemonError> {
    let mut channel = channel;
    let peer = channel.peer_address();

    write_line(&mut channel, &Greeting::for_version(MAX_VERSION, ADVERTISED_DIGESTS).to_line())?;
    let peer_greeting = Greeting::parse(&read_line(&mut channel)?)?;
    let protocol_version = negotiate_version(MAX_VERSION, peer_greeting.version)?;

    let module = loop {
        match ModuleRequest::parse(&read_line(&mut channel)?) {
            ModuleRequest::List => {
                for line in render_module_list(&modules.listing_for(peer)) {
                    write_line(&mut channel, &format!("{line}\n"))?;
                }
                write_line(&mut channel, EXIT_LINE)?;
                return Ok(None);
            }
            ModuleRequest::Named(name) => match modules.select(&name, peer) {
                Ok(module) => break module,
                Err(err) => return Err(fail(&mut channel, err)?),
            },
        }
    };

    let _connection_guard = match modules.acquire_connection(module) {
        Ok(guard) => guard,
        Err(err) => return Err(fail(&mut channel, err)?),
    };

    if module.requires_auth() {
        let challenge = format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>());
        write_line(&mut channel, &format_auth_challenge(&challenge))?;
        let (user, response) = parse_auth_response(&read_line(&mut channel)?);
        if user.is_empty() || !verify_daemon_auth_response_for(modules, module, &user, &challenge, &response) {
            return Err(fail(&mut channel, ModuleError::AccessDenied)?);
        }
    }

    write_line(&mut channel, OK_LINE)?;
    let role = decide_role(&read_argv(&mut channel)?);

    if let Err(err) = check_role_permitted(module, role) {
        return Err(fail(&mut channel, err)?);
    }

    let mut mux = MultiplexChannel::new(channel);
    let outcome = match role {
        Role::Sender => transfer::run_as_sender(&mut mux, &module.path),
        Role::Receiver => {
            let resolver = Modules::resolver_for(module);
            transfer::run_as_receiver(&mut mux, &resolver, config.deferred_write)
        }
    };
    if let Err(err) = outcome {
        let err = DaemonError::from(err);
        if err.is_peer_reportable() {
            let _ = mux.put_message(Tag::Error, err.to_string().as_bytes());
        }
        let _ = mux.close();
        return Err(err);
    }
    mux.close()?;

    Ok(Some(Session {
        protocol_version,
        role,
        module: module.name.clone(),
        charset: config.charset.clone(),
        interruptible: config.interruptible,
        deferred_write: config.deferred_write,
    }))
}

fn verify_daemon_auth_response_for(
    modules: &Modules,
    module: &crate::module::ModuleDef,
    user: &str,
    challenge: &str,
    response: &str,
) -> bool {
    modules.authenticate(module, user, challenge, response).is_ok()
}

/// Writes a fatal `@ERROR:`/`EXIT` pair to the peer and hands the underlying error back to
/// the caller to propagate.
fn fail<C: DuplexChannel, E: Into<DaemonError>>(channel: &mut C, err: E) -> Result<DaemonError, DaemonError> {
    let err = err.into();
    write_line(channel, &format_error_line(&err.to_string()))?;
    write_line(channel, EXIT_LINE)?;
    Ok(err)
}

/// Rejects a role the module's `read only`/`write only` settings forbid:
/// a sender needs read access, a receiver needs write access.
fn check_role_permitted(module: &ModuleDef, role: Role) -> Result<(), ModuleError> {
    match role {
        Role::Sender if module.write_only() => Err(ModuleError::NotReadable(module.name.clone())),
        Role::Receiver if module.read_only() => Err(ModuleError::NotWritable(module.name.clone())),
        _ => Ok(()),
    }
}

fn decide_role(args: &[String]) -> Role {
    if args.iter().any(|arg| arg == "--sender") {
        Role::Sender
    } else {
        Role::Receiver
    }
}

fn write_line<C: Writable>(channel: &mut C, line: &str) -> Result<(), ChannelError> {
    channel.write_bytes(line.as_bytes())?;
    channel.flush()
}

fn read_line<C: Readable>(channel: &mut C) -> Result<String, ChannelError> {
    let mut buf = Vec::new();
    loop {
        let byte = channel.read_u8()?;
        if byte == b'\n' {
            break;
        }
        buf.push(byte);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads the client's transferred argv: NUL-terminated
/// strings, ending with an empty one.
fn read_argv<C: Readable>(channel: &mut C) -> Result<Vec<String>, ChannelError> {
    let mut args = Vec::new();
    loop {
        let mut buf = Vec::new();
        loop {
            let byte = channel.read_u8()?;
            if byte == 0 {
                break;
            }
            buf.push(byte);
        }
        if buf.is_empty() {
            break;
        }
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use crate::module::{ConnectionLimiter, ModuleDef};

    struct FakeDuplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl FakeDuplex {
        fn scripted(input: &[u8]) -> Self {
            Self { input: Cursor::new(input.to_vec()), output: Vec::new() }
        }
    }

    impl Readable for FakeDuplex {
        fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
            use std::io::Read;
            self.input.read_exact(buf).map_err(|_| ChannelError::PrematureEof)
        }
    }

    impl Writable for FakeDuplex {
        fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
            self.output.extend_from_slice(buf);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    impl DuplexChannel for FakeDuplex {
        fn peer_address(&self) -> Option<std::net::SocketAddr> {
            None
        }
    }

    fn modules_with(defs: Vec<ModuleDef>) -> Modules {
        let dir = tempfile::tempdir().unwrap();
        let limiter = Arc::new(ConnectionLimiter::open(dir.path().join("daemon.lock")).unwrap());
        Modules::new(defs, limiter)
    }

    #[test]
    fn decide_role_recognizes_sender_flag() {
        assert_eq!(decide_role(&["--sender".to_string()]), Role::Sender);
        assert_eq!(decide_role(&["-r".to_string()]), Role::Receiver);
        assert_eq!(decide_role(&[]), Role::Receiver);
    }

    #[test]
    fn read_argv_stops_at_the_empty_terminator() {
        let mut channel = FakeDuplex::scripted(b"--server\0--sender\0.\0\0");
        let args = read_argv(&mut channel).unwrap();
        assert_eq!(args, vec!["--server".to_string(), "--sender".to_string(), ".".to_string()]);
    }

    #[test]
    fn list_request_returns_none_without_selecting_a_module() {
        let mut visible = ModuleDef::new("data", "/srv/data");
        visible.comment = Some("shared data".to_string());
        let modules = modules_with(vec![visible]);

        let mut script = Greeting::for_version(MAX_VERSION, ADVERTISED_DIGESTS).to_line().into_bytes();
        script.extend_from_slice(b"#list\n");
        let channel = FakeDuplex::scripted(&script);

        let outcome = run(channel, &modules, &SessionConfig::default()).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn check_role_permitted_enforces_read_only_and_write_only() {
        let mut read_only = ModuleDef::new("ro", "/srv/ro");
        read_only.set_read_only(true);
        assert!(check_role_permitted(&read_only, Role::Sender).is_ok());
        assert!(matches!(
            check_role_permitted(&read_only, Role::Receiver),
            Err(ModuleError::NotWritable(name)) if name == "ro"
        ));

        let mut write_only = ModuleDef::new("wo", "/srv/wo");
        write_only.set_read_only(false);
        write_only.set_write_only(true);
        assert!(check_role_permitted(&write_only, Role::Receiver).is_ok());
        assert!(matches!(
            check_role_permitted(&write_only, Role::Sender),
            Err(ModuleError::NotReadable(name)) if name == "wo"
        ));
    }

    #[test]
    fn sender_request_against_a_write_only_module_is_rejected_before_transfer() {
        let mut module = ModuleDef::new("data", "/srv/data");
        module.set_read_only(false);
        module.set_write_only(true);
        let modules = modules_with(vec![module]);

        let mut script = Greeting::for_version(MAX_VERSION, ADVERTISED_DIGESTS).to_line().into_bytes();
        script.extend_from_slice(b"data\n");
        script.extend_from_slice(b"--server\0--sender\0.\0\0");
        let channel = FakeDuplex::scripted(&script);

        let err = run(channel, &modules, &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, DaemonError::Module(ModuleError::NotReadable(name)) if name == "data"));
    }

    #[test]
    fn unknown_module_is_rejected_with_an_error_line() {
        let modules = modules_with(vec![]);

        let mut script = Greeting::for_version(MAX_VERSION, ADVERTISED_DIGESTS).to_line().into_bytes();
        script.extend_from_slice(b"nope\n");
        let channel = FakeDuplex::scripted(&script);

        let err = run(channel, &modules, &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, DaemonError::Module(ModuleError::NotFound(name)) if name == "nope"));
    }
}
