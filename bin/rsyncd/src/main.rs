//! CLI entry point for the rsync-compatible daemon: parses arguments,
//! assembles the module table from a config file and/or inline `--module`
//! definitions, and runs the accept loop until interrupted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use daemon::config::{parse_file, parse_inline_module, ConfigError};
use daemon::{CancelToken, ConnectionLimiter, ListenerConfig, ModuleDef, Modules, PidFile, SessionConfig};

/// An rsync-compatible daemon: serves one or more named modules to clients
/// speaking the `@RSYNCD:` wire protocol.
#[derive(Parser, Debug)]
#[command(name = "rsyncd", version, about)]
struct Cli {
    /// Character set client-reported names are assumed to be encoded in.
    #[arg(long, default_value = "UTF-8")]
    charset: String,

    /// Increases logging verbosity; may be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Local address to bind and listen on.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 873)]
    port: u16,

    /// Maximum number of concurrently served connections.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Materializes received files only after their whole transfer
    /// succeeds, rather than writing a temporary incrementally.
    #[arg(long)]
    defer_write: bool,

    /// Per-operation read/write timeout in seconds; `0` disables it.
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Accepts connections only over TLS. This build has no TLS transport:
    /// passing this flag is accepted for CLI-surface completeness but
    /// always fails at startup.
    #[arg(long)]
    tls: bool,

    /// Path to an `rsyncd.conf`-style configuration file defining modules.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Defines a module inline as `name=path[;key=value...]`; may be
    /// repeated. Combines with `--config` if both are given.
    #[arg(long = "module", value_name = "name=path[;key=value...]")]
    modules: Vec<String>,

    /// Writes the daemon's process id to this path on startup and removes
    /// it on clean shutdown.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rsyncd: {err}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbosity: u8) {
    #[cfg(feature = "tracing")]
    {
        let level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = verbosity;
    }
}

fn run(cli: Cli) -> Result<(), RunError> {
    if cli.tls {
        return Err(RunError::TlsUnsupported);
    }

    let mut defs: Vec<ModuleDef> = Vec::new();
    if let Some(config_path) = &cli.config {
        defs.extend(parse_file(config_path)?);
    }
    for inline in &cli.modules {
        defs.push(parse_inline_module(inline)?);
    }
    if defs.is_empty() {
        return Err(RunError::NoModules);
    }

    let address = resolve_address(&cli.address, cli.port)?;

    let lock_path = std::env::temp_dir().join("rsyncd.connections.lock");
    let limiter = Arc::new(ConnectionLimiter::open(lock_path).map_err(|err| RunError::Startup(err.to_string()))?);
    let modules = Arc::new(Modules::new(defs, limiter));

    let _pid_file = match &cli.pid_file {
        Some(path) => Some(PidFile::create(path.clone()).map_err(|err| RunError::Startup(err.to_string()))?),
        None => None,
    };

    let config = ListenerConfig {
        address,
        max_connections: cli.threads,
        timeout: Duration::from_secs(cli.timeout),
        session: SessionConfig {
            charset: cli.charset,
            interruptible: true,
            deferred_write: cli.defer_write,
        },
    };

    // No signal handler is installed; the daemon runs until killed. The
    // cancel token exists so `daemon::serve` can be driven from one in a
    // build that does wire up a handler.
    let cancel: CancelToken = Arc::new(std::sync::atomic::AtomicBool::new(false));

    daemon::serve(config, modules, cancel).map_err(RunError::Io)
}

fn resolve_address(address: &str, port: u16) -> Result<SocketAddr, RunError> {
    if address == "0.0.0.0" || address.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|_| RunError::InvalidAddress(address.to_string()))
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("--tls was given but this build has no TLS transport")]
    TlsUnsupported,
    #[error("no modules configured: pass --config or --module")]
    NoModules,
    #[error("invalid --address value {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Startup(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
