//! Line-oriented parser for the module directives a `rsyncd.conf`-style
//! config file describes.
//!
//! The grammar is INI-like: `[name]` opens a module section; every following
//! `key = value` line (or `key=value`, whitespace around `=` is optional)
//! sets a directive on that module until the next section header or
//! end-of-file. A line ending in `\` continues onto the next line, with the
//! continuation's leading whitespace stripped before concatenation. Lines
//! starting with `#` or `;`, and blank lines, are ignored. Directive keys are
//! matched case-insensitively.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::hostacl::{self, HostAclError};
use crate::module::ModuleDef;

/// Errors raised while parsing a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    /// A directive appeared before any `[name]` section header.
    #[error("directive {0:?} outside of any module section")]
    DirectiveOutsideModule(String),
    /// A `[name]` section was opened twice.
    #[error("module {0:?} defined more than once")]
    DuplicateModule(String),
    /// An unrecognized directive key.
    #[error("unknown directive {0:?} in module {1:?}")]
    UnknownDirective(String, String),
    /// A module section never set `path`, which is required.
    #[error("module {0:?} has no path directive")]
    MissingPath(String),
    /// A numeric directive's value did not parse as an integer.
    #[error("invalid numeric value {1:?} for directive {0:?}")]
    InvalidNumber(String, String),
    /// A `hosts allow` / `hosts deny` value failed to parse.
    #[error(transparent)]
    HostAcl(#[from] HostAclError),
    /// A module name did not match the `[A-Za-z0-9_]+` grammar.
    #[error("module name {0:?} must match [A-Za-z0-9_]+")]
    InvalidModuleName(String),
    /// An `fs` directive named a filesystem provider this build does not
    /// implement; only the default in-process local filesystem is
    /// available.
    #[error("unresolvable filesystem URI {0:?} for module {1:?}")]
    UnresolvableFilesystem(String, String),
    /// A `--module name=path;key=value;...` CLI argument was not of that
    /// form.
    #[error("malformed --module definition: {0:?}")]
    MalformedInlineModule(String),
}

/// Parses the module sections of a config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, or any other
/// [`ConfigError`] variant for a grammar or directive violation.
pub fn parse_file(path: &Path) -> Result<Vec<ModuleDef>, ConfigError> {
    parse_str(&fs::read_to_string(path)?)
}

/// Parses the module sections of config file contents already read into
/// memory.
///
/// # Errors
///
/// See [`parse_file`].
pub fn parse_str(contents: &str) -> Result<Vec<ModuleDef>, ConfigError> {
    let joined = join_continuations(contents);

    let mut modules: Vec<ModuleDef> = Vec::new();
    let mut current: Option<ModuleDef> = None;

    for raw_line in joined.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(module) = current.take() {
                finish_module(&module, &mut modules)?;
            }
            let name = name.trim();
            if !ModuleDef::is_valid_name(name) {
                return Err(ConfigError::InvalidModuleName(name.to_string()));
            }
            if modules.iter().any(|m| m.name == name) {
                return Err(ConfigError::DuplicateModule(name.to_string()));
            }
            current = Some(ModuleDef::new(name, ""));
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::DirectiveOutsideModule(line.to_string()));
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        let Some(module) = current.as_mut() else {
            return Err(ConfigError::DirectiveOutsideModule(key));
        };
        apply_directive(module, &key, value)?;
    }

    if let Some(module) = current.take() {
        finish_module(&module, &mut modules)?;
    }

    Ok(modules)
}

fn finish_module(module: &ModuleDef, modules: &mut Vec<ModuleDef>) -> Result<(), ConfigError> {
    if module.path.as_os_str().is_empty() {
        return Err(ConfigError::MissingPath(module.name.clone()));
    }
    validate_fs_uri(module)?;
    modules.push(module.clone());
    Ok(())
}

fn join_continuations(contents: &str) -> String {
    let mut joined = String::with_capacity(contents.len());
    let mut pending_continuation = false;
    for line in contents.lines() {
        let (line, continues) = match line.strip_suffix('\\') {
            Some(stripped) => (stripped, true),
            None => (line, false),
        };
        if pending_continuation {
            joined.push_str(line.trim_start());
        } else {
            joined.push_str(line);
        }
        if continues {
            pending_continuation = true;
        } else {
            joined.push('\n');
            pending_continuation = false;
        }
    }
    joined
}

fn apply_directive(module: &mut ModuleDef, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "path" => module.path = value.into(),
        "comment" => module.comment = Some(value.to_string()),
        "read only" => module.set_read_only(parse_bool(key, value)?),
        "write only" => module.set_write_only(parse_bool(key, value)?),
        "list" => module.set_listable(parse_bool(key, value)?),
        "numeric ids" => module.set_numeric_ids(parse_bool(key, value)?),
        "hosts allow" => module.hosts_allow = hostacl::parse_list(value)?,
        "hosts deny" => module.hosts_deny = hostacl::parse_list(value)?,
        "auth users" => {
            let users = value
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            module.set_auth_users(users);
        }
        "secrets file" => module.set_secrets_file(value.into()),
        "uid" => module.set_uid(parse_number(key, value)?),
        "gid" => module.set_gid(parse_number(key, value)?),
        "timeout" => module.set_timeout(parse_number(key, value)?),
        "max connections" => module.set_max_connections(parse_number(key, value)?),
        "fs" => module.set_fs_uri(value.to_string()),
        _ => return Err(ConfigError::UnknownDirective(key.to_string(), module.name.clone())),
    }
    Ok(())
}

/// The `fs` schemes this build resolves to the default in-process local
/// filesystem; anything else names a provider we cannot serve.
const RESOLVABLE_FS_SCHEMES: &[&str] = &["local", "file"];

fn validate_fs_uri(module: &ModuleDef) -> Result<(), ConfigError> {
    match module.fs_uri() {
        None => Ok(()),
        Some(uri) => {
            let scheme = uri.split_once("://").map_or(uri, |(scheme, _)| scheme);
            if RESOLVABLE_FS_SCHEMES.contains(&scheme) {
                Ok(())
            } else {
                Err(ConfigError::UnresolvableFilesystem(uri.to_string(), module.name.clone()))
            }
        }
    }
}

/// Parses a single `--module name=path;key=value;...` CLI argument
/// into a standalone [`ModuleDef`],
/// applying the same directive grammar `apply_directive` uses for config
/// file sections.
///
/// # Errors
///
/// Returns [`ConfigError::MalformedInlineModule`] if `spec` is not of the
/// `name=path` form, [`ConfigError::InvalidModuleName`] if the name fails
/// the module-name grammar, and any directive-level [`ConfigError`] raised by an
/// unrecognized or invalid `key=value` clause.
pub fn parse_inline_module(spec: &str) -> Result<ModuleDef, ConfigError> {
    let mut clauses = spec.split(';');
    let first = clauses.next().unwrap_or_default();
    let Some((name, path)) = first.split_once('=') else {
        return Err(ConfigError::MalformedInlineModule(spec.to_string()));
    };
    let name = name.trim();
    let path = path.trim();
    if !ModuleDef::is_valid_name(name) {
        return Err(ConfigError::InvalidModuleName(name.to_string()));
    }
    if path.is_empty() {
        return Err(ConfigError::MalformedInlineModule(spec.to_string()));
    }

    let mut module = ModuleDef::new(name, path);
    for clause in clauses {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let Some((key, value)) = clause.split_once('=') else {
            return Err(ConfigError::MalformedInlineModule(spec.to_string()));
        };
        apply_directive(&mut module, key.trim().to_ascii_lowercase().as_str(), value.trim())?;
    }
    validate_fs_uri(&module)?;
    Ok(module)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidNumber(key.to_string(), value.to_string())),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidNumber(key.to_string(), value.to_string()))
}
