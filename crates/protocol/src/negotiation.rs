//! Greeting, version negotiation, module selection, and challenge/response
//! authentication.
//!
//! These are line-oriented ASCII exchanges that happen before `MUX_ON`; the
//! caller drives them directly over a [`crate::channel::DuplexChannel`]'s
//! `Read`/`Write` (via a buffered line reader it owns), since the multiplex
//! framing in [`crate::multiplex`] does not apply yet.

use std::fmt;

use crate::error::ProtocolError;

/// Lowest protocol version this implementation negotiates.
pub const MIN_VERSION: u32 = 27;
/// Highest protocol version this implementation negotiates.
pub const MAX_VERSION: u32 = 31;

/// Protocol version at and above which the greeting advertises strong-digest
/// names.
const DIGEST_ADVERTISEMENT_MIN_VERSION: u32 = 31;

const GREETING_PREFIX: &str = "@RSYNCD:";

/// A parsed `@RSYNCD: <version>[ <digest>...]` greeting line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Greeting {
    /// The peer's advertised protocol version.
    pub version: u32,
    /// Strong-digest names the peer advertises support for, in the order
    /// presented (empty for peers below [`DIGEST_ADVERTISEMENT_MIN_VERSION`]).
    pub digests: Vec<String>,
}

impl Greeting {
    /// Builds the daemon's own greeting for `version`, advertising `digests`
    /// only when the version is new enough to expect them.
    #[must_use]
    pub fn for_version(version: u32, digests: &[&str]) -> Self {
        let digests = if version >= DIGEST_ADVERTISEMENT_MIN_VERSION {
            digests.iter().map(|s| (*s).to_string()).collect()
        } else {
            Vec::new()
        };
        Self { version, digests }
    }

    /// Formats the greeting as the wire line, including the trailing `\n`.
    ///
    /// The version is rendered `major.0` to match the form the stock
    /// protocol's peers expect (`@RSYNCD: 31.0 md5 md4\n`), even though this
    /// implementation has no concept of a minor version.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!("{GREETING_PREFIX} {}.0", self.version);
        for digest in &self.digests {
            line.push(' ');
            line.push_str(digest);
        }
        line.push('\n');
        line
    }

    /// Parses a greeting line (with or without its trailing newline).
    ///
    /// Tolerates the whitespace variations real clients send: extra spaces
    /// around the version, and a version expressed as `major` or
    /// `major.minor`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidGreeting`] if the line does not start
    /// with `@RSYNCD:` or its version field does not parse as an integer.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let rest = trimmed
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| ProtocolError::InvalidGreeting(line.to_string()))?;

        let mut fields = rest.split_whitespace();
        let version_field = fields
            .next()
            .ok_or_else(|| ProtocolError::InvalidGreeting(line.to_string()))?;
        let major = version_field
            .split('.')
            .next()
            .unwrap_or(version_field);
        let version: u32 = major
            .parse()
            .map_err(|_| ProtocolError::InvalidGreeting(line.to_string()))?;

        let digests = fields.map(str::to_string).collect();
        Ok(Self { version, digests })
    }
}

/// Negotiates the session protocol version: the lower of the two peers'
/// advertised versions, provided it falls inside `[MIN_VERSION, MAX_VERSION]`.
///
/// # Errors
///
/// Returns [`ProtocolError::VersionMismatch`] if the lower of the two
/// versions is outside the supported range.
pub fn negotiate_version(local: u32, peer: u32) -> Result<u32, ProtocolError> {
    let agreed = local.min(peer);
    if agreed < MIN_VERSION || agreed > MAX_VERSION {
        return Err(ProtocolError::VersionMismatch {
            peer,
            min: MIN_VERSION,
            max: MAX_VERSION,
        });
    }
    Ok(agreed)
}

/// A single `name\tcomment` entry emitted in response to `#list`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleListing {
    /// Module name.
    pub name: String,
    /// Module comment, empty if none was configured.
    pub comment: String,
}

impl fmt::Display for ModuleListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comment.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}\t{}", self.name, self.comment)
        }
    }
}

/// Renders a `#list` response body: one line per module, via `Display`, with
/// no trailing terminator line (the terminator is a protocol-level concern
/// handled by the caller via the `INFO`-tagged lines plus close).
#[must_use]
pub fn render_module_list(modules: &[ModuleListing]) -> Vec<String> {
    modules.iter().map(ToString::to_string).collect()
}

/// The request line a client sends after the greeting: either a module name
/// or the literal `#list`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModuleRequest {
    /// List available modules.
    List,
    /// Select the named module.
    Named(String),
}

impl ModuleRequest {
    /// Parses a client's post-greeting request line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "#list" {
            Self::List
        } else {
            Self::Named(trimmed.to_string())
        }
    }
}

/// Formats the `@RSYNCD: AUTH REQD <challenge>\n` line the server sends when
/// a module requires authentication.
#[must_use]
pub fn format_auth_challenge(challenge: &str) -> String {
    format!("{GREETING_PREFIX} AUTH REQD {challenge}\n")
}

/// Parses the `<user> <response>\n` line a client sends in reply to an auth
/// challenge. An empty line (no user, no response) parses as empty strings,
/// which callers must reject as invalid credentials rather than treating as
/// a parse failure, matching the stock protocol's handling of blank input.
#[must_use]
pub fn parse_auth_response(line: &str) -> (String, String) {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    match trimmed.split_once(' ') {
        Some((user, response)) => (user.to_string(), response.to_string()),
        None => (String::new(), String::new()),
    }
}

/// The `@RSYNCD: OK\n` line sent after successful module selection or
/// authentication.
pub const OK_LINE: &str = "@RSYNCD: OK\n";

/// The `@RSYNCD: EXIT\n` line that terminates a pre-transfer session, sent
/// after a `#list` response or following a fatal `@ERROR:` line.
pub const EXIT_LINE: &str = "@RSYNCD: EXIT\n";

/// Formats the `@ERROR: <message>\n` line sent for a fatal, pre-transfer
/// failure (module not found, auth denied).
#[must_use]
pub fn format_error_line(message: &str) -> String {
    format!("@ERROR: {message}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_round_trips_through_its_wire_line() {
        let greeting = Greeting::for_version(31, &["md5", "md4"]);
        let line = greeting.to_line();
        assert_eq!(line, "@RSYNCD: 31.0 md5 md4\n");
        assert_eq!(Greeting::parse(&line).unwrap(), greeting);
    }

    #[test]
    fn greeting_below_digest_version_has_no_digests() {
        let greeting = Greeting::for_version(29, &["md5", "md4"]);
        assert_eq!(greeting.to_line(), "@RSYNCD: 29.0\n");
        assert!(greeting.digests.is_empty());
    }

    #[test]
    fn greeting_parse_tolerates_extra_whitespace() {
        let greeting = Greeting::parse("@RSYNCD:  31.0  \n").unwrap();
        assert_eq!(greeting.version, 31);
        assert!(greeting.digests.is_empty());
    }

    #[test]
    fn greeting_parse_accepts_bare_major_version() {
        let greeting = Greeting::parse("@RSYNCD: 29\n").unwrap();
        assert_eq!(greeting.version, 29);
    }

    #[test]
    fn greeting_parse_rejects_wrong_prefix() {
        let err = Greeting::parse("RSYNCD: 31.0\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidGreeting(_)));
    }

    #[test]
    fn greeting_parse_rejects_non_numeric_version() {
        let err = Greeting::parse("@RSYNCD: abc\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidGreeting(_)));
    }

    #[test]
    fn negotiate_picks_the_lower_version() {
        assert_eq!(negotiate_version(31, 29).unwrap(), 29);
        assert_eq!(negotiate_version(29, 31).unwrap(), 29);
    }

    #[test]
    fn negotiate_rejects_versions_outside_supported_range() {
        let err = negotiate_version(31, 10).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { peer: 10, .. }));
    }

    #[test]
    fn module_request_recognizes_list() {
        assert_eq!(ModuleRequest::parse("#list\n"), ModuleRequest::List);
        assert_eq!(
            ModuleRequest::parse("data\n"),
            ModuleRequest::Named("data".to_string())
        );
    }

    #[test]
    fn module_listing_formats_name_and_comment() {
        let with_comment = ModuleListing { name: "data".into(), comment: "shared data".into() };
        assert_eq!(with_comment.to_string(), "data\tshared data");

        let without_comment = ModuleListing { name: "data".into(), comment: String::new() };
        assert_eq!(without_comment.to_string(), "data");
    }

    #[test]
    fn auth_challenge_line_has_expected_shape() {
        assert_eq!(
            format_auth_challenge("abc123"),
            "@RSYNCD: AUTH REQD abc123\n"
        );
    }

    #[test]
    fn auth_response_parses_user_and_digest() {
        let (user, response) = parse_auth_response("alice dGhpcyBpcyBhIHRlc3Q\n");
        assert_eq!(user, "alice");
        assert_eq!(response, "dGhpcyBpcyBhIHRlc3Q");
    }

    #[test]
    fn auth_response_empty_line_parses_as_empty_credentials() {
        let (user, response) = parse_auth_response("\n");
        assert_eq!(user, "");
        assert_eq!(response, "");
    }

    #[test]
    fn error_line_has_expected_shape() {
        assert_eq!(
            format_error_line("Unknown module 'nope'"),
            "@ERROR: Unknown module 'nope'\n"
        );
    }
}
