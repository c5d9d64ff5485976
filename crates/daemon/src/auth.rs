//! Challenge/response authentication for modules with `auth users` set,
//! and the `secrets file` lookup that backs it.
//!
//! Scoped to MD5 and MD4, the two strong digests the workspace's
//! [`checksums`] crate implements (see `DESIGN.md` for why this diverges
//! from upstream rsync's five-digest negotiation).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use checksums::strong::StrongDigest;
use thiserror::Error;

/// Digest algorithms this daemon accepts for challenge/response auth.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DaemonAuthDigest {
    /// RSA Data Security MD5, the historical default.
    Md5,
    /// RSA Data Security MD4, accepted for very old clients.
    Md4,
}

/// Ordered strongest-first; used for the greeting's digest advertisement and
/// for picking a digest when a client names none.
pub const SUPPORTED_DAEMON_DIGESTS: &[DaemonAuthDigest; 2] =
    &[DaemonAuthDigest::Md5, DaemonAuthDigest::Md4];

impl DaemonAuthDigest {
    /// The token advertised in the greeting line and accepted in config.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Md4 => "md4",
        }
    }

    /// Length of the base64 (no-pad) encoded digest.
    #[must_use]
    pub const fn base64_len(self) -> usize {
        22
    }

    fn digest_bytes(self, secret: &[u8], challenge: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(secret.len() + challenge.len());
        buf.extend_from_slice(secret);
        buf.extend_from_slice(challenge);
        match self {
            Self::Md5 => checksums::strong::Md5::truncated(&buf, 16),
            Self::Md4 => checksums::strong::Md4::truncated(&buf, 16),
        }
    }
}

/// Parses a whitespace-separated digest name list, as advertised in a
/// greeting line, dropping unrecognized names.
#[must_use]
pub fn parse_digest_list(names: &str) -> Vec<DaemonAuthDigest> {
    names
        .split_whitespace()
        .filter_map(|token| match token.to_ascii_lowercase().as_str() {
            "md5" => Some(DaemonAuthDigest::Md5),
            "md4" => Some(DaemonAuthDigest::Md4),
            _ => None,
        })
        .collect()
}

/// Picks the strongest digest both sides support, falling back to MD5 when
/// the advertised list names nothing this daemon recognizes.
#[must_use]
pub fn select_daemon_digest(advertised: &[DaemonAuthDigest]) -> DaemonAuthDigest {
    SUPPORTED_DAEMON_DIGESTS
        .iter()
        .copied()
        .find(|candidate| advertised.contains(candidate))
        .unwrap_or(DaemonAuthDigest::Md5)
}

/// Computes the base64 (no-pad) encoded response a client would send for
/// `secret` and `challenge` under `digest`.
#[must_use]
pub fn compute_daemon_auth_response(secret: &[u8], challenge: &str, digest: DaemonAuthDigest) -> String {
    STANDARD_NO_PAD.encode(digest.digest_bytes(secret, challenge.as_bytes()))
}

/// Verifies a client's response against every digest this daemon supports,
/// since the client does not state which one it used.
#[must_use]
pub fn verify_daemon_auth_response(secret: &[u8], challenge: &str, response: &str) -> bool {
    SUPPORTED_DAEMON_DIGESTS
        .iter()
        .any(|&digest| compute_daemon_auth_response(secret, challenge, digest) == response)
}

/// Errors raised while loading a `secrets file`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The file could not be read.
    #[error("reading secrets file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is readable by users other than its owner, matching
    /// upstream rsync's refusal to trust a world- or group-readable secrets
    /// file (checked on Unix only).
    #[error("secrets file {0} must not be accessible by group or other")]
    InsecurePermissions(String),
    /// A non-blank line was not of the form `user:password`.
    #[error("malformed secrets file line: {0:?}")]
    MalformedLine(String),
}

/// `user -> password` pairs loaded from a `secrets file` directive.
#[derive(Clone, Debug, Default)]
pub struct SecretsFile {
    secrets: HashMap<String, String>,
}

impl SecretsFile {
    /// Loads and parses a secrets file, rejecting one with unsafe
    /// permissions.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`], [`AuthError::InsecurePermissions`], or
    /// [`AuthError::MalformedLine`].
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        check_permissions(path)?;
        let contents = fs::read_to_string(path)?;
        let mut secrets = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, password) = line
                .split_once(':')
                .ok_or_else(|| AuthError::MalformedLine(line.to_string()))?;
            secrets.insert(user.to_string(), password.to_string());
        }
        Ok(Self { secrets })
    }

    /// Looks up the password configured for `user`, if any.
    #[must_use]
    pub fn secret_for(&self, user: &str) -> Option<&str> {
        self.secrets.get(user).map(String::as_str)
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(AuthError::InsecurePermissions(path.display().to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), AuthError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn response_round_trips_through_verify() {
        let response = compute_daemon_auth_response(b"hunter2", "challenge123", DaemonAuthDigest::Md5);
        assert!(verify_daemon_auth_response(b"hunter2", "challenge123", &response));
        assert!(!verify_daemon_auth_response(b"wrong", "challenge123", &response));
    }

    #[test]
    fn select_digest_falls_back_to_md5_for_unknown_advertisement() {
        assert_eq!(select_daemon_digest(&[]), DaemonAuthDigest::Md5);
        assert_eq!(
            select_daemon_digest(&[DaemonAuthDigest::Md4]),
            DaemonAuthDigest::Md4
        );
    }

    #[test]
    fn parse_digest_list_ignores_unknown_tokens() {
        let digests = parse_digest_list("md5 sha512 md4");
        assert_eq!(digests, vec![DaemonAuthDigest::Md5, DaemonAuthDigest::Md4]);
    }

    #[cfg(unix)]
    #[test]
    fn secrets_file_rejects_world_readable_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.txt");
        fs::write(&path, "alice:password\n").unwrap();
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = SecretsFile::load(&path).unwrap_err();
        assert!(matches!(err, AuthError::InsecurePermissions(_)));
    }

    #[cfg(unix)]
    #[test]
    fn secrets_file_loads_with_safe_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.txt");
        fs::write(&path, "alice:password\n").unwrap();
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let secrets = SecretsFile::load(&path).unwrap();
        assert_eq!(secrets.secret_for("alice"), Some("password"));
        assert_eq!(secrets.secret_for("bob"), None);
    }
}
