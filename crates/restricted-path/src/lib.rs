#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Purely lexical, `stat`-free path resolution bound to a module root.
//!
//! [`RestrictedPath`] is constructed once per configured module and never
//! touches the filesystem: it only ever manipulates path *text*, so it
//! cannot be fooled by symlinks, bind mounts, or any other out-of-band
//! filesystem state a peer might have staged. The guarantee it provides is
//! purely syntactic: for every candidate a peer sends, [`RestrictedPath::resolve`]
//! either returns a path that is lexically `root` or a descendant of it, or
//! it fails with [`SecurityError`]. There is no third outcome.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Separator a candidate path is split on. The core only ships the Unix
/// separator; a non-default filesystem provider would
/// plug in an alternate [`Separator`] without touching the resolution
/// algorithm itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Separator {
    /// `/`, the separator for every filesystem this core ships support for.
    Slash,
}

impl Separator {
    const fn as_char(self) -> char {
        match self {
            Self::Slash => '/',
        }
    }
}

/// Errors raised while resolving a candidate path against a module root.
///
/// Every variant corresponds to a distinct way the resolution algorithm can reject a
/// candidate; callers that only care about "did this escape the sandbox"
/// can match `Err(_)` uniformly, but the taxonomy lets a session log the
/// specific reason.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SecurityError {
    /// The candidate text could not be parsed as a path at all (e.g. it
    /// contains an embedded NUL byte).
    #[error("candidate path is not a valid path: {0:?}")]
    InvalidPath(String),
    /// The normalized candidate's leading segment did not name this
    /// module, so there is no virtual directory for it to be resolved
    /// against.
    #[error("path {0:?} is outside the virtual directory for module {1:?}")]
    OutsideVirtualDir(String, String),
    /// The final, root-joined path still contained a `..` segment after
    /// normalization -- the defense-in-depth check of step 5.
    #[error("resolved path for {0:?} still contains a parent-directory segment")]
    EscapesRoot(String),
}

/// A module's identity and sandbox root, resolved once at configuration
/// load time and shared read-only by every session for that module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestrictedPath {
    module_name: String,
    root: PathBuf,
    separator: Separator,
}

/// The result of resolving a candidate: a root-bound filesystem path plus
/// whether the caller asked for "directory request" semantics.
///
/// A trailing dot-segment in the *input*
/// (e.g. `"data/sub/."`, matching rsync's own `/.`-suffix convention for
/// "copy the directory's contents") is preserved on the output as a
/// `dir_request` flag rather than literally appended to the path: this
/// keeps [`path`](Self::path) a normal, comparable [`PathBuf`] while still
/// letting callers distinguish "the directory itself" from "a file with
/// this exact name" without re-parsing the candidate text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPath {
    path: PathBuf,
    dir_request: bool,
}

impl ResolvedPath {
    /// The resolved, root-bound filesystem path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the original candidate ended in a bare `.` segment, marking
    /// this as a request for the directory's contents rather than the
    /// directory entry itself.
    #[must_use]
    pub const fn is_dir_request(&self) -> bool {
        self.dir_request
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl RestrictedPath {
    /// Builds a resolver for `module_name` rooted at `root`.
    ///
    /// `root` is trusted to already be absolute and normalized (callers
    /// derive it from validated configuration); this constructor does
    /// not re-validate it.
    #[must_use]
    pub fn new(module_name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            module_name: module_name.into(),
            root: root.into(),
            separator: Separator::Slash,
        }
    }

    /// The module name this resolver is bound to.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The module's sandbox root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `candidate` against this module's root.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError`] if `candidate` cannot be parsed, if it
    /// lexically escapes this module's virtual directory, or if (after
    /// joining with `root`) the result still contains a `..` segment.
    pub fn resolve(&self, candidate: &str) -> Result<ResolvedPath, SecurityError> {
        if candidate.as_bytes().contains(&0) {
            return Err(SecurityError::InvalidPath(candidate.to_owned()));
        }

        let dir_request = ends_in_dot_segment(candidate, self.separator);
        let normalized = normalize(candidate, self.separator);

        let mut segments = normalized.split('/').filter(|s| !s.is_empty());
        let Some(first) = segments.next() else {
            return Err(SecurityError::OutsideVirtualDir(
                candidate.to_owned(),
                self.module_name.clone(),
            ));
        };
        if first != self.module_name {
            return Err(SecurityError::OutsideVirtualDir(
                candidate.to_owned(),
                self.module_name.clone(),
            ));
        }

        let remainder: Vec<&str> = segments.collect();
        let mut joined = self.root.clone();
        for seg in &remainder {
            joined.push(seg);
        }

        let joined_text = joined.to_string_lossy();
        if joined_text.split('/').any(|s| s == "..") {
            return Err(SecurityError::EscapesRoot(candidate.to_owned()));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(module = %self.module_name, candidate, resolved = %joined.display(), "resolved restricted path");

        Ok(ResolvedPath { path: joined, dir_request })
    }
}

/// Whether `candidate`'s final path segment is a bare `.`.
fn ends_in_dot_segment(candidate: &str, separator: Separator) -> bool {
    let sep = separator.as_char();
    let trimmed = candidate.trim_end_matches(sep);
    match trimmed.rsplit(sep).next() {
        Some(last) => last == ".",
        None => false,
    }
}

/// Collapses `.` segments and resolves `..` segments lexically, never
/// touching the filesystem. A leading separator is treated as a no-op
/// (this is a virtual path space with no filesystem root of its own); a
/// `..` that would pop past the start of the candidate is kept verbatim so
/// the caller's "first segment must equal module_name" check rejects it.
fn normalize(candidate: &str, separator: Separator) -> String {
    let sep = separator.as_char();
    let mut stack: Vec<&str> = Vec::new();
    for segment in candidate.split(sep) {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(stack.last(), Some(&top) if top != "..") {
                    stack.pop();
                } else {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    stack.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_module() -> RestrictedPath {
        RestrictedPath::new("data", "/srv/data")
    }

    #[test]
    fn s1_bare_module_name_resolves_to_root() {
        let resolved = data_module().resolve("data").unwrap();
        assert_eq!(resolved.path(), Path::new("/srv/data"));
    }

    #[test]
    fn s2_dot_and_dotdot_collapse_within_bounds() {
        let resolved = data_module().resolve("data/./sub/../x").unwrap();
        assert_eq!(resolved.path(), Path::new("/srv/data/x"));
    }

    #[test]
    fn s3_dotdot_escape_past_module_root_is_rejected() {
        let err = data_module().resolve("data/../etc/passwd").unwrap_err();
        assert!(matches!(err, SecurityError::OutsideVirtualDir(_, _)));
    }

    #[test]
    fn s4_sibling_name_prefixed_by_module_name_is_rejected() {
        let err = data_module().resolve("data2/x").unwrap_err();
        assert!(matches!(err, SecurityError::OutsideVirtualDir(_, _)));
    }

    #[test]
    fn rejects_embedded_nul_byte() {
        let err = data_module().resolve("data/\0evil").unwrap_err();
        assert!(matches!(err, SecurityError::InvalidPath(_)));
    }

    #[test]
    fn leading_separator_is_treated_as_virtual_relative() {
        let resolved = data_module().resolve("/data/x").unwrap();
        assert_eq!(resolved.path(), Path::new("/srv/data/x"));
    }

    #[test]
    fn percent_encoded_dotdot_is_inert_literal_text() {
        // No URL-decoding happens anywhere in this resolver, so a
        // percent-encoded traversal attempt is just an ordinary (safe)
        // path segment, not a `..` in disguise.
        let resolved = data_module().resolve("data/%2e%2e/x").unwrap();
        assert_eq!(resolved.path(), Path::new("/srv/data/%2e%2e/x"));
    }

    #[test]
    fn deeply_nested_dotdot_still_escapes_cleanly() {
        let err = data_module()
            .resolve("data/a/b/c/../../../../../../etc/shadow")
            .unwrap_err();
        assert!(matches!(err, SecurityError::OutsideVirtualDir(_, _)));
    }

    #[test]
    fn trailing_dot_segment_is_preserved_as_dir_request() {
        let resolved = data_module().resolve("data/sub/.").unwrap();
        assert_eq!(resolved.path(), Path::new("/srv/data/sub"));
        assert!(resolved.is_dir_request());
    }

    #[test]
    fn plain_file_request_is_not_a_dir_request() {
        let resolved = data_module().resolve("data/sub").unwrap();
        assert!(!resolved.is_dir_request());
    }

    #[test]
    fn bare_dotdot_at_the_root_is_rejected() {
        let err = data_module().resolve("..").unwrap_err();
        assert!(matches!(err, SecurityError::OutsideVirtualDir(_, _)));
    }

    #[test]
    fn module_name_cancelled_by_its_own_dotdot_is_rejected() {
        // "data/.." normalizes to the empty string: there is no segment
        // left to compare against the module name, so this must fail
        // rather than silently resolve to the root.
        let err = data_module().resolve("data/..").unwrap_err();
        assert!(matches!(err, SecurityError::OutsideVirtualDir(_, _)));
    }

    #[test]
    fn idempotent_on_an_already_resolved_candidate() {
        let module = data_module();
        let first = module.resolve("data/./sub/../x").unwrap();

        // Re-express the already-resolved, already-normalized path as a
        // fresh virtual candidate (module name + its root-relative tail)
        // and resolve it again: normalizing an already-normalized path is
        // a no-op, so the second resolution must agree with the first.
        let tail = first
            .path()
            .strip_prefix(module.root())
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let candidate2 = format!("{}/{}", module.module_name(), tail);
        let second = module.resolve(&candidate2).unwrap();

        assert_eq!(first.path(), second.path());
    }

    proptest::proptest! {
        #[test]
        fn resolved_path_is_always_root_or_descendant(
            segments in proptest::collection::vec("[a-zA-Z0-9_.]{0,4}", 0..8)
        ) {
            let module = data_module();
            let mut candidate = String::from("data");
            for seg in &segments {
                candidate.push('/');
                candidate.push_str(seg);
            }

            if let Ok(resolved) = module.resolve(&candidate) {
                proptest::prop_assert!(
                    resolved.path() == module.root() || resolved.path().starts_with(module.root())
                );
            }
        }
    }
}
