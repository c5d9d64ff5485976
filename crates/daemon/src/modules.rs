//! The `Modules` collaborator: the single point through which
//! the session driver looks up a module by name, enforces its host ACL,
//! authenticates a client against its secrets file, and acquires a
//! connection-count slot before handing back a sandboxed path resolver.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use protocol::negotiation::ModuleListing;
use restricted_path::RestrictedPath;

use crate::auth::{verify_daemon_auth_response, SecretsFile};
use crate::error::ModuleError;
use crate::hostacl::is_allowed;
use crate::module::{ConnectionGuard, ConnectionLimiter, ModuleDef};

/// The set of modules a running daemon serves, plus the shared connection
/// limiter every module's `max connections` directive draws from.
pub struct Modules {
    defs: Vec<ModuleDef>,
    limiter: Arc<ConnectionLimiter>,
}

impl Modules {
    /// Builds a registry from parsed module definitions, preserving their
    /// configuration-file order for `#list` output.
    #[must_use]
    pub fn new(defs: Vec<ModuleDef>, limiter: Arc<ConnectionLimiter>) -> Self {
        Self { defs, limiter }
    }

    /// Looks up a module by name, independent of any access control.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleDef> {
        self.defs.iter().find(|module| module.name == name)
    }

    /// The `#list` response body: every listable module the given peer is
    /// permitted to see, in configuration order.
    #[must_use]
    pub fn listing_for(&self, peer: Option<SocketAddr>) -> Vec<ModuleListing> {
        self.defs
            .iter()
            .filter(|module| module.listable())
            .filter(|module| host_permitted(module, peer))
            .map(|module| ModuleListing {
                name: module.name.clone(),
                comment: module.comment.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Selects a module by name for a connecting peer, checking that it
    /// exists and that the peer's address clears its `hosts allow`/`hosts
    /// deny` lists.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] if no such module is configured, or
    /// [`ModuleError::Unconfigured`] if the peer's address is excluded.
    pub fn select(&self, name: &str, peer: Option<SocketAddr>) -> Result<&ModuleDef, ModuleError> {
        let module = self.get(name).ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        if host_permitted(module, peer) {
            Ok(module)
        } else {
            Err(ModuleError::Unconfigured(name.to_string()))
        }
    }

    /// Acquires a connection slot for `module`, if it has a `max
    /// connections` limit configured. Returns `None` for an unlimited
    /// module; the caller holds the returned guard for the session's
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::ConnectionLimitReached`] if the module is
    /// already at capacity.
    pub fn acquire_connection(&self, module: &ModuleDef) -> Result<Option<ConnectionGuard>, ModuleError> {
        match module.max_connections() {
            Some(limit) => Ok(Some(self.limiter.acquire(&module.name, limit)?)),
            None => Ok(None),
        }
    }

    /// Verifies a client's challenge/response credentials against `module`'s
    /// `auth users` and `secrets file`. A module with no `auth users`
    /// configured always succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::AccessDenied`] if the user is not listed, the
    /// secrets file cannot be loaded, or the response does not match.
    pub fn authenticate(
        &self,
        module: &ModuleDef,
        user: &str,
        challenge: &str,
        response: &str,
    ) -> Result<(), ModuleError> {
        if !module.requires_auth() {
            return Ok(());
        }
        if !module.auth_users().iter().any(|allowed| allowed == user) {
            return Err(ModuleError::AccessDenied);
        }
        let secrets_path = module.secrets_file().ok_or(ModuleError::AccessDenied)?;
        let secrets = SecretsFile::load(secrets_path).map_err(|_| ModuleError::AccessDenied)?;
        let secret = secrets.secret_for(user).ok_or(ModuleError::AccessDenied)?;
        if verify_daemon_auth_response(secret.as_bytes(), challenge, response) {
            Ok(())
        } else {
            Err(ModuleError::AccessDenied)
        }
    }

    /// Builds the sandboxed path resolver for `module`.
    #[must_use]
    pub fn resolver_for(module: &ModuleDef) -> RestrictedPath {
        RestrictedPath::new(module.name.clone(), module.path.clone())
    }
}

fn host_permitted(module: &ModuleDef, peer: Option<SocketAddr>) -> bool {
    match peer.map(SocketAddr::ip) {
        Some(IpAddr::V4(addr)) => is_allowed(&module.hosts_allow, &module.hosts_deny, addr),
        // The ACL is IPv4-only (`hostacl` scope); an IPv6 peer or an
        // unknown address (e.g. a loopback pipe in tests) is never denied
        // by it.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::num::NonZeroU32;

    fn limiter() -> Arc<ConnectionLimiter> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(ConnectionLimiter::open(dir.path().join("daemon.lock")).unwrap())
    }

    fn peer(addr: [u8; 4]) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), 1234)
    }

    #[test]
    fn select_rejects_unknown_module() {
        let modules = Modules::new(vec![], limiter());
        let err = modules.select("nope", None).unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)));
    }

    #[test]
    fn select_enforces_host_deny() {
        let mut module = ModuleDef::new("data", "/srv/data");
        module.hosts_deny = vec![crate::hostacl::HostPattern::parse("10.0.0.1").unwrap()];
        let modules = Modules::new(vec![module], limiter());

        assert!(modules.select("data", Some(peer([10, 0, 0, 1]))).is_err());
        assert!(modules.select("data", Some(peer([10, 0, 0, 2]))).is_ok());
    }

    #[test]
    fn listing_excludes_unlistable_modules() {
        let mut hidden = ModuleDef::new("secret", "/srv/secret");
        hidden.set_listable(false);
        let visible = ModuleDef::new("data", "/srv/data");
        let modules = Modules::new(vec![hidden, visible], limiter());

        let listing = modules.listing_for(None);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "data");
    }

    #[test]
    fn authenticate_without_auth_users_always_succeeds() {
        let module = ModuleDef::new("data", "/srv/data");
        let modules = Modules::new(vec![], limiter());
        assert!(modules.authenticate(&module, "anyone", "chal", "resp").is_ok());
    }

    #[test]
    fn acquire_connection_respects_limit() {
        let mut module = ModuleDef::new("data", "/srv/data");
        module.set_max_connections(1);
        let modules = Modules::new(vec![module.clone()], limiter());

        let first = modules.acquire_connection(&module).unwrap();
        assert!(first.is_some());
        let err = modules.acquire_connection(&module).unwrap_err();
        assert!(matches!(err, ModuleError::ConnectionLimitReached(_)));
    }
}
