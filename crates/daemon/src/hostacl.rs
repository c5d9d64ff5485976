//! IPv4 CIDR matching for the `hosts allow` / `hosts deny` module directives.

use std::net::Ipv4Addr;

use thiserror::Error;

/// A single entry in a `hosts allow` / `hosts deny` list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostPattern {
    /// An IPv4 network, `addr/prefix`. A bare address parses with `prefix == 32`.
    Ipv4 {
        /// Network address (host bits are not required to be zeroed).
        addr: Ipv4Addr,
        /// CIDR prefix length, `0..=32`.
        prefix: u8,
    },
}

/// Errors raised while parsing a `hosts allow` / `hosts deny` directive value.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HostAclError {
    /// A token was not a valid IPv4 address or `address/prefix` pair.
    #[error("invalid host pattern {0:?}")]
    InvalidPattern(String),
    /// A `/prefix` suffix was not a valid integer in `0..=32`.
    #[error("invalid CIDR prefix in host pattern {0:?}")]
    InvalidPrefix(String),
}

impl HostPattern {
    /// Parses one comma-list token, e.g. `"192.168.0.0/24"` or `"127.0.0.1"`.
    ///
    /// # Errors
    ///
    /// Returns [`HostAclError`] if the token is not a valid IPv4 address, with
    /// an optional `/prefix` suffix in `0..=32`.
    pub fn parse(token: &str) -> Result<Self, HostAclError> {
        let token = token.trim();
        match token.split_once('/') {
            Some((addr, prefix)) => {
                let addr: Ipv4Addr = addr
                    .parse()
                    .map_err(|_| HostAclError::InvalidPattern(token.to_string()))?;
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| HostAclError::InvalidPrefix(token.to_string()))?;
                if prefix > 32 {
                    return Err(HostAclError::InvalidPrefix(token.to_string()));
                }
                Ok(Self::Ipv4 { addr, prefix })
            }
            None => {
                let addr: Ipv4Addr = token
                    .parse()
                    .map_err(|_| HostAclError::InvalidPattern(token.to_string()))?;
                Ok(Self::Ipv4 { addr, prefix: 32 })
            }
        }
    }

    /// Reports whether `candidate` falls inside this pattern's network.
    #[must_use]
    pub fn matches(&self, candidate: Ipv4Addr) -> bool {
        let Self::Ipv4 { addr, prefix } = *self;
        if prefix == 0 {
            return true;
        }
        let mask = u32::MAX << (32 - u32::from(prefix));
        (u32::from(addr) & mask) == (u32::from(candidate) & mask)
    }
}

/// Parses a comma-separated `hosts allow` / `hosts deny` directive value.
///
/// # Errors
///
/// Returns [`HostAclError`] if any comma-separated token fails to parse.
pub fn parse_list(value: &str) -> Result<Vec<HostPattern>, HostAclError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(HostPattern::parse)
        .collect()
}

/// Applies the classic rsyncd.conf precedence: an empty `allow` list permits
/// everyone; a non-empty one is a whitelist. `deny` always excludes a
/// matching address, even one also present in `allow`.
#[must_use]
pub fn is_allowed(allow: &[HostPattern], deny: &[HostPattern], candidate: Ipv4Addr) -> bool {
    let allowed = allow.is_empty() || allow.iter().any(|p| p.matches(candidate));
    let denied = deny.iter().any(|p| p.matches(candidate));
    allowed && !denied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_address_as_slash_32() {
        let pattern = HostPattern::parse("127.0.0.1").unwrap();
        assert_eq!(
            pattern,
            HostPattern::Ipv4 { addr: Ipv4Addr::new(127, 0, 0, 1), prefix: 32 }
        );
    }

    #[test]
    fn parses_cidr_network() {
        let pattern = HostPattern::parse("192.168.0.0/24").unwrap();
        assert_eq!(
            pattern,
            HostPattern::Ipv4 { addr: Ipv4Addr::new(192, 168, 0, 0), prefix: 24 }
        );
    }

    #[test]
    fn rejects_garbage_and_bad_prefix() {
        assert!(HostPattern::parse("not-an-address").is_err());
        assert!(HostPattern::parse("10.0.0.0/99").is_err());
    }

    #[test]
    fn matches_within_network_only() {
        let pattern = HostPattern::Ipv4 { addr: Ipv4Addr::new(192, 168, 0, 0), prefix: 24 };
        assert!(pattern.matches(Ipv4Addr::new(192, 168, 0, 5)));
        assert!(!pattern.matches(Ipv4Addr::new(192, 168, 1, 5)));
    }

    #[test]
    fn deny_overrides_allow_for_the_same_address() {
        let allow = vec![HostPattern::parse("192.168.0.0/24").unwrap()];
        let deny = vec![HostPattern::parse("192.168.0.5").unwrap()];
        assert!(is_allowed(&allow, &deny, Ipv4Addr::new(192, 168, 0, 4)));
        assert!(!is_allowed(&allow, &deny, Ipv4Addr::new(192, 168, 0, 5)));
    }

    #[test]
    fn empty_allow_list_permits_everyone_not_denied() {
        let deny = vec![HostPattern::parse("10.0.0.1").unwrap()];
        assert!(is_allowed(&[], &deny, Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_allowed(&[], &deny, Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn parse_list_splits_on_commas_and_trims_whitespace() {
        let list = parse_list("127.0.0.1, 192.168.0.0/24").unwrap();
        assert_eq!(list.len(), 2);
    }
}
