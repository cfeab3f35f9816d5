// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_enum::TryFromPrimitive;
use std::collections::BTreeSet;
use std::fmt::{self, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// RTR protocol versions this database can serve.
///
/// The database is version-aware because the payload set a router may
/// receive depends on the negotiated protocol version: router keys only
/// exist on the wire from version 1 onward (RFC 8210), and each version is
/// handed its own session id.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// RFC 6810.
    V0 = 0,
    /// RFC 8210.
    V1 = 1,
}

impl ProtocolVersion {
    /// Router Key PDUs exist from version 1 onward.
    pub fn supports_router_keys(self) -> bool {
        self >= ProtocolVersion::V1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParsePrefixError {
    #[error("prefix must be written as address/length")]
    NoSlash,

    #[error("bad address in prefix")]
    Addr,

    #[error("bad prefix length")]
    Length,

    #[error("prefix length {0} too long for the address family")]
    TooLong(u8),
}

fn split_prefix(s: &str) -> Result<(&str, u8), ParsePrefixError> {
    let (addr, length) =
        s.rsplit_once('/').ok_or(ParsePrefixError::NoSlash)?;
    let length = length.parse().map_err(|_| ParsePrefixError::Length)?;
    Ok((addr, length))
}

/// An IPv4 prefix: a network address and its bit length.
///
/// Construction always canonicalizes, dropping every address bit below
/// the prefix length, so two prefixes covering the same network compare
/// equal no matter how they were written.
///
/// ```
/// use vdb::Prefix4;
/// let p = Prefix4::new("203.0.113.77".parse().unwrap(), 24);
/// assert_eq!(p.to_string(), "203.0.113.0/24");
/// ```
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Prefix4 {
    pub addr: Ipv4Addr,
    pub length: u8,
}

impl Prefix4 {
    pub const MAX_LENGTH: u8 = 32;

    pub fn new(addr: Ipv4Addr, length: u8) -> Self {
        let length = length.min(Self::MAX_LENGTH);
        // Shift the host bits out and back in; a full-width shift (a /0)
        // would overflow, so it short-circuits to the zero address.
        let host = u32::from(Self::MAX_LENGTH - length);
        let network = u32::from(addr)
            .checked_shr(host)
            .map_or(0, |net| net << host);
        Self {
            addr: Ipv4Addr::from(network),
            length,
        }
    }

    /// Whether the address is already the network address for this
    /// length.
    pub fn is_canonical(&self) -> bool {
        *self == Self::new(self.addr, self.length)
    }
}

impl fmt::Display for Prefix4 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = ParsePrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, length) = split_prefix(s)?;
        let addr = addr.parse().map_err(|_| ParsePrefixError::Addr)?;
        if length > Self::MAX_LENGTH {
            return Err(ParsePrefixError::TooLong(length));
        }
        Ok(Self::new(addr, length))
    }
}

/// An IPv6 prefix. Same canonicalization contract as [`Prefix4`].
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Prefix6 {
    pub addr: Ipv6Addr,
    pub length: u8,
}

impl Prefix6 {
    pub const MAX_LENGTH: u8 = 128;

    pub fn new(addr: Ipv6Addr, length: u8) -> Self {
        let length = length.min(Self::MAX_LENGTH);
        let host = u32::from(Self::MAX_LENGTH - length);
        let network = u128::from(addr)
            .checked_shr(host)
            .map_or(0, |net| net << host);
        Self {
            addr: Ipv6Addr::from(network),
            length,
        }
    }

    /// Whether the address is already the network address for this
    /// length.
    pub fn is_canonical(&self) -> bool {
        *self == Self::new(self.addr, self.length)
    }
}

impl fmt::Display for Prefix6 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.length)
    }
}

impl FromStr for Prefix6 {
    type Err = ParsePrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, length) = split_prefix(s)?;
        let addr = addr.parse().map_err(|_| ParsePrefixError::Addr)?;
        if length > Self::MAX_LENGTH {
            return Err(ParsePrefixError::TooLong(length));
        }
        Ok(Self::new(addr, length))
    }
}

/// A prefix of either address family.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Prefix {
    V4(Prefix4),
    V6(Prefix6),
}

impl Prefix {
    pub fn new(addr: IpAddr, length: u8) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::V4(Prefix4::new(v4, length)),
            IpAddr::V6(v6) => Self::V6(Prefix6::new(v6, length)),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::V4(p) => p.fmt(f),
            Prefix::V6(p) => p.fmt(f),
        }
    }
}

impl From<Prefix4> for Prefix {
    fn from(value: Prefix4) -> Self {
        Self::V4(value)
    }
}

impl From<Prefix6> for Prefix {
    fn from(value: Prefix6) -> Self {
        Self::V6(value)
    }
}

impl FromStr for Prefix {
    type Err = ParsePrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, length) = split_prefix(s)?;
        let addr: IpAddr =
            addr.parse().map_err(|_| ParsePrefixError::Addr)?;
        let max = match addr {
            IpAddr::V4(_) => Prefix4::MAX_LENGTH,
            IpAddr::V6(_) => Prefix6::MAX_LENGTH,
        };
        if length > max {
            return Err(ParsePrefixError::TooLong(length));
        }
        Ok(Self::new(addr, length))
    }
}

/// A validated ROA payload: the authorization for an AS to originate a
/// prefix up to a maximum length.
///
/// Two VRPs are the same payload iff the AS, the prefix (which carries the
/// protocol family), and the maximum length all match. Insertion into a
/// [`DbTable`] is idempotent under this equality.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Vrp {
    pub asn: u32,
    pub prefix: Prefix,
    pub max_length: u8,
}

impl fmt::Display for Vrp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AS{} {} maxlen {}", self.asn, self.prefix, self.max_length)
    }
}

/// A validated BGPsec router key. Only visible to routers speaking RTR
/// version 1 or later.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct RouterKey {
    pub asn: u32,

    /// Subject key identifier, always 20 bytes on the wire.
    pub ski: [u8; 20],

    /// DER-encoded subject public key info.
    pub spki: Vec<u8>,
}

/// One record of validated RPKI data.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum Payload {
    Origin(Vrp),
    RouterKey(RouterKey),
}

impl Payload {
    /// Whether the given protocol version can carry this payload at all.
    pub fn supported_by(&self, version: ProtocolVersion) -> bool {
        match self {
            Payload::Origin(_) => true,
            Payload::RouterKey(_) => version.supports_router_keys(),
        }
    }
}

impl From<Vrp> for Payload {
    fn from(value: Vrp) -> Self {
        Self::Origin(value)
    }
}

impl From<RouterKey> for Payload {
    fn from(value: RouterKey) -> Self {
        Self::RouterKey(value)
    }
}

/// Whether a payload record is being added to or removed from a router's
/// view. Matches the RTR flags field: announce is 1, withdraw is 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Action {
    Withdraw,
    Announce,
}

impl Action {
    pub fn flag(self) -> u8 {
        match self {
            Action::Withdraw => 0,
            Action::Announce => 1,
        }
    }
}

/// The table a validation worker fills while its certificate tree is
/// traversed, and the unit the driver merges and installs.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DbTable {
    origins: BTreeSet<Vrp>,
    router_keys: BTreeSet<RouterKey>,
}

impl DbTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validated ROA payload. Returns false if the exact payload
    /// was already present.
    pub fn add_origin(&mut self, vrp: Vrp) -> bool {
        self.origins.insert(vrp)
    }

    /// Record a validated router key. Returns false if already present.
    pub fn add_router_key(&mut self, key: RouterKey) -> bool {
        self.router_keys.insert(key)
    }

    /// Union `other` into this table, collapsing duplicates.
    pub fn merge(&mut self, other: DbTable) {
        self.origins.extend(other.origins);
        self.router_keys.extend(other.router_keys);
    }

    pub fn origins(&self) -> &BTreeSet<Vrp> {
        &self.origins
    }

    pub fn router_keys(&self) -> &BTreeSet<RouterKey> {
        &self.router_keys
    }

    pub fn len(&self) -> usize {
        self.origins.len() + self.router_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty() && self.router_keys.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Vrp>, Vec<RouterKey>) {
        // BTreeSet iteration is ordered, so the vectors come out sorted
        // and deduplicated.
        (
            self.origins.into_iter().collect(),
            self.router_keys.into_iter().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn prefix_construction_is_canonical() {
        let p = Prefix4::new("192.0.2.99".parse().unwrap(), 24);
        assert_eq!(p.to_string(), "192.0.2.0/24");
        assert!(p.is_canonical());

        let p = Prefix6::new("2001:db8::1".parse().unwrap(), 32);
        assert_eq!(p.to_string(), "2001:db8::/32");
        assert!(p.is_canonical());

        // Degenerate lengths at both ends.
        let p = Prefix4::new("255.255.255.255".parse().unwrap(), 0);
        assert_eq!(p.to_string(), "0.0.0.0/0");
        let p = Prefix4::new("192.0.2.1".parse().unwrap(), 32);
        assert_eq!(p.to_string(), "192.0.2.1/32");
        let p = Prefix6::new("2001:db8::1".parse().unwrap(), 128);
        assert_eq!(p.to_string(), "2001:db8::1/128");
    }

    #[test]
    fn prefix_parse_normalizes_and_dispatches_family() {
        let p: Prefix = "10.1.2.3/8".parse().unwrap();
        assert_eq!(p.to_string(), "10.0.0.0/8");
        assert!(matches!(p, Prefix::V4(_)));

        let p: Prefix = "2001:db8:ffff::/32".parse().unwrap();
        assert_eq!(p.to_string(), "2001:db8::/32");
        assert!(matches!(p, Prefix::V6(_)));
    }

    #[test]
    fn prefix_parse_errors() {
        assert_eq!(
            "192.0.2.0".parse::<Prefix>(),
            Err(ParsePrefixError::NoSlash)
        );
        assert_eq!(
            "192.0.2.0/33".parse::<Prefix4>(),
            Err(ParsePrefixError::TooLong(33))
        );
        assert_eq!(
            "2001:db8::/129".parse::<Prefix>(),
            Err(ParsePrefixError::TooLong(129))
        );
        assert_eq!(
            "bogus/24".parse::<Prefix>(),
            Err(ParsePrefixError::Addr)
        );
        assert_eq!(
            "192.0.2.0/x".parse::<Prefix>(),
            Err(ParsePrefixError::Length)
        );
    }

    #[test]
    fn table_insert_is_idempotent() {
        let vrp = Vrp {
            asn: 64512,
            prefix: Prefix::from_str("192.0.2.0/24").unwrap(),
            max_length: 24,
        };
        let mut table = DbTable::new();
        assert!(table.add_origin(vrp));
        assert!(!table.add_origin(vrp));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn table_merge_collapses_duplicates() {
        let a = Vrp {
            asn: 64512,
            prefix: Prefix::from_str("192.0.2.0/24").unwrap(),
            max_length: 24,
        };
        let b = Vrp {
            asn: 64513,
            prefix: Prefix::from_str("198.51.100.0/24").unwrap(),
            max_length: 32,
        };

        let mut left = DbTable::new();
        left.add_origin(a);
        left.add_origin(b);

        let mut right = DbTable::new();
        right.add_origin(b);
        right.add_router_key(RouterKey {
            asn: 64512,
            ski: [7u8; 20],
            spki: vec![0x30, 0x0a],
        });

        left.merge(right);
        assert_eq!(left.origins().len(), 2);
        assert_eq!(left.router_keys().len(), 1);
    }

    #[test]
    fn router_keys_gated_by_version() {
        let key = Payload::RouterKey(RouterKey {
            asn: 1,
            ski: [0u8; 20],
            spki: vec![],
        });
        let origin = Payload::Origin(Vrp {
            asn: 1,
            prefix: Prefix::from_str("10.0.0.0/8").unwrap(),
            max_length: 8,
        });

        assert!(!key.supported_by(ProtocolVersion::V0));
        assert!(key.supported_by(ProtocolVersion::V1));
        assert!(origin.supported_by(ProtocolVersion::V0));
        assert!(origin.supported_by(ProtocolVersion::V1));
    }
}
