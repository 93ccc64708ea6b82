//! IPv4 prefix handling
//!
//! Cloud APIs and the kernel both speak CIDR strings (`a.b.c.d/len`). This
//! module provides the typed prefix used everywhere above the wire, plus
//! [`CidrCache`], the process-wide parse memo. The cache is an explicit
//! collaborator passed to whoever needs it, not a hidden global.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// An IPv4 prefix in canonical (masked) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Create a new prefix, masking the address to the prefix length.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::parse(format!(
                "prefix length {prefix_len} exceeds 32"
            )));
        }
        Ok(Self {
            address: mask_ipv4(address, prefix_len),
            prefix_len,
        })
    }

    /// Construct from parts known to already be canonical.
    ///
    /// Used for the reserved-range tables; `prefix_len` must be <= 32 and
    /// `address` must already be masked.
    pub const fn new_unchecked(address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    /// Base address of the prefix.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length (e.g. 24 for /24).
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an address is within this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == self.address
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    /// Parse from CIDR notation (e.g. "10.0.0.0/24"). A bare address is
    /// accepted as a host route (/32), matching kernel output for them.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((addr_str, len_str)) => {
                let address = Ipv4Addr::from_str(addr_str)
                    .map_err(|_| Error::parse(format!("invalid address in {s:?}")))?;
                let prefix_len = len_str
                    .parse::<u8>()
                    .map_err(|_| Error::parse(format!("invalid prefix length in {s:?}")))?;
                Self::new(address, prefix_len)
            }
            None => {
                let address = Ipv4Addr::from_str(s)
                    .map_err(|_| Error::parse(format!("invalid address {s:?}")))?;
                Self::new(address, 32)
            }
        }
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from_be_bytes(addr.octets());
    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    };
    Ipv4Addr::from((bits & mask).to_be_bytes())
}

/// Memoizing CIDR parser.
///
/// The reconcilers re-parse the same prefix strings on every sync cycle;
/// the memo keeps that off the hot path. Lifecycle is the owning
/// reconciler's lifetime, and access is single-task, so no locking.
#[derive(Debug, Default)]
pub struct CidrCache {
    cache: HashMap<String, Ipv4Cidr>,
}

impl CidrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `s`, consulting the memo first.
    pub fn parse(&mut self, s: &str) -> Result<Ipv4Cidr> {
        if let Some(cidr) = self.cache.get(s) {
            return Ok(*cidr);
        }
        let cidr = s.parse::<Ipv4Cidr>()?;
        self.cache.insert(s.to_string(), cidr);
        Ok(cidr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes_address() {
        let cidr: Ipv4Cidr = "10.0.0.7/24".parse().unwrap();
        assert_eq!(cidr.address(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.prefix_len(), 24);
        assert_eq!(cidr.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn bare_address_is_host_route() {
        let cidr: Ipv4Cidr = "192.168.1.1".parse().unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.1/32");
    }

    #[test]
    fn contains_respects_mask() {
        let cidr: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        assert!(cidr.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 1, 1)));

        let all: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/24".parse::<Ipv4Cidr>().is_err());
        assert!("not-a-cidr".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn cache_returns_same_result() {
        let mut cache = CidrCache::new();
        let first = cache.parse("172.16.0.0/12").unwrap();
        let second = cache.parse("172.16.0.0/12").unwrap();
        assert_eq!(first, second);
        assert!(cache.parse("bogus").is_err());
    }
}
