//! Hierarchical content names.
//!
//! A [`Name`] is a [`Prefix`] (an IPv4/IPv6-aligned byte pattern) plus a
//! 32-bit suffix denoting the segment index within a content. All segments
//! of one content share the prefix and differ only in suffix; names are
//! totally ordered by (prefix, suffix).

use crate::error::TransportError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Sentinel returned by indexers once the suffix space is exhausted.
pub const INVALID_SUFFIX: u32 = u32::MAX;

/// Suffixes at or above this value are reserved for RTT probes and never
/// carry application data.
pub const MIN_PROBE_SUFFIX: u32 = 0xEFFF_FFFF;

/// Address family of a name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Address length in bytes.
    pub fn addr_len(self) -> usize {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        }
    }
}

/// An address-family qualified byte pattern with a prefix length in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    family: AddressFamily,
    addr: [u8; 16],
    prefix_len: u8,
}

impl Prefix {
    /// Build a prefix from raw address bytes.
    pub fn new(
        family: AddressFamily,
        addr_bytes: &[u8],
        prefix_len: u8,
    ) -> Result<Self, TransportError> {
        let max_bits = (family.addr_len() * 8) as u8;
        if addr_bytes.len() != family.addr_len() {
            return Err(TransportError::InvalidName(format!(
                "expected {} address bytes, got {}",
                family.addr_len(),
                addr_bytes.len()
            )));
        }
        if prefix_len > max_bits {
            return Err(TransportError::InvalidName(format!(
                "prefix length {prefix_len} exceeds {max_bits} bits"
            )));
        }

        let mut addr = [0u8; 16];
        addr[..addr_bytes.len()].copy_from_slice(addr_bytes);
        Ok(Prefix {
            family,
            addr,
            prefix_len,
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Address bytes (4 or 16 depending on family).
    pub fn addr_bytes(&self) -> &[u8] {
        &self.addr[..self.family.addr_len()]
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `name` falls under this prefix (bitwise match over
    /// `prefix_len` bits).
    pub fn matches(&self, name: &Name) -> bool {
        if self.family != name.prefix.family {
            return false;
        }

        let bits = self.prefix_len as usize;
        let full_bytes = bits / 8;
        let rem_bits = bits % 8;

        if self.addr[..full_bytes] != name.prefix.addr[..full_bytes] {
            return false;
        }
        if rem_bits > 0 {
            let mask = 0xFFu8 << (8 - rem_bits);
            if (self.addr[full_bytes] & mask) != (name.prefix.addr[full_bytes] & mask) {
                return false;
            }
        }
        true
    }

    /// Mask-and-graft: keep the first `prefix_len` bits, zero the rest, and
    /// graft a 32-bit key id into the four suffix-adjacent address bytes.
    ///
    /// Used to derive the per-session name of a secure-handshake flow from
    /// the producer's published prefix.
    pub fn graft_key_id(&self, key_id: u32) -> Prefix {
        let mut addr = self.addr;
        let addr_len = self.family.addr_len();
        let bits = self.prefix_len as usize;
        let full_bytes = bits / 8;
        let rem_bits = bits % 8;

        // Zero everything beyond the prefix.
        if rem_bits > 0 && full_bytes < addr_len {
            let mask = 0xFFu8 << (8 - rem_bits);
            addr[full_bytes] &= mask;
            for byte in addr.iter_mut().take(addr_len).skip(full_bytes + 1) {
                *byte = 0;
            }
        } else {
            for byte in addr.iter_mut().take(addr_len).skip(full_bytes) {
                *byte = 0;
            }
        }

        addr[addr_len - 4..addr_len].copy_from_slice(&key_id.to_be_bytes());

        Prefix {
            family: self.family,
            addr,
            prefix_len: self.prefix_len,
        }
    }

    /// The name at `suffix` under this prefix.
    pub fn name(&self, suffix: u32) -> Name {
        Name {
            prefix: *self,
            suffix,
        }
    }
}

impl FromStr for Prefix {
    type Err = TransportError;

    /// Parse `"b001::/64"`, `"b001::abcd"`, `"10.0.0.0/24"` forms. Without
    /// an explicit length the prefix covers the full address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };

        if let Ok(v4) = addr_part.parse::<Ipv4Addr>() {
            let len = match len_part {
                Some(l) => l
                    .parse::<u8>()
                    .map_err(|_| TransportError::InvalidName(s.to_string()))?,
                None => 32,
            };
            return Prefix::new(AddressFamily::V4, &v4.octets(), len);
        }

        let v6 = addr_part
            .parse::<Ipv6Addr>()
            .map_err(|_| TransportError::InvalidName(s.to_string()))?;
        let len = match len_part {
            Some(l) => l
                .parse::<u8>()
                .map_err(|_| TransportError::InvalidName(s.to_string()))?,
            None => 128,
        };
        Prefix::new(AddressFamily::V6, &v6.octets(), len)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                write!(f, "{}/{}", Ipv4Addr::from(octets), self.prefix_len)
            }
            AddressFamily::V6 => {
                write!(f, "{}/{}", Ipv6Addr::from(self.addr), self.prefix_len)
            }
        }
    }
}

/// A content name: prefix plus 32-bit segment suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    prefix: Prefix,
    suffix: u32,
}

impl Name {
    pub fn new(prefix: Prefix, suffix: u32) -> Self {
        Name { prefix, suffix }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn suffix(&self) -> u32 {
        self.suffix
    }

    /// Same prefix, different segment.
    pub fn with_suffix(&self, suffix: u32) -> Name {
        Name {
            prefix: self.prefix,
            suffix,
        }
    }

    /// Whether the suffix lies in the reserved probe range.
    pub fn is_probe(&self) -> bool {
        self.suffix >= MIN_PROBE_SUFFIX
    }
}

impl FromStr for Name {
    type Err = TransportError;

    /// Parse `"b001::abcd|7"`; a missing `|suffix` part means suffix 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix_part, suffix) = match s.split_once('|') {
            Some((p, suffix)) => (
                p,
                suffix
                    .parse::<u32>()
                    .map_err(|_| TransportError::InvalidName(s.to_string()))?,
            ),
            None => (s, 0),
        };
        Ok(Name {
            prefix: prefix_part.parse()?,
            suffix,
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix.family {
            AddressFamily::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.prefix.addr[..4]);
                write!(f, "{}|{}", Ipv4Addr::from(octets), self.suffix)
            }
            AddressFamily::V6 => {
                write!(f, "{}|{}", Ipv6Addr::from(self.prefix.addr), self.suffix)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v6_prefix() {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        assert_eq!(prefix.family(), AddressFamily::V6);
        assert_eq!(prefix.prefix_len(), 64);
    }

    #[test]
    fn test_parse_v4_prefix_full_length() {
        let prefix: Prefix = "10.0.0.1".parse().unwrap();
        assert_eq!(prefix.family(), AddressFamily::V4);
        assert_eq!(prefix.prefix_len(), 32);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-address".parse::<Prefix>().is_err());
        assert!("b001::/200".parse::<Prefix>().is_err());
    }

    #[test]
    fn test_name_parse_and_display() {
        let name: Name = "b001::abcd|42".parse().unwrap();
        assert_eq!(name.suffix(), 42);
        assert_eq!(name.to_string(), "b001::abcd|42");

        let name: Name = "b001::abcd".parse().unwrap();
        assert_eq!(name.suffix(), 0);
    }

    #[test]
    fn test_prefix_matches() {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        let inside: Name = "b001::abcd|3".parse().unwrap();
        let outside: Name = "b002::abcd|3".parse().unwrap();

        assert!(prefix.matches(&inside));
        assert!(!prefix.matches(&outside));
    }

    #[test]
    fn test_prefix_matches_partial_byte() {
        // /62 splits inside a byte: b001::.. with differing low bits of
        // the 8th byte should still match.
        let prefix: Prefix = "2001:db8::/62".parse().unwrap();
        let inside: Name = "2001:db8:0:3::1|0".parse().unwrap();
        let outside: Name = "2001:db8:0:4::1|0".parse().unwrap();

        assert!(prefix.matches(&inside));
        assert!(!prefix.matches(&outside));
    }

    #[test]
    fn test_name_ordering() {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        let a = prefix.name(1);
        let b = prefix.name(2);
        assert!(a < b);

        let other: Prefix = "b002::/64".parse().unwrap();
        assert!(prefix.name(9) < other.name(0));
    }

    #[test]
    fn test_graft_key_id() {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        let grafted = prefix.graft_key_id(0xDEAD_BEEF);

        assert_eq!(
            &grafted.addr_bytes()[12..16],
            &0xDEAD_BEEFu32.to_be_bytes()
        );
        // The prefix bits survive the graft.
        assert!(grafted.matches(&prefix.name(0)) || prefix.matches(&grafted.name(0)));
        assert_eq!(&grafted.addr_bytes()[..8], &prefix.addr_bytes()[..8]);
    }

    #[test]
    fn test_probe_range() {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        assert!(prefix.name(MIN_PROBE_SUFFIX).is_probe());
        assert!(prefix.name(0xFFFF_0000).is_probe());
        assert!(!prefix.name(MIN_PROBE_SUFFIX - 1).is_probe());
    }
}
