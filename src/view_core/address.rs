//! Host addresses compared by numeric value
//!
//! IPv4 addresses live in the IPv4-mapped range (`::ffff:0:0/96`) so that a
//! single 128-bit key orders every address. `10.0.0.1`, `010.000.000.001` and
//! `::ffff:10.0.0.1` are all the same `Address`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const V4_MAPPED_TAG: u128 = 0xffff;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u128);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid address: {:?}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl Address {
    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        Self((V4_MAPPED_TAG << 32) | u128::from(u32::from(addr)))
    }

    pub fn from_ipv6(addr: Ipv6Addr) -> Self {
        Self(u128::from(addr))
    }

    /// Numeric key used for ordering
    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        if self.0 >> 32 == V4_MAPPED_TAG {
            Some(Ipv4Addr::from(self.0 as u32))
        } else {
            None
        }
    }

    pub fn to_ip(&self) -> IpAddr {
        match self.to_ipv4() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(Ipv6Addr::from(self.0)),
        }
    }

    /// Big-endian key bytes; byte-wise comparison matches numeric order,
    /// which lets SQLite `ORDER BY` a BLOB column in address order.
    pub fn to_key_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_key_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

/// Dotted-quad parser that tolerates zero-padded octets (`010.000.000.001`),
/// which `Ipv4Addr::from_str` rejects.
fn parse_ipv4_lenient(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.contains(':') {
            return Ipv6Addr::from_str(trimmed)
                .map(Address::from_ipv6)
                .map_err(|_| AddressParseError(s.to_string()));
        }
        parse_ipv4_lenient(trimmed)
            .map(Address::from_ipv4)
            .ok_or_else(|| AddressParseError(s.to_string()))
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::from_ipv4(v4),
            IpAddr::V6(v6) => Address::from_ipv6(v6),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_ip() {
            IpAddr::V4(v4) => write!(f, "{}", v4),
            IpAddr::V6(v6) => write!(f, "{}", v6),
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_numeric_not_lexicographic_order() {
        assert!(addr("9.0.0.1") < addr("10.0.0.1"));
        assert!(addr("10.0.0.2") < addr("10.0.0.10"));
        assert!("10.0.0.10" < "10.0.0.2"); // the string order this replaces
    }

    #[test]
    fn test_mapped_and_padded_forms_are_equal() {
        assert_eq!(addr("10.0.0.1"), addr("::ffff:10.0.0.1"));
        assert_eq!(addr("10.0.0.1"), addr("010.000.000.001"));
        assert_eq!(addr("::ffff:10.0.0.1").to_string(), "10.0.0.1");
    }

    #[test]
    fn test_ipv4_sorts_inside_mapped_range() {
        assert!(addr("::1") < addr("0.0.0.0"));
        assert!(addr("255.255.255.255") < addr("2001:db8::1"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("10.0.0".parse::<Address>().is_err());
        assert!("10.0.0.256".parse::<Address>().is_err());
        assert!("1.2.3.4.5".parse::<Address>().is_err());
        assert!("host.example".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn test_key_bytes_preserve_order() {
        let a = addr("9.255.255.255");
        let b = addr("10.0.0.0");
        assert!(a.to_key_bytes() < b.to_key_bytes());
        assert_eq!(Address::from_key_bytes(b.to_key_bytes()), b);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&addr("192.168.1.1")).unwrap();
        assert_eq!(json, "\"192.168.1.1\"");
        let back: Address = serde_json::from_str("\"2001:db8::1\"").unwrap();
        assert_eq!(back.to_string(), "2001:db8::1");
    }
}
