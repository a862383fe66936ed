use crate::error::{Result, WeaveError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// IPv4 host plus port. Its `Display` form ("a.b.c.d:port") is the key for
/// everything we record about a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    octets: [u8; 4],
    port: u16,
}

impl PeerAddr {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, port: u16) -> PeerAddr {
        PeerAddr {
            octets: [a, b, c, d],
            port,
        }
    }

    pub fn localhost(port: u16) -> PeerAddr {
        PeerAddr::new(127, 0, 0, 1, port)
    }

    /// Combine the source IP of a request with the port a peer says it listens on.
    /// IPv4-mapped IPv6 sources are accepted.
    pub fn from_ip(ip: IpAddr, port: u16) -> Result<PeerAddr> {
        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => v6.to_ipv4_mapped().ok_or_else(|| {
                WeaveError::Decode(format!("peer address {v6} is not IPv4"))
            })?,
        };
        Ok(PeerAddr {
            octets: v4.octets(),
            port,
        })
    }

    pub fn octets(&self) -> [u8; 4] {
        self.octets
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.octets)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip(), self.port))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{a}.{b}.{c}.{d}:{}", self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<PeerAddr> {
        let addr = s
            .trim()
            .parse::<SocketAddrV4>()
            .map_err(|e| WeaveError::Decode(format!("Invalid peer address {s}: {e}")))?;
        Ok(PeerAddr::from(addr))
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        PeerAddr {
            octets: addr.ip().octets(),
            port: addr.port(),
        }
    }
}

impl TryFrom<SocketAddr> for PeerAddr {
    type Error = WeaveError;

    fn try_from(addr: SocketAddr) -> Result<PeerAddr> {
        PeerAddr::from_ip(addr.ip(), addr.port())
    }
}

impl Serialize for PeerAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_text_form_round_trips() {
        let peer = PeerAddr::new(10, 0, 0, 254, 1984);
        assert_eq!(peer.to_string(), "10.0.0.254:1984");
        assert_eq!("10.0.0.254:1984".parse::<PeerAddr>().unwrap(), peer);
    }

    #[test]
    fn test_rejects_malformed_text() {
        for bad in ["10.0.0.1", "10.0.0.1:99999", "host:80", "[::1]:80", ""] {
            assert!(bad.parse::<PeerAddr>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_from_request_source() {
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 1, 7).to_ipv6_mapped());
        let peer = PeerAddr::from_ip(mapped, 2001).unwrap();
        assert_eq!(peer, PeerAddr::new(192, 168, 1, 7, 2001));

        assert!(PeerAddr::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 2001).is_err());
    }

    #[test]
    fn test_json_form_is_string() {
        let peer = PeerAddr::localhost(2001);
        let json = serde_json::to_string(&vec![peer]).unwrap();
        assert_eq!(json, r#"["127.0.0.1:2001"]"#);
        let back: Vec<PeerAddr> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![peer]);
    }
}
