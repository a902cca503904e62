use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Error, Result};

pub const ADDR_LEN: usize = 6;

/// An IPv4 socket address in BEP-5's compact 6-byte form: 4-byte IP followed
/// by a 2-byte big-endian port.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr(SocketAddrV4);

impl Addr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Addr {
        Addr(SocketAddrV4::new(ip, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_routable(&self) -> bool {
        self.port() != 0 && !self.ip().is_unspecified()
    }

    pub fn to_bytes(&self) -> [u8; ADDR_LEN] {
        let mut out = [0u8; ADDR_LEN];
        out[..4].copy_from_slice(&self.0.ip().octets());
        out[4..].copy_from_slice(&self.0.port().to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Addr> {
        if bytes.len() != ADDR_LEN {
            return Err(Error::TruncatedPeerInfo { len: bytes.len() });
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(Addr::new(ip, port))
    }
}

impl From<SocketAddrV4> for Addr {
    fn from(addr: SocketAddrV4) -> Addr {
        Addr(addr)
    }
}

impl From<Addr> for SocketAddrV4 {
    fn from(addr: Addr) -> SocketAddrV4 {
        addr.0
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Addr {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::Bytes::new(&self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Addr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <&[u8]>::deserialize(deserializer)?;
        Addr::from_bytes(bytes).map_err(DeError::custom)
    }
}

/// Serializes/deserializes `Vec<Addr>` as a bencoded *list* of 6-byte compact
/// peer records, as used by `get_peers`'s `values` field. Unlike `nodes`
/// (one concatenated string), BEP-5 sends each peer as its own list element.
pub mod compact_peers {
    use super::*;
    use serde::{Deserialize as _, Serialize as _};
    use serde_bytes::ByteBuf;

    pub fn serialize<S>(peers: &[Addr], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let records: Vec<_> = peers
            .iter()
            .map(|peer| serde_bytes::ByteBuf::from(peer.to_bytes().to_vec()))
            .collect();
        records.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<Addr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let records = Vec::<ByteBuf>::deserialize(deserializer)?;
        records
            .iter()
            .map(|record| Addr::from_bytes(record).map_err(DeError::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trips() {
        let addr = Addr::new(Ipv4Addr::new(10, 0, 0, 1), 6881);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), ADDR_LEN);
        let back = Addr::from_bytes(&bytes).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn unspecified_or_zero_port_is_not_routable() {
        assert!(!Addr::new(Ipv4Addr::UNSPECIFIED, 6881).is_routable());
        assert!(!Addr::new(Ipv4Addr::new(1, 2, 3, 4), 0).is_routable());
        assert!(Addr::new(Ipv4Addr::new(1, 2, 3, 4), 6881).is_routable());
    }
}
