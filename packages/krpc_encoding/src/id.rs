use std::fmt;

use num_bigint::BigUint;
use rand::RngCore;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::errors::{Error, Result};

pub const ID_LEN: usize = 20;
pub const MAX_BITS: u32 = 160;

/// A 160-bit opaque identifier, shared by nodes and infohashes.
///
/// Ordering is lexicographic byte order, which is equivalent to treating the
/// id as an unsigned big-endian 160-bit integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeID([u8; ID_LEN]);

impl NodeID {
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> NodeID {
        NodeID(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Generates a fresh random id by hashing high-entropy randomness with SHA-1,
    /// matching the "hash a seed at birth" construction used by the reference
    /// implementation.
    pub fn generate() -> NodeID {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);

        let mut hasher = Sha1::new();
        hasher.update(seed);
        let digest = hasher.finalize();

        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&digest);
        NodeID(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<NodeID> {
        if hex_str.len() != ID_LEN * 2 {
            return Err(Error::InvalidHexLength { len: hex_str.len() });
        }
        let decoded = hex::decode(hex_str).map_err(|cause| Error::InvalidHex { cause })?;
        NodeID::from_slice(&decoded)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<NodeID> {
        if bytes.len() != ID_LEN {
            return Err(Error::InvalidNodeIdLength { len: bytes.len() });
        }
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(bytes);
        Ok(NodeID(out))
    }

    pub fn hex_string(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance between two ids, still represented as a 160-bit value.
    pub fn distance(&self, other: &NodeID) -> NodeID {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        NodeID(out)
    }

    /// Number of leading zero bits, i.e. the length of the common prefix
    /// between this value (usually an XOR distance) and zero. Used only for
    /// display/debug purposes; ordering decisions use the full value.
    pub fn leading_zero_bits(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (i as u32) * 8 + byte.leading_zeros();
            }
        }
        MAX_BITS
    }

    pub fn as_bigint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    pub fn from_bigint(value: &BigUint) -> NodeID {
        let mut bytes = value.to_bytes_be();
        if bytes.len() < ID_LEN {
            let mut padded = vec![0u8; ID_LEN - bytes.len()];
            padded.extend_from_slice(&bytes);
            bytes = padded;
        } else if bytes.len() > ID_LEN {
            bytes = bytes[bytes.len() - ID_LEN..].to_vec();
        }
        NodeID::from_slice(&bytes).expect("truncated to ID_LEN")
    }
}

impl fmt::Debug for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({})", self.hex_string())
    }
}

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex_string())
    }
}

impl Serialize for NodeID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::Bytes::new(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<NodeID, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <&[u8]>::deserialize(deserializer)?;
        NodeID::from_slice(bytes).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_self_is_zero() {
        let a = NodeID::generate();
        let b = NodeID::generate();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a).as_bigint(), BigUint::from(0u32));
    }

    #[test]
    fn hex_round_trips() {
        let a = NodeID::generate();
        let hex_str = a.hex_string();
        let b = NodeID::from_hex(&hex_str).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn leading_zero_bits_is_bounded() {
        let zero = NodeID::from_bytes([0u8; ID_LEN]);
        assert_eq!(zero.leading_zero_bits(), MAX_BITS);

        let mut one = [0u8; ID_LEN];
        one[ID_LEN - 1] = 1;
        assert_eq!(NodeID::from_bytes(one).leading_zero_bits(), MAX_BITS - 1);
    }

    #[test]
    fn ordering_matches_bigint_ordering() {
        let a = NodeID::from_hex(&"00".repeat(20)).unwrap();
        let b = NodeID::from_hex(&format!("{}01", "00".repeat(19))).unwrap();
        assert!(a < b);
        assert!(a.as_bigint() < b.as_bigint());
    }
}
