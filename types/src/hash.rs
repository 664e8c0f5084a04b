use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte hash, used for both block hashes and transaction hashes.
///
/// Starknet-family RPC encodes these as `0x`-prefixed hex strings; we keep
/// the raw bytes internally and only hex-encode at the serde boundary.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let mut padded = stripped.to_string();
        if padded.len() % 2 == 1 {
            padded.insert(0, '0');
        }
        let bytes = hex::decode(&padded)?;
        let mut out = [0u8; 32];
        let start = 32usize.saturating_sub(bytes.len());
        out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
        Ok(Self(out))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({self})")
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let h = Hash32([0xab; 32]);
        let s = h.to_string();
        assert_eq!(Hash32::from_hex(&s).unwrap(), h);
    }

    #[test]
    fn accepts_short_hex() {
        assert_eq!(Hash32::from_hex("0x1").unwrap(), Hash32::from_hex("0x01").unwrap());
    }
}
