use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InfoHashError;

/// Stable external identifier assigned by the engine.
///
/// Positive, monotonically allocated, unique for the lifetime of a data root
/// and stable across restarts once bound to an info-hash. `0` is the sentinel
/// for "not assignable" (the zero hash).
pub type RpcId = u64;

/// SHA-1 (v1) or SHA-256 (v2) identifier of a torrent's metadata.
///
/// Rendered as lowercase hex everywhere it is persisted or logged. A hash is
/// non-zero iff it contains at least one non-zero byte; only non-zero hashes
/// may be bound to an [`RpcId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InfoHash {
    /// 20-byte SHA-1 digest.
    V1([u8; 20]),
    /// 32-byte SHA-256 digest.
    V2([u8; 32]),
}

impl InfoHash {
    /// The all-zero v1 hash, used by the underlying library for torrents
    /// whose identity is not yet known.
    pub const ZERO: Self = Self::V1([0; 20]);

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V1(bytes) => bytes,
            Self::V2(bytes) => bytes,
        }
    }

    /// Whether every byte of the digest is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|byte| *byte == 0)
    }

    /// Lowercase hex rendering, 40 or 64 characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse from a 40- or 64-character hex string, case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`InfoHashError`] if the length or alphabet is wrong.
    pub fn from_hex(value: &str) -> Result<Self, InfoHashError> {
        match value.len() {
            40 => {
                let mut bytes = [0_u8; 20];
                hex::decode_to_slice(value, &mut bytes).map_err(|_| InfoHashError::NonHex)?;
                Ok(Self::V1(bytes))
            }
            64 => {
                let mut bytes = [0_u8; 32];
                hex::decode_to_slice(value, &mut bytes).map_err(|_| InfoHashError::NonHex)?;
                Ok(Self::V2(bytes))
            }
            other => Err(InfoHashError::Length(other)),
        }
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_hex(value)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}
