// Content Identifiers
// Every persisted value is addressed by the digest of its canonical encoding.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;

/// Digest width of the configured hash function (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// Content id: the hash of a value's canonical encoding.
///
/// Equal content implies equal `ContentId`; this is the runtime's only
/// notion of equality and deduplication. Serialized as a hex string so it
/// can double as a JSON map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; DIGEST_LEN]);

impl ContentId {
    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(text).map_err(|_| CodecError::InvalidContentId(text.to_string()))?;
        let digest: [u8; DIGEST_LEN] = raw
            .try_into()
            .map_err(|_| CodecError::InvalidContentId(text.to_string()))?;
        Ok(Self(digest))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable.
        write!(f, "ContentId({}..)", &self.to_hex()[..8])
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = ContentId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex-encoded content id")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ContentId, E> {
                ContentId::from_hex(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
