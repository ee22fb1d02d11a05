// Canonical Encoding & Hashing
// The single swap point for the content-addressing binding: values are
// encoded as canonical JSON and addressed by the SHA-256 of those bytes.
// Persisted types keep their maps as BTreeMap so the encoding is
// deterministic; the novelty checks in the knowledge-base layer depend on
// that determinism.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cid::ContentId;
use crate::error::CodecError;

/// Hash raw bytes into their content id.
pub fn digest(bytes: &[u8]) -> ContentId {
    ContentId::from_digest(Sha256::digest(bytes).into())
}

/// Encode a value into its canonical bytes and content id.
pub fn encode<T: Serialize>(value: &T) -> Result<(ContentId, Vec<u8>), CodecError> {
    let bytes = serde_json::to_vec(value).map_err(CodecError::Encode)?;
    Ok((digest(&bytes), bytes))
}

/// Content id of a value without retaining the encoded bytes.
pub fn content_id<T: Serialize>(value: &T) -> Result<ContentId, CodecError> {
    encode(value).map(|(cid, _)| cid)
}

/// Decode bytes previously stored under `cid`.
pub fn decode<T: DeserializeOwned>(cid: &ContentId, bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::Decode { cid: *cid, source })
}
