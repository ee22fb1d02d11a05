// Error taxonomy shared by every pipeline crate. Stage modules wrap these in
// anyhow::Result at their run loops; the variants here are the ones callers
// branch on.

use thiserror::Error;

use crate::cid::ContentId;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode content {cid}: {source}")]
    Decode {
        cid: ContentId,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed content id: {0:?}")]
    InvalidContentId(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The cid resolved in no tier. Propagated as-is, never substituted.
    #[error("content {0} not found in any store tier")]
    NotFound(ContentId),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("local store failure: {0}")]
    Local(String),

    #[error("network store failure: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    /// Channel names form a closed set; anything else is a wiring bug.
    #[error("unknown bus channel: {0:?}")]
    UnknownChannel(String),

    #[error("failed to encode bus message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("bus transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ContextError {
    /// The indexed walk found zero context nodes before the cutoff.
    #[error("no context nodes found within the requested range")]
    InvalidRange,

    #[error(transparent)]
    Store(#[from] StoreError),
}
