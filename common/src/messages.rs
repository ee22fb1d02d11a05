// Platform Messages
// The closed set of message types the bus carries. Channel identity is the
// message type name; anything else is rejected at the bus boundary.

use serde::{Deserialize, Serialize};

use crate::bus::{BusMessage, Channel};
use crate::cid::ContentId;

/// A source's observation sequence grew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationDelta {
    pub identity: ContentId,
    pub head: ContentId,
}

/// A node's knowledge base grew. `head` is the cid of the merged
/// knowledge-base value; `identity` is the emitting group's identity
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseDelta {
    pub identity: ContentId,
    pub head: ContentId,
}

/// A strategy appended to its decision sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionDelta {
    pub identity: ContentId,
    pub head: ContentId,
}

/// A broker group appended an execution result to its action sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionExecuted {
    pub identity: ContentId,
    pub head: ContentId,
}

/// Best-effort small-payload broadcast: lets peers seed their in-process
/// cache tier without a store round trip. Never load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobGossip {
    pub cid: ContentId,
    pub bytes: Vec<u8>,
    pub kind: String,
}

impl BusMessage for ObservationDelta {
    const CHANNEL: Channel = Channel::ObservationDelta;
}

impl BusMessage for KnowledgeBaseDelta {
    const CHANNEL: Channel = Channel::KnowledgeBaseDelta;
}

impl BusMessage for DecisionDelta {
    const CHANNEL: Channel = Channel::DecisionDelta;
}

impl BusMessage for ActionExecuted {
    const CHANNEL: Channel = Channel::ActionExecuted;
}

impl BusMessage for BlobGossip {
    const CHANNEL: Channel = Channel::BlobGossip;
}
