// Shared Data Model
// Every value here is immutable once persisted and addressed by its content
// id. Maps are BTreeMaps so the canonical encoding stays deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cid::ContentId;

/// A typed unit of observed data. The associated tag is the registry key for
/// dispatch and query filtering: one tag per percept type, stable across
/// processes.
pub trait Percept: Serialize + DeserializeOwned + Send + Sync + 'static {
    const PERCEPT_TYPE: &'static str;
}

/// A typed action payload a broker knows how to execute. Same registry-tag
/// scheme as [`Percept`].
pub trait ActionPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ACTION_TYPE: &'static str;
}

/// Empty sentinel starting an append-only chain. The nonce keeps distinct
/// chains from collapsing onto one content id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceIdentity {
    pub nonce: u128,
}

impl SequenceIdentity {
    pub fn random() -> Self {
        Self {
            nonce: Uuid::new_v4().as_u128(),
        }
    }
}

/// Head of an append-only, hash-linked chain: either the identity sentinel
/// the chain started from, or its latest node.
///
/// An explicit sum type rather than a nullable link; "empty chain" and
/// "missing value" must never be conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceHead<I, P> {
    Identity(I),
    Node(SequenceNode<P>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceNode<P> {
    pub previous: ContentId,
    pub payload: P,
}

impl<I, P> From<SequenceNode<P>> for SequenceHead<I, P> {
    fn from(node: SequenceNode<P>) -> Self {
        SequenceHead::Node(node)
    }
}

/// One observation as captured by an observer instance: arrival timestamp,
/// percept type tag, and the cid of the persisted percept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedObservation {
    pub at: DateTime<Utc>,
    pub percept_type: String,
    pub observation: ContentId,
}

/// First entry of a decision sequence: which strategy produced it, over
/// which context identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStart {
    pub strategy: ContentId,
    pub first_context: ContentId,
}

/// One decision that initiated actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub action_set: ContentId,
}

/// One action within a decision, tagged with the broker registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub action_type: String,
    pub action: ContentId,
}

/// The ordered actions of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    pub actions: Vec<ActionItem>,
}

/// How one action execution settled. Errors are recorded here; the action
/// sequence is the error channel for execution, nothing is re-thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionTrace {
    Success,
    Error { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionResult {
    pub trace: ExecutionTrace,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// An action together with its recorded execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action: ActionItem,
    pub result: ActionExecutionResult,
}

/// Identifies a strategy implementation so the decision sequence can
/// reference it by content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyManifest {
    pub name: String,
    pub version: String,
}

pub type ObservationHead = SequenceHead<SequenceIdentity, CapturedObservation>;
pub type ContextHead = SequenceHead<SequenceIdentity, CapturedObservation>;
pub type DecisionHead = SequenceHead<DecisionStart, DecisionStep>;
pub type ActionHead = SequenceHead<SequenceIdentity, ExecutedAction>;

/// Replicated, grow-only map from chain identity (cid of its identity
/// sentinel) to the latest known head of that chain. Merged across nodes
/// with the join in the knowledge crate; recomputed, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub observations: BTreeMap<ContentId, ContentId>,
    pub actions: BTreeMap<ContentId, ContentId>,
}

impl KnowledgeBase {
    /// Singleton wrapping one fresh observation head, ready to join.
    pub fn observation(identity: ContentId, head: ContentId) -> Self {
        let mut kb = Self::default();
        kb.observations.insert(identity, head);
        kb
    }

    /// Singleton wrapping one fresh action head, ready to join.
    pub fn action(identity: ContentId, head: ContentId) -> Self {
        let mut kb = Self::default();
        kb.actions.insert(identity, head);
        kb
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.actions.is_empty()
    }
}
