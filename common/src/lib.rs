// Runtime Core Foundation (shared across all pipeline groups)
// Content addressing, layered persistence, the message bus, and the
// append-only sequence primitive every group builds on.

pub mod bus;
pub mod cid;
pub mod codec;
pub mod data;
pub mod error;
pub mod io;
pub mod messages;
pub mod sequence;
pub mod store;

pub use bus::{Channel, InProcessBus, KafkaBus, KafkaBusConfig, MessageBus};
pub use cid::ContentId;
pub use data::{
    ActionExecutionResult, ActionItem, ActionPayload, ActionSet, ActionHead, CapturedObservation,
    ContextHead, DecisionHead, DecisionStart, DecisionStep, ExecutedAction, ExecutionTrace,
    KnowledgeBase, ObservationHead, Percept, SequenceHead, SequenceIdentity, SequenceNode,
    StrategyManifest,
};
pub use error::{BusError, CodecError, ContextError, StoreError};
pub use io::{EmitOutput, Shutdown, ShutdownHandle, StreamInput};
pub use messages::{ActionExecuted, BlobGossip, DecisionDelta, KnowledgeBaseDelta, ObservationDelta};
pub use store::{ContentStore, LocalStore, MemoryLocalStore, NetworkStore, OfflineNetworkStore, SledStore, StoreConfig};
