// Knowledge Base Layer
// Folds fresh observation heads into a replicated, grow-only knowledge base
// and reconciles divergent replicas across peers. The join is a CRDT map
// merge (idempotent, commutative, associative), which is what makes
// unmodified re-broadcast loop-safe.

pub mod fold;
pub mod gossip;
pub mod integrate;
pub mod join;

pub use fold::KnowledgeFold;
pub use gossip::{Deduplication, KnowledgeBaseGossip};
pub use integrate::ObservationIntegration;
pub use join::join;
