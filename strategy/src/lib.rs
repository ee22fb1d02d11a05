// Strategy Evaluation
// Re-evaluates a user-supplied pure decision function against point-in-time
// views of the knowledge base and appends initiated actions to a decision
// sequence. Evaluation reads only immutable content-addressed history, so
// the same knowledge-base cid and strategy yield the same decision, live or
// in replay.

pub mod context;
pub mod live;
pub mod module;

pub use context::fold::ContextFold;
pub use context::index::ContextIndex;
pub use context::query::{Observed, QueryContext, RangeQuery};
pub use live::LiveStrategy;
pub use module::{Decision, Initiative, Reflection, Strategy, StrategyConfig, StrategyModule};
