// Action Execution
// Dispatches decided actions to type-specific brokers and appends each
// settled execution to the action sequence in completion order, which is
// the order the audit log records. Unregistered action types are skipped,
// never errors; broker faults become recorded Error traces.

pub mod broker;
pub mod group;
pub mod module;
pub mod multiplexer;

pub use broker::{Broker, BrokerRegistry};
pub use group::BrokerGroup;
pub use module::BrokerModule;
pub use multiplexer::BrokerMultiplexer;
