// Observation Capture
// Wraps arbitrary observation sources, stamps and persists their percepts,
// and sequences arrivals from all sources of a group into per-source
// append-only chains. Cross-source arrival order is the pipeline's only
// non-determinism point; backtests replay a recorded context sequence
// instead of running observers.

pub mod funnel;
pub mod group;
pub mod observer;

pub use group::ObserverGroup;
pub use observer::{Observer, ObserverSet};
