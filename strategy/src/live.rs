// Live Strategy Group
// Bus in, deduplicate against the locally accumulated knowledge base,
// evaluate, bus out. Deduplication up front means the strategy only ever
// re-evaluates on actual growth.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use common::io::join_group;
use common::{
    ContentStore, DecisionDelta, EmitOutput, KnowledgeBaseDelta, MessageBus, SequenceIdentity,
    Shutdown, StreamInput,
};
use knowledge::Deduplication;

use crate::module::{Strategy, StrategyConfig, StrategyModule};

pub struct LiveStrategy<S> {
    strategy: S,
    config: StrategyConfig,
    store: Arc<ContentStore>,
    bus: Arc<dyn MessageBus>,
}

impl<S: Strategy> LiveStrategy<S> {
    pub fn new(strategy: S, config: StrategyConfig, store: Arc<ContentStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            strategy,
            config,
            store,
            bus,
        }
    }

    pub async fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        let (handle, signal) = shutdown.child();
        let identity = self.store.put(&SequenceIdentity::random()).await?;

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (kb_tx, kb_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();

        let input = StreamInput::<KnowledgeBaseDelta>::subscribe(self.bus.as_ref())?;
        let dedup = Deduplication::new(self.store.clone(), identity, in_rx, kb_tx)?;
        let module = StrategyModule::new(self.strategy, self.store.clone(), self.config, kb_rx, decision_tx);
        let output = EmitOutput::<DecisionDelta>::new(self.bus.clone(), decision_rx);

        let mut stages = JoinSet::new();
        stages.spawn(input.run(in_tx, signal.clone()));
        stages.spawn(dedup.run(signal.clone()));
        stages.spawn(module.run(signal.clone()));
        stages.spawn(output.run(signal));

        join_group(stages, handle).await
    }
}
