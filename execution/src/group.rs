// Broker Group
// Bus in, execute, bus out. One group per capability set; deployments run
// several with different registries against the same decision stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use common::io::join_group;
use common::{ActionExecuted, ContentStore, DecisionDelta, EmitOutput, MessageBus, Shutdown, StreamInput};

use crate::broker::BrokerRegistry;
use crate::module::BrokerModule;
use crate::multiplexer::BrokerMultiplexer;

pub struct BrokerGroup {
    registry: BrokerRegistry,
    store: Arc<ContentStore>,
    bus: Arc<dyn MessageBus>,
}

impl BrokerGroup {
    pub fn new(registry: BrokerRegistry, store: Arc<ContentStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { registry, store, bus }
    }

    pub async fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        let (handle, signal) = shutdown.child();

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (executed_tx, executed_rx) = mpsc::unbounded_channel();

        let input = StreamInput::<DecisionDelta>::subscribe(self.bus.as_ref())?;
        let module = BrokerModule::new(
            BrokerMultiplexer::new(self.registry, self.store.clone()),
            self.store.clone(),
            in_rx,
            executed_tx,
        );
        let output = EmitOutput::<ActionExecuted>::new(self.bus.clone(), executed_rx);

        let mut stages = JoinSet::new();
        stages.spawn(input.run(in_tx, signal.clone()));
        stages.spawn(module.run(signal.clone()));
        stages.spawn(output.run(signal));

        join_group(stages, handle).await
    }
}
