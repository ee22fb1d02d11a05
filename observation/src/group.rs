// Observer Group
// Composition root for the capture side of a node: source instances feed the
// funnel, the funnel feeds knowledge-base integration, and growth leaves the
// group as knowledge-base deltas on the bus. Sibling stages terminate
// together; a faulting source only tears itself down.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use common::io::join_group;
use common::{ContentStore, EmitOutput, KnowledgeBaseDelta, MessageBus, SequenceIdentity, Shutdown};
use knowledge::ObservationIntegration;

use crate::funnel::Funnel;
use crate::observer::ObserverSet;

pub struct ObserverGroup {
    observers: ObserverSet,
    store: Arc<ContentStore>,
    bus: Arc<dyn MessageBus>,
}

impl ObserverGroup {
    pub fn new(observers: ObserverSet, store: Arc<ContentStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { observers, store, bus }
    }

    pub async fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        let (handle, signal) = shutdown.child();
        let identity = self.store.put(&SequenceIdentity::random()).await?;
        let sources = self.observers.len();

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (observation_tx, observation_rx) = mpsc::unbounded_channel();
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();

        let instances = self.observers.start(self.store.clone(), capture_tx, signal.clone());
        let funnel = Funnel::new(self.store.clone(), sources, capture_rx, observation_tx);
        let integration =
            ObservationIntegration::new(self.store.clone(), identity, observation_rx, delta_tx)?;
        let output = EmitOutput::<KnowledgeBaseDelta>::new(self.bus.clone(), delta_rx);

        let mut stages = JoinSet::new();
        for instance in instances {
            stages.spawn(async move {
                instance.await.map_err(|e| anyhow!("observer instance task failed: {e}"))
            });
        }
        stages.spawn(funnel.run(signal.clone()));
        stages.spawn(integration.run(signal.clone()));
        stages.spawn(output.run(signal));

        join_group(stages, handle).await
    }
}
