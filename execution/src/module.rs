// Broker Module
// Per decision delta: resolve the action set, start every execution that
// has a registered broker, and extend the action sequence as each one
// settles. The audit log order is execution-completion order, not
// submission order.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use common::sequence::extend;
use common::{
    ActionExecuted, ActionHead, ActionSet, ContentId, ContentStore, DecisionDelta, DecisionHead,
    SequenceHead, SequenceIdentity, Shutdown,
};

use crate::multiplexer::BrokerMultiplexer;

pub struct BrokerModule {
    multiplexer: BrokerMultiplexer,
    store: Arc<ContentStore>,
    input: mpsc::UnboundedReceiver<DecisionDelta>,
    output: mpsc::UnboundedSender<ActionExecuted>,
}

impl BrokerModule {
    pub fn new(
        multiplexer: BrokerMultiplexer,
        store: Arc<ContentStore>,
        input: mpsc::UnboundedReceiver<DecisionDelta>,
        output: mpsc::UnboundedSender<ActionExecuted>,
    ) -> Self {
        Self {
            multiplexer,
            store,
            input,
            output,
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let identity = self
            .store
            .put(&ActionHead::Identity(SequenceIdentity::random()))
            .await?;
        let mut head = identity;

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                delta = self.input.recv() => {
                    let Some(delta) = delta else { break };
                    let Some(new_head) = self.dispatch(delta, identity, head, &mut shutdown).await? else {
                        break;
                    };
                    head = new_head;
                }
            }
        }
        Ok(())
    }

    /// Returns the new action head, or `None` once downstream is gone or
    /// shutdown interrupted the drain.
    async fn dispatch(
        &self,
        delta: DecisionDelta,
        identity: ContentId,
        mut head: ContentId,
        shutdown: &mut Shutdown,
    ) -> anyhow::Result<Option<ContentId>> {
        let decision: DecisionHead = self.store.get(&delta.head).await?;
        let SequenceHead::Node(node) = decision else {
            debug!(head = %delta.head, "decision delta pointed at a sequence start; nothing to execute");
            return Ok(Some(head));
        };
        let set: ActionSet = self.store.get(&node.payload.action_set).await?;

        let mut executions = FuturesUnordered::new();
        for action in set.actions {
            match self.multiplexer.try_start(action.clone()) {
                Some(execution) => executions.push(execution),
                None => debug!(action_type = %action.action_type, "no broker registered; skipping action"),
            }
        }

        while !executions.is_empty() {
            tokio::select! {
                _ = shutdown.triggered() => return Ok(None),
                settled = executions.next() => {
                    let Some(settled) = settled else { break };
                    let executed = match settled {
                        Ok(executed) => executed,
                        Err(e) => {
                            // Execution tasks convert their own faults to
                            // traces; a join error means cancellation.
                            warn!(error = %e, "execution task vanished before settling");
                            continue;
                        }
                    };

                    head = extend::<ActionHead, _>(&self.store, head, executed).await?;
                    if self.output.send(ActionExecuted { identity, head }).is_err() {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(Some(head))
    }
}
