// Observation Integration
// Turns fresh per-source observation heads into knowledge-base deltas, given
// that they actually carried new information.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use common::{ContentId, ContentStore, KnowledgeBase, KnowledgeBaseDelta, ObservationDelta, Shutdown};

use crate::fold::KnowledgeFold;

/// Stage folding observation deltas into the local knowledge base and
/// forwarding growth downstream.
pub struct ObservationIntegration {
    fold: KnowledgeFold,
    identity: ContentId,
    input: mpsc::UnboundedReceiver<ObservationDelta>,
    output: mpsc::UnboundedSender<KnowledgeBaseDelta>,
}

impl ObservationIntegration {
    pub fn new(
        store: Arc<ContentStore>,
        identity: ContentId,
        input: mpsc::UnboundedReceiver<ObservationDelta>,
        output: mpsc::UnboundedSender<KnowledgeBaseDelta>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            fold: KnowledgeFold::new(store)?,
            identity,
            input,
            output,
        })
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                delta = self.input.recv() => {
                    let Some(delta) = delta else { break };
                    let singleton = KnowledgeBase::observation(delta.identity, delta.head);
                    if let Some(head) = self.fold.absorb(&singleton).await? {
                        debug!(%head, "knowledge base grew from local observation");
                        let grown = KnowledgeBaseDelta { identity: self.identity, head };
                        if self.output.send(grown).is_err() {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
