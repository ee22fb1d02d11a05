// Observation Funnel
// Serializes arrivals from every source of a group into one global order
// (first-arrived-first-sequenced) and extends the arriving source's own
// observation sequence. Per-source order is preserved; cross-source order
// is whatever arrival produced.

use std::sync::Arc;

use tokio::sync::mpsc;

use common::sequence::extend;
use common::{ContentId, ContentStore, ObservationDelta, ObservationHead, SequenceIdentity, Shutdown};

use crate::observer::NewCapture;

struct SourceChain {
    identity: ContentId,
    head: ContentId,
}

/// Sequencer stage owned by an observer group.
pub(crate) struct Funnel {
    store: Arc<ContentStore>,
    sources: usize,
    input: mpsc::UnboundedReceiver<NewCapture>,
    output: mpsc::UnboundedSender<ObservationDelta>,
}

impl Funnel {
    pub fn new(
        store: Arc<ContentStore>,
        sources: usize,
        input: mpsc::UnboundedReceiver<NewCapture>,
        output: mpsc::UnboundedSender<ObservationDelta>,
    ) -> Self {
        Self {
            store,
            sources,
            input,
            output,
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        // Fresh identity sentinel per source; its cid is the key the
        // knowledge base tracks this chain under.
        let mut chains = Vec::with_capacity(self.sources);
        for _ in 0..self.sources {
            let identity = self
                .store
                .put(&ObservationHead::Identity(SequenceIdentity::random()))
                .await?;
            chains.push(SourceChain { identity, head: identity });
        }

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                arrival = self.input.recv() => {
                    // Input closes when the last source ends.
                    let Some(NewCapture { source, capture }) = arrival else { break };
                    let chain = &mut chains[source];
                    chain.head = extend::<ObservationHead, _>(&self.store, chain.head, capture).await?;
                    let delta = ObservationDelta { identity: chain.identity, head: chain.head };
                    if self.output.send(delta).is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
