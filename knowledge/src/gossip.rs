// Knowledge-Base Gossip
// Anti-entropy without a coordinator: merge every peer delta into the local
// value and re-broadcast only on growth. Because the join is idempotent and
// commutative, re-received information dies here instead of looping.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use common::io::join_group;
use common::{
    ContentId, ContentStore, EmitOutput, KnowledgeBase, KnowledgeBaseDelta, MessageBus,
    SequenceIdentity, Shutdown, StoreError, StreamInput,
};

use crate::fold::KnowledgeFold;

/// Stage deduplicating peer knowledge-base deltas against the local value.
pub struct Deduplication {
    fold: KnowledgeFold,
    store: Arc<ContentStore>,
    identity: ContentId,
    input: mpsc::UnboundedReceiver<KnowledgeBaseDelta>,
    output: mpsc::UnboundedSender<KnowledgeBaseDelta>,
}

impl Deduplication {
    pub fn new(
        store: Arc<ContentStore>,
        identity: ContentId,
        input: mpsc::UnboundedReceiver<KnowledgeBaseDelta>,
        output: mpsc::UnboundedSender<KnowledgeBaseDelta>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            fold: KnowledgeFold::new(store.clone())?,
            store,
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
                    if !self.absorb(delta).await? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns false once the downstream queue is gone.
    async fn absorb(&mut self, delta: KnowledgeBaseDelta) -> anyhow::Result<bool> {
        let incoming: KnowledgeBase = match self.store.get(&delta.head).await {
            Ok(kb) => kb,
            Err(StoreError::NotFound(head)) => {
                // The network tier failed closed on a peer's value. Later
                // exchanges will carry the same information again.
                warn!(%head, "skipping unresolvable knowledge-base delta");
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(head) = self.fold.absorb(&incoming).await? {
            debug!(%head, "knowledge base grew from peer delta");
            let grown = KnowledgeBaseDelta { identity: self.identity, head };
            return Ok(self.output.send(grown).is_ok());
        }
        Ok(true)
    }
}

/// Gossip node: bus in, deduplicate, bus out.
pub struct KnowledgeBaseGossip {
    store: Arc<ContentStore>,
    bus: Arc<dyn MessageBus>,
}

impl KnowledgeBaseGossip {
    pub fn new(store: Arc<ContentStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    pub async fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        let (handle, signal) = shutdown.child();
        let identity = self.store.put(&SequenceIdentity::random()).await?;

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let input = StreamInput::<KnowledgeBaseDelta>::subscribe(self.bus.as_ref())?;
        let dedup = Deduplication::new(self.store.clone(), identity, in_rx, out_tx)?;
        let output = EmitOutput::new(self.bus.clone(), out_rx);

        let mut stages = JoinSet::new();
        stages.spawn(input.run(in_tx, signal.clone()));
        stages.spawn(dedup.run(signal.clone()));
        stages.spawn(output.run(signal));
        join_group(stages, handle).await
    }
}
