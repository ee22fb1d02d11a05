// Context Fold
// Derives the single time-ordered context chain a strategy queries from the
// stream of knowledge-base deltas: per advanced source, the observations
// that are new relative to the previously integrated head are appended
// oldest first. Backtests bypass this fold by replaying a recorded head.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::sequence::{extend, SequenceWalker};
use common::{
    CapturedObservation, ContentId, ContentStore, ContextHead, KnowledgeBase, SequenceIdentity,
    StoreError,
};

/// Owns one context sequence and the per-source heads already woven into it.
pub struct ContextFold {
    store: Arc<ContentStore>,
    identity: ContentId,
    head: ContentId,
    integrated: BTreeMap<ContentId, ContentId>,
}

impl ContextFold {
    pub async fn new(store: Arc<ContentStore>) -> Result<Self, StoreError> {
        let identity = store
            .put(&ContextHead::Identity(SequenceIdentity::random()))
            .await?;
        Ok(Self {
            store,
            identity,
            head: identity,
            integrated: BTreeMap::new(),
        })
    }

    pub fn identity(&self) -> ContentId {
        self.identity
    }

    pub fn head(&self) -> ContentId {
        self.head
    }

    /// Weave every not-yet-integrated observation of `kb` into the context
    /// sequence and return the new head.
    pub async fn apply(&mut self, kb: &KnowledgeBase) -> Result<ContentId, StoreError> {
        for (source, head) in &kb.observations {
            let known = self.integrated.get(source).copied();
            if known == Some(*head) {
                continue;
            }

            // New nodes are the suffix between the advertised head and the
            // head integrated last time (or the whole chain for new sources).
            let mut fresh = Vec::new();
            let mut walker =
                SequenceWalker::<SequenceIdentity, CapturedObservation>::new(&self.store, *head);
            while let Some((cid, node)) = walker.next_node().await? {
                if Some(cid) == known {
                    break;
                }
                fresh.push(node.payload);
            }

            for capture in fresh.into_iter().rev() {
                self.head = extend::<ContextHead, _>(&self.store, self.head, capture).await?;
            }
            self.integrated.insert(*source, *head);
        }
        Ok(self.head)
    }
}
