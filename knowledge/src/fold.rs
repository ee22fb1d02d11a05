// Novelty Fold
// The accumulating half shared by integration and gossip deduplication:
// join an incoming knowledge base into the locally held value, and report
// growth through the cid comparison the content addressing makes cheap.

use std::sync::Arc;

use common::{ContentId, ContentStore, KnowledgeBase, StoreError};

use crate::join::join;

/// Locally accumulated knowledge base plus its cid for novelty tests.
pub struct KnowledgeFold {
    store: Arc<ContentStore>,
    current: KnowledgeBase,
    current_cid: ContentId,
}

impl KnowledgeFold {
    pub fn new(store: Arc<ContentStore>) -> Result<Self, StoreError> {
        let current = KnowledgeBase::default();
        let current_cid = store.cid(&current)?;
        Ok(Self {
            store,
            current,
            current_cid,
        })
    }

    pub fn current(&self) -> &KnowledgeBase {
        &self.current
    }

    pub fn current_cid(&self) -> ContentId {
        self.current_cid
    }

    /// Join `incoming` into the local value. On strict growth the merged
    /// value is persisted and its cid returned; re-received known
    /// information is a no-op.
    pub async fn absorb(&mut self, incoming: &KnowledgeBase) -> Result<Option<ContentId>, StoreError> {
        let merged = join(&self.store, &self.current, incoming).await?;
        let merged_cid = self.store.cid(&merged)?;
        if merged_cid == self.current_cid {
            return Ok(None);
        }

        let persisted = self.store.put(&merged).await?;
        self.current = merged;
        self.current_cid = persisted;
        Ok(Some(persisted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::codec;
    use common::sequence::extend;
    use common::{CapturedObservation, ObservationHead, SequenceIdentity};

    #[tokio::test]
    async fn test_absorb_reports_growth_once() {
        let store = Arc::new(ContentStore::ephemeral());
        let identity = store
            .put(&ObservationHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();
        let head = extend::<ObservationHead, _>(
            &store,
            identity,
            CapturedObservation {
                at: Utc::now(),
                percept_type: "quote".to_string(),
                observation: codec::content_id(&"payload").unwrap(),
            },
        )
        .await
        .unwrap();

        let mut fold = KnowledgeFold::new(store).unwrap();
        let singleton = KnowledgeBase::observation(identity, head);

        let grown = fold.absorb(&singleton).await.unwrap();
        assert!(grown.is_some());
        assert_eq!(grown.unwrap(), fold.current_cid());

        // Same delta again: already known, nothing to forward.
        assert!(fold.absorb(&singleton).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_absorbed_value_is_resolvable() {
        let store = Arc::new(ContentStore::ephemeral());
        let identity = store
            .put(&ObservationHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();

        let mut fold = KnowledgeFold::new(store.clone()).unwrap();
        let cid = fold
            .absorb(&KnowledgeBase::observation(identity, identity))
            .await
            .unwrap()
            .unwrap();

        let fetched: KnowledgeBase = store.get(&cid).await.unwrap();
        assert_eq!(&fetched, fold.current());
    }
}
