// Context Index
// Backward walk over one context sequence snapshot, recording timestamp ->
// node cid until the identity sentinel or the availability cutoff. Bounds
// memory for long-lived contexts; older nodes stay in the store, just not
// in this index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use common::sequence::SequenceWalker;
use common::{CapturedObservation, ContentId, ContentStore, ContextError, SequenceIdentity};

/// Process-local, derived, never persisted. Owned exclusively by its query
/// context; a new snapshot needs a new index.
#[derive(Debug)]
pub struct ContextIndex {
    nodes: BTreeMap<DateTime<Utc>, ContentId>,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl ContextIndex {
    /// Build over the chain ending at `head`. Indexing stops at the identity
    /// sentinel or at the first node older than `earliest_available` (that
    /// node is still included). Zero nodes is `InvalidRange`; an index over
    /// nothing answers nothing.
    pub async fn build(
        store: &ContentStore,
        head: ContentId,
        earliest_available: DateTime<Utc>,
    ) -> Result<Self, ContextError> {
        let mut nodes = BTreeMap::new();
        let mut earliest = None;
        let mut latest = None;

        let mut walker = SequenceWalker::<SequenceIdentity, CapturedObservation>::new(store, head);
        while let Some((cid, node)) = walker.next_node().await? {
            let at = node.payload.at;

            // Walking backward meets the later node first; it wins ties on a
            // discrete timestamp.
            nodes.entry(at).or_insert(cid);
            if latest.is_none() {
                latest = Some(at);
            }
            earliest = Some(at);

            if at < earliest_available {
                break;
            }
        }

        match (earliest, latest) {
            (Some(earliest), Some(latest)) => Ok(Self { nodes, earliest, latest }),
            _ => Err(ContextError::InvalidRange),
        }
    }

    pub fn earliest(&self) -> DateTime<Utc> {
        self.earliest
    }

    pub fn latest(&self) -> DateTime<Utc> {
        self.latest
    }

    /// Node cids with timestamps in `[from, to]`, in time order.
    pub(crate) fn forward_walk(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ContentId> {
        if from > to {
            return Vec::new();
        }
        self.nodes.range(from..=to).map(|(_, cid)| *cid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::codec;
    use common::sequence::extend;
    use common::ContextHead;

    async fn chain(store: &ContentStore, stamps: &[DateTime<Utc>]) -> ContentId {
        let mut head = store
            .put(&ContextHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();
        for (i, at) in stamps.iter().enumerate() {
            let capture = CapturedObservation {
                at: *at,
                percept_type: "tick".to_string(),
                observation: codec::content_id(&i).unwrap(),
            };
            head = extend::<ContextHead, _>(store, head, capture).await.unwrap();
        }
        head
    }

    #[tokio::test]
    async fn test_indexes_full_chain_within_range() {
        let store = ContentStore::ephemeral();
        let base = Utc::now();
        let stamps: Vec<_> = (0..3).map(|i| base + Duration::seconds(i)).collect();
        let head = chain(&store, &stamps).await;

        let index = ContextIndex::build(&store, head, base - Duration::hours(1)).await.unwrap();
        assert_eq!(index.earliest(), stamps[0]);
        assert_eq!(index.latest(), stamps[2]);
        assert_eq!(index.forward_walk(stamps[0], stamps[2]).len(), 3);
    }

    #[tokio::test]
    async fn test_stops_indexing_at_cutoff() {
        let store = ContentStore::ephemeral();
        let base = Utc::now();
        let stamps: Vec<_> = (0..10).map(|i| base + Duration::seconds(i)).collect();
        let head = chain(&store, &stamps).await;

        // Cutoff inside the chain: nodes older than stamps[5] stop the walk.
        let index = ContextIndex::build(&store, head, stamps[5]).await.unwrap();
        assert_eq!(index.latest(), stamps[9]);
        // The first node older than the cutoff is still included.
        assert_eq!(index.earliest(), stamps[4]);
        assert_eq!(index.forward_walk(stamps[0], stamps[9]).len(), 6);
    }

    #[tokio::test]
    async fn test_empty_chain_is_invalid_range() {
        let store = ContentStore::ephemeral();
        let identity = store
            .put(&ContextHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();

        let err = ContextIndex::build(&store, identity, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidRange));
    }

    #[tokio::test]
    async fn test_forward_walk_respects_bounds() {
        let store = ContentStore::ephemeral();
        let base = Utc::now();
        let stamps: Vec<_> = (0..5).map(|i| base + Duration::seconds(i)).collect();
        let head = chain(&store, &stamps).await;

        let index = ContextIndex::build(&store, head, base - Duration::hours(1)).await.unwrap();
        assert_eq!(index.forward_walk(stamps[1], stamps[3]).len(), 3);
        assert!(index.forward_walk(stamps[3], stamps[1]).is_empty());
    }
}
