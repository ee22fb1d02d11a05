// Query Context
// Read-only queries over one context snapshot. The index is built once at
// load time and reused across queries; `latest` walks the raw chain instead
// (index acceleration for it is a known candidate optimization).

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use common::sequence::SequenceWalker;
use common::{
    CapturedObservation, ContentId, ContentStore, ContextError, ContextHead, Percept,
    SequenceHead, SequenceIdentity,
};

use crate::context::index::ContextIndex;

/// A captured observation with its percept decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed<P> {
    pub at: DateTime<Utc>,
    pub percept: P,
}

/// Point-in-time view over a context sequence snapshot.
pub struct QueryContext {
    store: Arc<ContentStore>,
    head: ContentId,
    index: ContextIndex,
}

impl QueryContext {
    pub async fn load(
        store: Arc<ContentStore>,
        head: ContentId,
        earliest_available: DateTime<Utc>,
    ) -> Result<Self, ContextError> {
        let index = ContextIndex::build(&store, head, earliest_available).await?;
        Ok(Self { store, head, index })
    }

    pub fn head(&self) -> ContentId {
        self.head
    }

    pub fn earliest_observation(&self) -> DateTime<Utc> {
        self.index.earliest()
    }

    pub fn latest_observation(&self) -> DateTime<Utc> {
        self.index.latest()
    }

    /// Most recent observation of percept type `P`, or `None` if the whole
    /// chain holds none.
    pub async fn latest<P: Percept>(&self) -> Result<Option<Observed<P>>, ContextError> {
        let mut walker =
            SequenceWalker::<SequenceIdentity, CapturedObservation>::new(&self.store, self.head);
        while let Some((_, node)) = walker.next_node().await? {
            if node.payload.percept_type == P::PERCEPT_TYPE {
                let percept: P = self.store.get(&node.payload.observation).await?;
                return Ok(Some(Observed { at: node.payload.at, percept }));
            }
        }
        Ok(None)
    }

    /// Observations of percept type `P` with timestamps in `[from, to]`,
    /// yielded lazily in time order.
    pub fn in_time_range<P: Percept>(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> RangeQuery<'_, P> {
        RangeQuery {
            store: self.store.as_ref(),
            pending: self.index.forward_walk(from, to).into_iter(),
            _marker: PhantomData,
        }
    }
}

/// Lazy forward walk over the pre-built index; nodes are fetched and
/// filtered one at a time as the caller pulls.
pub struct RangeQuery<'a, P> {
    store: &'a ContentStore,
    pending: std::vec::IntoIter<ContentId>,
    _marker: PhantomData<fn() -> P>,
}

impl<P: Percept> RangeQuery<'_, P> {
    pub async fn next(&mut self) -> Result<Option<Observed<P>>, ContextError> {
        for cid in self.pending.by_ref() {
            let head: ContextHead = self.store.get(&cid).await?;
            let SequenceHead::Node(node) = head else {
                // The index never records identity sentinels.
                continue;
            };
            if node.payload.percept_type != P::PERCEPT_TYPE {
                continue;
            }
            let percept: P = self.store.get(&node.payload.observation).await?;
            return Ok(Some(Observed { at: node.payload.at, percept }));
        }
        Ok(None)
    }

    /// Drain the remaining matches.
    pub async fn collect(mut self) -> Result<Vec<Observed<P>>, ContextError> {
        let mut observed = Vec::new();
        while let Some(next) = self.next().await? {
            observed.push(next);
        }
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde::{Deserialize, Serialize};

    use common::sequence::extend;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        bid: i64,
    }

    impl Percept for Quote {
        const PERCEPT_TYPE: &'static str = "quote";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Headline {
        text: String,
    }

    impl Percept for Headline {
        const PERCEPT_TYPE: &'static str = "headline";
    }

    async fn capture<P: Percept>(
        store: &ContentStore,
        head: ContentId,
        at: DateTime<Utc>,
        percept: &P,
    ) -> ContentId {
        let observation = store.put(percept).await.unwrap();
        let node = CapturedObservation {
            at,
            percept_type: P::PERCEPT_TYPE.to_string(),
            observation,
        };
        extend::<ContextHead, _>(store, head, node).await.unwrap()
    }

    async fn mixed_context(store: &Arc<ContentStore>) -> (QueryContext, DateTime<Utc>) {
        let base = Utc::now();
        let mut head = store
            .put(&ContextHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();
        head = capture(store, head, base, &Quote { bid: 1 }).await;
        head = capture(store, head, base + Duration::seconds(1), &Headline { text: "fed".into() }).await;
        head = capture(store, head, base + Duration::seconds(2), &Quote { bid: 2 }).await;

        let context = QueryContext::load(store.clone(), head, base - Duration::hours(1))
            .await
            .unwrap();
        (context, base)
    }

    #[tokio::test]
    async fn test_latest_returns_most_recent_of_type() {
        let store = Arc::new(ContentStore::ephemeral());
        let (context, _) = mixed_context(&store).await;

        let latest = context.latest::<Quote>().await.unwrap().unwrap();
        assert_eq!(latest.percept, Quote { bid: 2 });

        let latest = context.latest::<Headline>().await.unwrap().unwrap();
        assert_eq!(latest.percept.text, "fed");
    }

    #[tokio::test]
    async fn test_latest_is_none_for_absent_type() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Funding {
            rate: i64,
        }
        impl Percept for Funding {
            const PERCEPT_TYPE: &'static str = "funding";
        }

        let store = Arc::new(ContentStore::ephemeral());
        let (context, _) = mixed_context(&store).await;
        assert!(context.latest::<Funding>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_time_range_filters_by_type_and_time() {
        let store = Arc::new(ContentStore::ephemeral());
        let (context, base) = mixed_context(&store).await;

        let quotes = context
            .in_time_range::<Quote>(base, base + Duration::seconds(2))
            .collect()
            .await
            .unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].percept.bid, 1);
        assert_eq!(quotes[1].percept.bid, 2);

        let quotes = context
            .in_time_range::<Quote>(base + Duration::seconds(1), base + Duration::seconds(2))
            .collect()
            .await
            .unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].percept.bid, 2);
    }

    #[tokio::test]
    async fn test_index_reusable_across_queries() {
        let store = Arc::new(ContentStore::ephemeral());
        let (context, base) = mixed_context(&store).await;

        for _ in 0..2 {
            let headlines = context
                .in_time_range::<Headline>(base, base + Duration::seconds(2))
                .collect()
                .await
                .unwrap();
            assert_eq!(headlines.len(), 1);
        }
    }
}
