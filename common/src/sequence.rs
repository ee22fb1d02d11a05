// Sequencing Primitive
// Append-only, hash-linked chains. `extend` persists one node and hands the
// new head cid back to the single writer; readers walk backward through the
// store until the identity sentinel.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cid::ContentId;
use crate::data::{SequenceHead, SequenceNode};
use crate::error::StoreError;
use crate::store::ContentStore;

/// Append `payload` to the chain ending at `head`, returning the new head
/// cid. Atomic at the granularity of one persisted node plus the caller's
/// head variable: on failure the prior head stays valid.
pub async fn extend<H, P>(store: &ContentStore, head: ContentId, payload: P) -> Result<ContentId, StoreError>
where
    H: Serialize + From<SequenceNode<P>>,
    P: Serialize,
{
    let node: H = SequenceNode { previous: head, payload }.into();
    store.put(&node).await
}

/// Iterative backward walk from a head cid to the identity sentinel. Depth
/// is bounded only by history length, never by recursion.
pub struct SequenceWalker<'a, I, P> {
    store: &'a ContentStore,
    next: Option<ContentId>,
    _marker: std::marker::PhantomData<fn() -> (I, P)>,
}

impl<'a, I, P> SequenceWalker<'a, I, P>
where
    I: DeserializeOwned,
    P: DeserializeOwned,
{
    pub fn new(store: &'a ContentStore, head: ContentId) -> Self {
        Self {
            store,
            next: Some(head),
            _marker: std::marker::PhantomData,
        }
    }

    /// Next node walking backward, with its cid; `None` once the identity
    /// sentinel is reached.
    pub async fn next_node(&mut self) -> Result<Option<(ContentId, SequenceNode<P>)>, StoreError> {
        let Some(cid) = self.next else {
            return Ok(None);
        };
        match self.store.get::<SequenceHead<I, P>>(&cid).await? {
            SequenceHead::Identity(_) => {
                self.next = None;
                Ok(None)
            }
            SequenceHead::Node(node) => {
                self.next = Some(node.previous);
                Ok(Some((cid, node)))
            }
        }
    }
}

/// Number of nodes between `head` and its identity sentinel.
pub async fn length<I, P>(store: &ContentStore, head: ContentId) -> Result<u64, StoreError>
where
    I: DeserializeOwned,
    P: DeserializeOwned,
{
    let mut walker = SequenceWalker::<I, P>::new(store, head);
    let mut count = 0;
    while walker.next_node().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ExecutedAction, ActionExecutionResult, ActionHead, ActionItem, ExecutionTrace, SequenceIdentity};
    use crate::codec;
    use chrono::Utc;

    fn executed(tag: &str) -> ExecutedAction {
        let now = Utc::now();
        ExecutedAction {
            action: ActionItem {
                action_type: tag.to_string(),
                action: codec::content_id(&tag).unwrap(),
            },
            result: ActionExecutionResult {
                trace: ExecutionTrace::Success,
                started_at: now,
                completed_at: now,
            },
        }
    }

    #[tokio::test]
    async fn test_walk_yields_reverse_append_order() {
        let store = ContentStore::ephemeral();
        let identity = store
            .put(&ActionHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();

        let mut head = identity;
        for tag in ["a", "b", "c"] {
            head = extend::<ActionHead, _>(&store, head, executed(tag)).await.unwrap();
        }

        let mut walker = SequenceWalker::<SequenceIdentity, ExecutedAction>::new(&store, head);
        let mut tags = Vec::new();
        while let Some((_, node)) = walker.next_node().await.unwrap() {
            tags.push(node.payload.action.action_type);
        }
        assert_eq!(tags, ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_walk_terminates_at_single_identity() {
        let store = ContentStore::ephemeral();
        let identity = store
            .put(&ActionHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();

        let mut head = identity;
        let extends = 5;
        for i in 0..extends {
            head = extend::<ActionHead, _>(&store, head, executed(&i.to_string())).await.unwrap();
        }

        // Node count walked equals extend calls that produced the head.
        let count = length::<SequenceIdentity, ExecutedAction>(&store, head).await.unwrap();
        assert_eq!(count, extends);

        // Walking the untouched identity yields nothing.
        let count = length::<SequenceIdentity, ExecutedAction>(&store, identity).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_extend_leaves_prior_head_valid() {
        let store = ContentStore::ephemeral();
        let identity = store
            .put(&ActionHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();
        let first = extend::<ActionHead, _>(&store, identity, executed("first")).await.unwrap();
        let _second = extend::<ActionHead, _>(&store, first, executed("second")).await.unwrap();

        // The earlier head still resolves and still walks to the identity.
        let count = length::<SequenceIdentity, ExecutedAction>(&store, first).await.unwrap();
        assert_eq!(count, 1);
    }
}
