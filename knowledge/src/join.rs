// Knowledge-Base Join
// Per identity key present in either operand, keep the longer chain; the
// shorter one is a prefix by monotonic-extension construction. Absent keys
// are a union no-op. The operation is total over well-formed chains; only
// store failures propagate.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use common::sequence::SequenceWalker;
use common::{
    CapturedObservation, ContentId, ContentStore, ExecutedAction, KnowledgeBase, SequenceIdentity,
    StoreError,
};

/// Merge two knowledge bases. Observation and action maps use the same
/// per-key rule.
pub async fn join(store: &ContentStore, a: &KnowledgeBase, b: &KnowledgeBase) -> Result<KnowledgeBase, StoreError> {
    let observations =
        join_map::<SequenceIdentity, CapturedObservation>(store, &a.observations, &b.observations).await?;
    let actions = join_map::<SequenceIdentity, ExecutedAction>(store, &a.actions, &b.actions).await?;
    Ok(KnowledgeBase { observations, actions })
}

async fn join_map<I, P>(
    store: &ContentStore,
    left: &BTreeMap<ContentId, ContentId>,
    right: &BTreeMap<ContentId, ContentId>,
) -> Result<BTreeMap<ContentId, ContentId>, StoreError>
where
    I: DeserializeOwned,
    P: DeserializeOwned,
{
    let mut merged = left.clone();
    for (identity, incoming) in right {
        match merged.get(identity).copied() {
            None => {
                merged.insert(*identity, *incoming);
            }
            Some(current) if current == *incoming => {}
            Some(current) => {
                let winner = pick_longer::<I, P>(store, current, *incoming).await?;
                merged.insert(*identity, winner);
            }
        }
    }
    Ok(merged)
}

/// Longer-chain rule for two distinct heads under one key. A head found in
/// the other head's history is the shorter chain. Two independent chains
/// (impossible under single-writer extension, but the join must stay total
/// and commutative) resolve by length, then by the greater cid.
async fn pick_longer<I, P>(store: &ContentStore, a: ContentId, b: ContentId) -> Result<ContentId, StoreError>
where
    I: DeserializeOwned,
    P: DeserializeOwned,
{
    let (len_a, a_contains_b) = scan::<I, P>(store, a, b).await?;
    if a_contains_b {
        return Ok(a);
    }
    let (len_b, b_contains_a) = scan::<I, P>(store, b, a).await?;
    if b_contains_a {
        return Ok(b);
    }

    if len_a != len_b {
        Ok(if len_a > len_b { a } else { b })
    } else {
        Ok(a.max(b))
    }
}

/// Walk `head` backward counting nodes, stopping early if `target` shows up
/// in its history.
async fn scan<I, P>(store: &ContentStore, head: ContentId, target: ContentId) -> Result<(u64, bool), StoreError>
where
    I: DeserializeOwned,
    P: DeserializeOwned,
{
    let mut walker = SequenceWalker::<I, P>::new(store, head);
    let mut length = 0;
    while let Some((cid, _)) = walker.next_node().await? {
        length += 1;
        if cid == target {
            return Ok((length, true));
        }
    }
    Ok((length, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::codec;
    use common::sequence::extend;
    use common::ObservationHead;

    async fn new_chain(store: &ContentStore) -> ContentId {
        store
            .put(&ObservationHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap()
    }

    async fn extend_chain(store: &ContentStore, head: ContentId, tag: &str) -> ContentId {
        let capture = CapturedObservation {
            at: Utc::now(),
            percept_type: tag.to_string(),
            observation: codec::content_id(&tag).unwrap(),
        };
        extend::<ObservationHead, _>(store, head, capture).await.unwrap()
    }

    #[tokio::test]
    async fn test_join_is_commutative_and_idempotent() {
        let store = ContentStore::ephemeral();
        let first = new_chain(&store).await;
        let first_head = extend_chain(&store, first, "price").await;
        let second = new_chain(&store).await;
        let second_head = extend_chain(&store, second, "volume").await;

        let a = KnowledgeBase::observation(first, first_head);
        let b = KnowledgeBase::observation(second, second_head);

        let ab = join(&store, &a, &b).await.unwrap();
        let ba = join(&store, &b, &a).await.unwrap();
        assert_eq!(ab, ba);

        // join(a, join(a, b)) == join(a, b)
        let again = join(&store, &a, &ab).await.unwrap();
        assert_eq!(again, ab);
        assert_eq!(codec::content_id(&again).unwrap(), codec::content_id(&ab).unwrap());
    }

    #[tokio::test]
    async fn test_join_keeps_longer_chain_per_key() {
        let store = ContentStore::ephemeral();
        let identity = new_chain(&store).await;
        let short = extend_chain(&store, identity, "one").await;
        let long = extend_chain(&store, short, "two").await;

        let holds_short = KnowledgeBase::observation(identity, short);
        let holds_long = KnowledgeBase::observation(identity, long);

        let merged = join(&store, &holds_short, &holds_long).await.unwrap();
        assert_eq!(merged.observations[&identity], long);

        let merged = join(&store, &holds_long, &holds_short).await.unwrap();
        assert_eq!(merged.observations[&identity], long);
    }

    #[tokio::test]
    async fn test_join_unions_absent_keys() {
        let store = ContentStore::ephemeral();
        let first = new_chain(&store).await;
        let first_head = extend_chain(&store, first, "price").await;
        let second = new_chain(&store).await;
        let second_head = extend_chain(&store, second, "volume").await;

        let merged = join(
            &store,
            &KnowledgeBase::observation(first, first_head),
            &KnowledgeBase::observation(second, second_head),
        )
        .await
        .unwrap();

        assert_eq!(merged.observations.len(), 2);
        assert_eq!(merged.observations[&first], first_head);
        assert_eq!(merged.observations[&second], second_head);
    }

    #[tokio::test]
    async fn test_join_tie_break_is_order_independent() {
        let store = ContentStore::ephemeral();
        // Two independent equal-length chains forced under one key.
        let identity = new_chain(&store).await;
        let left = extend_chain(&store, new_chain(&store).await, "left").await;
        let right = extend_chain(&store, new_chain(&store).await, "right").await;

        let a = KnowledgeBase::observation(identity, left);
        let b = KnowledgeBase::observation(identity, right);

        let ab = join(&store, &a, &b).await.unwrap();
        let ba = join(&store, &b, &a).await.unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.observations[&identity], left.max(right));
    }

    #[tokio::test]
    async fn test_join_merges_action_map_symmetrically() {
        let store = ContentStore::ephemeral();
        let identity = store
            .put(&common::ActionHead::Identity(SequenceIdentity::random()))
            .await
            .unwrap();

        let merged = join(
            &store,
            &KnowledgeBase::default(),
            &KnowledgeBase::action(identity, identity),
        )
        .await
        .unwrap();
        assert_eq!(merged.actions[&identity], identity);
        assert!(merged.observations.is_empty());
    }
}
