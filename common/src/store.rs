// Layered Content Store
// Tier order on reads: bounded in-process byte cache, durable local
// key-value store, network content store. Writes hit the first two tiers
// synchronously; the network tier is fire-and-forget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::cid::ContentId;
use crate::codec;
use crate::error::StoreError;
use crate::io::{Shutdown, StreamInput};
use crate::messages::BlobGossip;

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Byte budget for the in-process cache tier.
    pub memory_budget_bytes: usize,
    /// Payloads at or under this size are additionally broadcast on the bus
    /// so peers can seed their memory tier without a store round trip.
    pub broadcast_max_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 64 * 1024 * 1024,
            broadcast_max_bytes: 4 * 1024,
        }
    }
}

/// Durable local key-value tier.
pub trait LocalStore: Send + Sync {
    fn get(&self, cid: &ContentId) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, cid: &ContentId, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Remote content store tier. Explicit extension point; the provided
/// [`OfflineNetworkStore`] fails closed.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    async fn fetch(&self, cid: &ContentId) -> Result<Option<Vec<u8>>, StoreError>;
    async fn push(&self, cid: &ContentId, bytes: &[u8]) -> Result<(), StoreError>;
    async fn pin(&self, cid: &ContentId) -> bool;

    /// Whether uploads are worth scheduling at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Stub network tier: resolves nothing, pins nothing.
pub struct OfflineNetworkStore;

#[async_trait]
impl NetworkStore for OfflineNetworkStore {
    async fn fetch(&self, _cid: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    async fn push(&self, _cid: &ContentId, _bytes: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn pin(&self, _cid: &ContentId) -> bool {
        false
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Sled-backed durable tier.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Local(e.to_string()))?;
        Ok(Self { db })
    }
}

impl LocalStore for SledStore {
    fn get(&self, cid: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .db
            .get(cid.as_bytes())
            .map_err(|e| StoreError::Local(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, cid: &ContentId, bytes: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(cid.as_bytes(), bytes)
            .map_err(|e| StoreError::Local(e.to_string()))?;
        Ok(())
    }
}

/// In-memory durable-tier stand-in for tests and ephemeral processes.
#[derive(Default)]
pub struct MemoryLocalStore {
    entries: DashMap<ContentId, Vec<u8>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, cid: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(cid).map(|entry| entry.value().clone()))
    }

    fn put(&self, cid: &ContentId, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(*cid, bytes.to_vec());
        Ok(())
    }
}

/// Bounded cid -> bytes cache with FIFO eviction against a byte budget.
/// Duplicate inserts of identical content are no-ops.
struct MemoryCache {
    entries: DashMap<ContentId, Arc<[u8]>>,
    order: Mutex<VecDeque<ContentId>>,
    used: AtomicUsize,
    budget: usize,
}

impl MemoryCache {
    fn new(budget: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            used: AtomicUsize::new(0),
            budget,
        }
    }

    fn get(&self, cid: &ContentId) -> Option<Arc<[u8]>> {
        self.entries.get(cid).map(|entry| entry.value().clone())
    }

    fn insert(&self, cid: ContentId, bytes: Arc<[u8]>) {
        let len = bytes.len();
        if self.entries.insert(cid, bytes).is_some() {
            // Same content id, same content.
            return;
        }

        self.used.fetch_add(len, Ordering::Relaxed);
        let mut order = self.order.lock().expect("cache order lock poisoned");
        order.push_back(cid);

        while self.used.load(Ordering::Relaxed) > self.budget {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            if let Some((_, evicted)) = self.entries.remove(&oldest) {
                self.used.fetch_sub(evicted.len(), Ordering::Relaxed);
            }
        }
    }
}

/// Content-addressed get/put/pin over the layered tiers.
pub struct ContentStore {
    config: StoreConfig,
    memory: MemoryCache,
    local: Box<dyn LocalStore>,
    network: Arc<dyn NetworkStore>,
    blob_gossip: Mutex<Option<mpsc::UnboundedSender<BlobGossip>>>,
}

impl ContentStore {
    pub fn new(config: StoreConfig, local: Box<dyn LocalStore>, network: Arc<dyn NetworkStore>) -> Self {
        let memory = MemoryCache::new(config.memory_budget_bytes);
        Self {
            config,
            memory,
            local,
            network,
            blob_gossip: Mutex::new(None),
        }
    }

    /// Ephemeral store: memory-backed tiers, offline network. For tests and
    /// single-process runs that do not need durability.
    pub fn ephemeral() -> Self {
        Self::new(
            StoreConfig::default(),
            Box::new(MemoryLocalStore::new()),
            Arc::new(OfflineNetworkStore),
        )
    }

    /// Attach the small-payload broadcast. Subsequent puts under the size
    /// threshold are queued here for an `EmitOutput<BlobGossip>` stage.
    pub fn attach_blob_gossip(&self) -> mpsc::UnboundedReceiver<BlobGossip> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.blob_gossip.lock().expect("gossip lock poisoned") = Some(tx);
        rx
    }

    /// Content id of a value, computed locally. Seeds the memory tier so an
    /// immediate `get` of the same cid stays in-process.
    pub fn cid<T: Serialize>(&self, value: &T) -> Result<ContentId, StoreError> {
        let (cid, bytes) = codec::encode(value)?;
        self.memory.insert(cid, bytes.into());
        Ok(cid)
    }

    /// Persist a value: memory and local tiers synchronously, network tier
    /// fire-and-forget, small payloads broadcast best-effort.
    pub async fn put<T: Serialize>(&self, value: &T) -> Result<ContentId, StoreError> {
        let (cid, bytes) = codec::encode(value)?;
        let bytes: Arc<[u8]> = bytes.into();

        self.memory.insert(cid, bytes.clone());
        self.local.put(&cid, &bytes)?;

        if self.network.enabled() {
            let network = self.network.clone();
            let upload = bytes.clone();
            tokio::spawn(async move {
                if let Err(e) = network.push(&cid, &upload).await {
                    debug!(%cid, error = %e, "network upload failed");
                }
            });
        }

        if bytes.len() <= self.config.broadcast_max_bytes {
            let gossip = self.blob_gossip.lock().expect("gossip lock poisoned");
            if let Some(tx) = gossip.as_ref() {
                let _ = tx.send(BlobGossip {
                    cid,
                    bytes: bytes.to_vec(),
                    kind: std::any::type_name::<T>().to_string(),
                });
            }
        }

        Ok(cid)
    }

    /// Resolve a cid through the tiers in order; `NotFound` when every tier
    /// misses. A failing network tier is treated as a miss: it fails
    /// closed, it does not fail the caller with a transport error.
    pub async fn get<T: DeserializeOwned>(&self, cid: &ContentId) -> Result<T, StoreError> {
        if let Some(bytes) = self.memory.get(cid) {
            return Ok(codec::decode(cid, &bytes)?);
        }

        if let Some(bytes) = self.local.get(cid)? {
            let value = codec::decode(cid, &bytes)?;
            self.memory.insert(*cid, bytes.into());
            return Ok(value);
        }

        match self.network.fetch(cid).await {
            Ok(Some(bytes)) => {
                if codec::digest(&bytes) != *cid {
                    warn!(%cid, "network tier returned bytes with a mismatched digest");
                    return Err(StoreError::NotFound(*cid));
                }
                let value = codec::decode(cid, &bytes)?;
                self.local.put(cid, &bytes)?;
                self.memory.insert(*cid, bytes.into());
                Ok(value)
            }
            Ok(None) => Err(StoreError::NotFound(*cid)),
            Err(e) => {
                debug!(%cid, error = %e, "network fetch failed; treating as miss");
                Err(StoreError::NotFound(*cid))
            }
        }
    }

    /// Best-effort pin on the network tier.
    pub async fn pin(&self, cid: &ContentId) -> bool {
        self.network.pin(cid).await
    }

    /// Seed the memory tier with broadcast bytes after verifying their
    /// digest. Mismatches are dropped.
    pub fn accept_blob(&self, blob: &BlobGossip) {
        if codec::digest(&blob.bytes) != blob.cid {
            warn!(cid = %blob.cid, kind = %blob.kind, "dropping blob gossip with mismatched digest");
            return;
        }
        self.memory.insert(blob.cid, blob.bytes.clone().into());
    }
}

/// Stage draining small-payload broadcasts from the bus into the memory
/// tier of `store`.
pub async fn run_blob_gossip(
    store: Arc<ContentStore>,
    bus: Arc<dyn MessageBus>,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut input = StreamInput::<BlobGossip>::subscribe(bus.as_ref())?;
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            blob = input.recv() => {
                let Some(blob) = blob else { break };
                store.accept_blob(&blob);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StrategyManifest;

    fn manifest(version: &str) -> StrategyManifest {
        StrategyManifest {
            name: "test".to_string(),
            version: version.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = ContentStore::ephemeral();
        let value = manifest("1.0.0");
        let cid = store.put(&value).await.unwrap();
        let back: StrategyManifest = store.get(&cid).await.unwrap();
        assert_eq!(value, back);
    }

    #[tokio::test]
    async fn test_get_unknown_cid_is_not_found() {
        let store = ContentStore::ephemeral();
        let cid = codec::content_id(&manifest("2.0.0")).unwrap();
        let err = store.get::<StrategyManifest>(&cid).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(missing) if missing == cid));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_tier_after_eviction() {
        let config = StoreConfig {
            memory_budget_bytes: 1, // every insert immediately evicts
            ..StoreConfig::default()
        };
        let store = ContentStore::new(config, Box::new(MemoryLocalStore::new()), Arc::new(OfflineNetworkStore));

        let value = manifest("3.0.0");
        let cid = store.put(&value).await.unwrap();
        let back: StrategyManifest = store.get(&cid).await.unwrap();
        assert_eq!(value, back);
    }

    #[tokio::test]
    async fn test_sled_tier_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let value = manifest("4.0.0");

        let cid = {
            let store = ContentStore::new(
                StoreConfig::default(),
                Box::new(SledStore::open(dir.path()).unwrap()),
                Arc::new(OfflineNetworkStore),
            );
            store.put(&value).await.unwrap()
        };

        let store = ContentStore::new(
            StoreConfig::default(),
            Box::new(SledStore::open(dir.path()).unwrap()),
            Arc::new(OfflineNetworkStore),
        );
        let back: StrategyManifest = store.get(&cid).await.unwrap();
        assert_eq!(value, back);
    }

    #[tokio::test]
    async fn test_small_payloads_are_broadcast() {
        let store = ContentStore::ephemeral();
        let mut gossip = store.attach_blob_gossip();

        let cid = store.put(&manifest("5.0.0")).await.unwrap();
        let blob = gossip.recv().await.unwrap();
        assert_eq!(blob.cid, cid);
        assert_eq!(codec::digest(&blob.bytes), cid);
    }

    #[tokio::test]
    async fn test_blob_gossip_rejects_mismatched_digest() {
        let store = ContentStore::ephemeral();
        let cid = codec::content_id(&manifest("6.0.0")).unwrap();
        store.accept_blob(&BlobGossip {
            cid,
            bytes: b"tampered".to_vec(),
            kind: "test".to_string(),
        });
        let err = store.get::<StrategyManifest>(&cid).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_blob_gossip_seeds_memory_tier() {
        let source = ContentStore::ephemeral();
        let value = manifest("7.0.0");
        let cid = source.put(&value).await.unwrap();
        let (_, bytes) = codec::encode(&value).unwrap();

        let sink = ContentStore::ephemeral();
        sink.accept_blob(&BlobGossip {
            cid,
            bytes,
            kind: "test".to_string(),
        });
        let back: StrategyManifest = sink.get(&cid).await.unwrap();
        assert_eq!(value, back);
    }
}
