//! Hot (fast path) and cold (durable, partitioned) block storage

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{Block, ChainHead};

/// Errors from ledger storage backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a conditional append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The head moved since it was read; nothing was written
    HeadMoved,
}

/// Fast, authoritative storage for recent chain state
///
/// `append` must be atomic: head, latest sensor payload, recent list and
/// known-entity registration change together or not at all.
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn head(&self, entity_id: &str) -> Result<Option<ChainHead>, StoreError>;

    async fn latest_signals(
        &self,
        entity_id: &str,
        sensor: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError>;

    /// Append only if the current head hash equals `expected_head`
    /// (`None` for an empty chain).
    async fn append(
        &self,
        block: &Block,
        expected_head: Option<&str>,
    ) -> Result<AppendOutcome, StoreError>;

    /// Most recent blocks, newest first
    async fn recent_blocks(&self, entity_id: &str, limit: usize) -> Result<Vec<Block>, StoreError>;

    async fn known_entities(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
struct EntityChain {
    head: Option<ChainHead>,
    latest: HashMap<String, Map<String, Value>>,
    recent: VecDeque<Block>,
}

/// In-process hot store backed by `DashMap`
pub struct MemoryHotStore {
    chains: DashMap<String, EntityChain>,
    entities: DashSet<String>,
    max_recent: usize,
}

impl MemoryHotStore {
    pub fn new(max_recent: usize) -> Self {
        Self {
            chains: DashMap::new(),
            entities: DashSet::new(),
            max_recent: max_recent.max(1),
        }
    }

    /// Overwrite a stored block in place, bypassing chain rules
    #[cfg(test)]
    pub(crate) fn overwrite(&self, block: Block) {
        if let Some(mut chain) = self.chains.get_mut(&block.entity_id) {
            if let Some(slot) = chain
                .recent
                .iter_mut()
                .find(|b| b.block_index == block.block_index)
            {
                *slot = block;
            }
        }
    }
}

impl Default for MemoryHotStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_RECENT)
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn head(&self, entity_id: &str) -> Result<Option<ChainHead>, StoreError> {
        Ok(self.chains.get(entity_id).and_then(|c| c.head.clone()))
    }

    async fn latest_signals(
        &self,
        entity_id: &str,
        sensor: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self
            .chains
            .get(entity_id)
            .and_then(|c| c.latest.get(sensor).cloned()))
    }

    async fn append(
        &self,
        block: &Block,
        expected_head: Option<&str>,
    ) -> Result<AppendOutcome, StoreError> {
        // The entry guard holds the shard lock for the whole update
        let mut chain = self.chains.entry(block.entity_id.clone()).or_default();
        let current = chain.head.as_ref().map(|h| h.hash.as_str());
        if current != expected_head {
            return Ok(AppendOutcome::HeadMoved);
        }

        chain.head = Some(block.head());
        chain.latest.insert(block.sensor.clone(), block.signals.clone());
        chain.recent.push_back(block.clone());
        while chain.recent.len() > self.max_recent {
            chain.recent.pop_front();
        }
        drop(chain);

        self.entities.insert(block.entity_id.clone());
        Ok(AppendOutcome::Appended)
    }

    async fn recent_blocks(&self, entity_id: &str, limit: usize) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .chains
            .get(entity_id)
            .map(|c| c.recent.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn known_entities(&self) -> Result<Vec<String>, StoreError> {
        let mut entities: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        entities.sort();
        Ok(entities)
    }
}

/// Durable append-only storage; failures here never fail a record call
#[async_trait]
pub trait ColdStore: Send + Sync {
    async fn append(&self, block: &Block) -> Result<(), StoreError>;
}

/// JSON Lines lake partitioned by entity, date and sensor
///
/// Layout: `{base}/{entity}/{YYYY}/{MM}/{DD}/{sensor}.jsonl`
pub struct JsonlLake {
    base: PathBuf,
}

impl JsonlLake {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Partition file for a block
    pub fn path_for(&self, block: &Block) -> PathBuf {
        let ts = block.observed_at;
        self.base
            .join(path_segment(&block.entity_id))
            .join(ts.format("%Y").to_string())
            .join(ts.format("%m").to_string())
            .join(ts.format("%d").to_string())
            .join(format!("{}.jsonl", path_segment(&block.sensor)))
    }
}

/// Single path component: anything but ASCII alphanumerics and `-` becomes `_`
fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ColdStore for JsonlLake {
    async fn append(&self, block: &Block) -> Result<(), StoreError> {
        let path = self.path_for(block);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line =
            serde_json::to_string(block).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every block from one lake partition file
pub async fn read_partition(path: &Path) -> Result<Vec<Block>, StoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| StoreError::Corrupt(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observation_time, BlockDraft, Delta, GENESIS_HASH};

    fn make_block(entity: &str, index: u64, prev: &str) -> Block {
        let signals = Map::new();
        let observed_at = observation_time();
        let block_hash = BlockDraft {
            entity_id: entity,
            sensor: "dns",
            block_index: index,
            observed_at,
            signals: &signals,
            prev_hash: prev,
        }
        .content_hash();
        Block {
            entity_id: entity.into(),
            sensor: "dns".into(),
            block_index: index,
            observed_at,
            signals,
            prev_hash: prev.into(),
            block_hash,
            delta: Delta::new(),
            collection_time_ms: 0,
            sensor_version: "3.0.0".into(),
            node_id: "node-0".into(),
        }
    }

    #[tokio::test]
    async fn test_append_requires_current_head() {
        let store = MemoryHotStore::new(10);
        let first = make_block("e", 0, GENESIS_HASH);
        assert_eq!(store.append(&first, None).await.unwrap(), AppendOutcome::Appended);

        let stale = make_block("e", 1, GENESIS_HASH);
        assert_eq!(store.append(&stale, None).await.unwrap(), AppendOutcome::HeadMoved);

        let next = make_block("e", 1, &first.block_hash);
        assert_eq!(
            store.append(&next, Some(&first.block_hash)).await.unwrap(),
            AppendOutcome::Appended
        );
        assert_eq!(store.head("e").await.unwrap().unwrap().index, 1);
        assert_eq!(store.known_entities().await.unwrap(), vec!["e".to_string()]);
    }

    #[tokio::test]
    async fn test_recent_list_is_bounded() {
        let store = MemoryHotStore::new(3);
        let mut prev: Option<String> = None;
        for i in 0..5 {
            let block = make_block("e", i, prev.as_deref().unwrap_or(GENESIS_HASH));
            store.append(&block, prev.as_deref()).await.unwrap();
            prev = Some(block.block_hash.clone());
        }
        let recent = store.recent_blocks("e", 100).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].block_index, 4);
    }

    #[tokio::test]
    async fn test_lake_partitions_by_date_and_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let lake = JsonlLake::new(dir.path());
        let block = make_block("open:example.com", 0, GENESIS_HASH);

        lake.append(&block).await.unwrap();
        lake.append(&block).await.unwrap();

        let path = lake.path_for(&block);
        assert!(path.ends_with("dns.jsonl"));
        assert!(path.starts_with(dir.path().join("open_example_com")));
        let stored = read_partition(&path).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], block);
    }

    #[test]
    fn test_sensor_cannot_escape_partition() {
        let lake = JsonlLake::new("/lake");
        let mut block = make_block("open:example.com", 0, GENESIS_HASH);
        block.sensor = "../../etc/passwd".to_string();

        let path = lake.path_for(&block);
        assert!(path.ends_with("______etc_passwd.jsonl"));
        assert_eq!(path.components().count(), 7);
        assert!(path.starts_with("/lake/open_example_com"));
    }
}
