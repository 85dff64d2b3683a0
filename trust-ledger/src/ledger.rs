//! Per-entity append-only observation ledger

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    compute_delta, max_severity, observation_time, AppendOutcome, Block, BlockDraft, ChainHead,
    ColdStore, HotStore, StoreError, GENESIS_HASH,
};

/// Errors from ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Chain head for {0} kept moving, gave up after {1} attempts")]
    Contention(String, u32),
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Identifier of the producing node
    pub node_id: String,
    pub sensor_version: String,
    /// Blocks kept per entity in hot storage
    pub max_recent: usize,
    /// Default verification window
    pub verify_limit: usize,
    /// Attempts when the head moves between read and append
    pub append_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            sensor_version: crate::SENSOR_VERSION.to_string(),
            max_recent: crate::DEFAULT_MAX_RECENT,
            verify_limit: 100,
            append_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash differs from the recomputed content hash
    HashMismatch,
    /// Predecessor hash does not match the prior block
    ChainBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIssue {
    pub kind: BreakKind,
    pub block_index: u64,
    pub sensor: String,
    pub expected: String,
    pub found: String,
}

/// Outcome of walking an entity's recent chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub entity_id: String,
    pub blocks_checked: usize,
    pub breaks: Vec<ChainIssue>,
    pub chain_head: Option<ChainHead>,
}

impl VerificationReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub entities: usize,
    /// Sum of head indexes plus one, i.e. total blocks ever appended
    pub blocks: u64,
}

/// Hash-chained observation ledger over a hot store and an optional lake
pub struct Ledger {
    hot: Arc<dyn HotStore>,
    cold: Option<Arc<dyn ColdStore>>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(hot: Arc<dyn HotStore>, config: LedgerConfig) -> Self {
        Self {
            hot,
            cold: None,
            config,
        }
    }

    pub fn with_cold_store(mut self, cold: Arc<dyn ColdStore>) -> Self {
        self.cold = Some(cold);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append one sensor observation to an entity's chain.
    ///
    /// The head is re-read on every attempt, so a concurrent writer never
    /// produces two blocks with the same index.
    pub async fn record(
        &self,
        entity_id: &str,
        sensor: &str,
        signals: Map<String, Value>,
        collection_time_ms: u64,
    ) -> Result<Block, LedgerError> {
        for attempt in 1..=self.config.append_attempts.max(1) {
            // Head first: any append after this read fails the conditional write
            let head = self.hot.head(entity_id).await?;
            let previous = self.hot.latest_signals(entity_id, sensor).await?;
            let delta = compute_delta(previous.as_ref(), &signals);
            let (block_index, prev_hash) = match &head {
                Some(h) => (h.index + 1, h.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            };
            let observed_at = observation_time();
            let block_hash = BlockDraft {
                entity_id,
                sensor,
                block_index,
                observed_at,
                signals: &signals,
                prev_hash: &prev_hash,
            }
            .content_hash();

            let block = Block {
                entity_id: entity_id.to_string(),
                sensor: sensor.to_string(),
                block_index,
                observed_at,
                signals: signals.clone(),
                prev_hash,
                block_hash,
                delta,
                collection_time_ms,
                sensor_version: self.config.sensor_version.clone(),
                node_id: self.config.node_id.clone(),
            };

            let expected = head.as_ref().map(|h| h.hash.as_str());
            match self.hot.append(&block, expected).await? {
                AppendOutcome::Appended => {
                    debug!("Recorded {} block #{} for {}", sensor, block_index, entity_id);
                    self.after_append(&block).await;
                    return Ok(block);
                }
                AppendOutcome::HeadMoved => {
                    debug!("Head moved for {} (attempt {}), retrying", entity_id, attempt);
                }
            }
        }

        Err(LedgerError::Contention(
            entity_id.to_string(),
            self.config.append_attempts,
        ))
    }

    async fn after_append(&self, block: &Block) {
        if let Some(severity) = max_severity(&block.delta).filter(|s| s.is_alert()) {
            let changed: Vec<&str> = block
                .delta
                .iter()
                .filter(|(_, e)| e.severity.is_some_and(|s| s.is_alert()))
                .map(|(k, _)| k.as_str())
                .collect();
            warn!(
                "Trust alert ({:?}) for {} from {}: {}",
                severity,
                block.entity_id,
                block.sensor,
                changed.join(", ")
            );
        }

        if let Some(cold) = &self.cold {
            if let Err(e) = cold.append(block).await {
                warn!(
                    "Cold storage write failed for {} block #{}: {}",
                    block.entity_id, block.block_index, e
                );
            }
        }
    }

    /// Walk up to `limit` recent blocks and report every break found
    pub async fn verify(&self, entity_id: &str, limit: usize) -> Result<VerificationReport, LedgerError> {
        let mut blocks = self.hot.recent_blocks(entity_id, limit).await?;
        blocks.sort_by_key(|b| b.block_index);
        let chain_head = self.hot.head(entity_id).await?;

        let mut breaks = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            let computed = block.compute_hash();
            if computed != block.block_hash {
                breaks.push(ChainIssue {
                    kind: BreakKind::HashMismatch,
                    block_index: block.block_index,
                    sensor: block.sensor.clone(),
                    expected: computed,
                    found: block.block_hash.clone(),
                });
            }

            let expected_prev = if i > 0 {
                Some(blocks[i - 1].block_hash.as_str())
            } else if block.block_index == 0 {
                Some(GENESIS_HASH)
            } else {
                // Predecessor is outside the window
                None
            };
            if let Some(expected_prev) = expected_prev {
                if block.prev_hash != expected_prev {
                    breaks.push(ChainIssue {
                        kind: BreakKind::ChainBreak,
                        block_index: block.block_index,
                        sensor: block.sensor.clone(),
                        expected: expected_prev.to_string(),
                        found: block.prev_hash.clone(),
                    });
                }
            }
        }

        if !breaks.is_empty() {
            warn!("Chain verification for {} found {} break(s)", entity_id, breaks.len());
        }

        Ok(VerificationReport {
            entity_id: entity_id.to_string(),
            blocks_checked: blocks.len(),
            breaks,
            chain_head,
        })
    }

    /// Recent blocks, newest first
    pub async fn history(&self, entity_id: &str, limit: usize) -> Result<Vec<Block>, LedgerError> {
        Ok(self.hot.recent_blocks(entity_id, limit).await?)
    }

    pub async fn head(&self, entity_id: &str) -> Result<Option<ChainHead>, LedgerError> {
        Ok(self.hot.head(entity_id).await?)
    }

    pub async fn known_entities(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.hot.known_entities().await?)
    }

    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let entities = self.hot.known_entities().await?;
        let mut blocks = 0;
        for entity in &entities {
            if let Some(head) = self.hot.head(entity).await? {
                blocks += head.index + 1;
            }
        }
        Ok(LedgerStats {
            entities: entities.len(),
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_partition, JsonlLake, MemoryHotStore, Severity};
    use async_trait::async_trait;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    fn ledger_with(store: Arc<MemoryHotStore>) -> Ledger {
        Ledger::new(store, LedgerConfig::default())
    }

    #[tokio::test]
    async fn test_first_block_links_to_genesis() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()));
        let block = ledger
            .record("open:a", "dns", payload(json!({"dns_has_spf": true})), 10)
            .await
            .unwrap();
        assert_eq!(block.block_index, 0);
        assert_eq!(block.prev_hash, GENESIS_HASH);
        assert!(block.delta.is_empty());
        assert!(block.is_intact());
    }

    #[tokio::test]
    async fn test_fresh_chain_verifies() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()));
        for (i, sensor) in ["dns", "crtsh", "dns", "tranco"].iter().enumerate() {
            ledger
                .record("open:a", sensor, payload(json!({"n": i})), 1)
                .await
                .unwrap();
        }
        let report = ledger.verify("open:a", 100).await.unwrap();
        assert_eq!(report.blocks_checked, 4);
        assert!(report.is_intact(), "{:?}", report.breaks);
        assert_eq!(report.chain_head.unwrap().index, 3);
    }

    #[tokio::test]
    async fn test_consecutive_blocks_link() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()));
        for i in 0..5 {
            ledger.record("open:a", "dns", payload(json!({"n": i})), 1).await.unwrap();
        }
        let mut blocks = ledger.history("open:a", 10).await.unwrap();
        blocks.reverse();
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].block_hash);
            assert_eq!(pair[1].block_index, pair[0].block_index + 1);
        }
    }

    #[tokio::test]
    async fn test_tampered_payload_detected() {
        let store = Arc::new(MemoryHotStore::default());
        let ledger = ledger_with(store.clone());
        for i in 0..3 {
            ledger.record("open:a", "dns", payload(json!({"n": i})), 1).await.unwrap();
        }

        let mut victim = ledger.history("open:a", 10).await.unwrap()[1].clone();
        victim.signals.insert("n".into(), json!(42));
        store.overwrite(victim);

        let report = ledger.verify("open:a", 100).await.unwrap();
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].kind, BreakKind::HashMismatch);
        assert_eq!(report.breaks[0].block_index, 1);
    }

    #[tokio::test]
    async fn test_rewritten_block_breaks_link() {
        let store = Arc::new(MemoryHotStore::default());
        let ledger = ledger_with(store.clone());
        for i in 0..3 {
            ledger.record("open:a", "dns", payload(json!({"n": i})), 1).await.unwrap();
        }

        // Re-hash the tampered block so only the linkage reveals it
        let mut victim = ledger.history("open:a", 10).await.unwrap()[1].clone();
        victim.signals.insert("n".into(), json!(42));
        victim.block_hash = victim.compute_hash();
        store.overwrite(victim);

        let report = ledger.verify("open:a", 100).await.unwrap();
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].kind, BreakKind::ChainBreak);
        assert_eq!(report.breaks[0].block_index, 2);
    }

    #[tokio::test]
    async fn test_delta_against_same_sensor() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()));
        ledger
            .record("open:a", "dns", payload(json!({"dns_has_spf": true})), 1)
            .await
            .unwrap();
        ledger
            .record("open:a", "crtsh", payload(json!({"ssl_valid": true})), 1)
            .await
            .unwrap();
        let block = ledger
            .record("open:a", "dns", payload(json!({"dns_has_spf": false})), 1)
            .await
            .unwrap();
        assert_eq!(block.block_index, 2);
        assert_eq!(block.delta["dns_has_spf"].severity, Some(Severity::Critical));
    }

    /// Lets another writer append a block just before the first append
    struct Interleaving {
        inner: Arc<MemoryHotStore>,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl HotStore for Interleaving {
        async fn head(&self, entity_id: &str) -> Result<Option<ChainHead>, StoreError> {
            self.inner.head(entity_id).await
        }

        async fn latest_signals(
            &self,
            entity_id: &str,
            sensor: &str,
        ) -> Result<Option<Map<String, Value>>, StoreError> {
            self.inner.latest_signals(entity_id, sensor).await
        }

        async fn append(&self, block: &Block, expected_head: Option<&str>) -> Result<AppendOutcome, StoreError> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                let other = Ledger::new(self.inner.clone(), LedgerConfig::default());
                other
                    .record(&block.entity_id, &block.sensor, payload(json!({"x": 2})), 1)
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
            self.inner.append(block, expected_head).await
        }

        async fn recent_blocks(&self, entity_id: &str, limit: usize) -> Result<Vec<Block>, StoreError> {
            self.inner.recent_blocks(entity_id, limit).await
        }

        async fn known_entities(&self) -> Result<Vec<String>, StoreError> {
            self.inner.known_entities().await
        }
    }

    #[tokio::test]
    async fn test_retried_append_diffs_against_new_predecessor() {
        let store = Arc::new(Interleaving {
            inner: Arc::new(MemoryHotStore::default()),
            armed: std::sync::atomic::AtomicBool::new(false),
        });
        let ledger = Ledger::new(store.clone(), LedgerConfig::default());
        ledger.record("open:a", "dns", payload(json!({"x": 1})), 1).await.unwrap();

        store.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let block = ledger.record("open:a", "dns", payload(json!({"x": 3})), 1).await.unwrap();

        assert_eq!(block.block_index, 2);
        assert_eq!(block.delta["x"].was, json!(2));
        assert_eq!(block.delta["x"].now, json!(3));
        assert!(ledger.verify("open:a", 100).await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_concurrent_records_keep_chain_linear() {
        let ledger = Arc::new(ledger_with(Arc::new(MemoryHotStore::default())));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .record("open:a", "dns", payload(json!({"n": i})), 1)
                    .await
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        let report = ledger.verify("open:a", 100).await.unwrap();
        assert!(report.is_intact());
        assert_eq!(report.blocks_checked, ok);
    }

    struct BrokenLake;

    #[async_trait]
    impl ColdStore for BrokenLake {
        async fn append(&self, _block: &Block) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_cold_failure_is_not_fatal() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()))
            .with_cold_store(Arc::new(BrokenLake));
        let block = ledger.record("open:a", "dns", Map::new(), 1).await;
        assert!(block.is_ok());
        assert_eq!(ledger.stats().await.unwrap().blocks, 1);
    }

    #[tokio::test]
    async fn test_cold_store_receives_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Arc::new(JsonlLake::new(dir.path()));
        let ledger = ledger_with(Arc::new(MemoryHotStore::default())).with_cold_store(lake.clone());
        let block = ledger.record("open:a", "dns", Map::new(), 1).await.unwrap();
        let stored = read_partition(&lake.path_for(&block)).await.unwrap();
        assert_eq!(stored, vec![block]);
    }

    #[tokio::test]
    async fn test_stats_and_known_entities() {
        let ledger = ledger_with(Arc::new(MemoryHotStore::default()));
        ledger.record("open:a", "dns", Map::new(), 1).await.unwrap();
        ledger.record("open:a", "dns", Map::new(), 1).await.unwrap();
        ledger.record("open:b", "dns", Map::new(), 1).await.unwrap();
        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.blocks, 3);
        assert_eq!(ledger.known_entities().await.unwrap(), vec!["open:a", "open:b"]);
    }
}
