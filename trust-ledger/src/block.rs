//! Observation blocks

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{canonical_hash, Delta};

/// Predecessor hash of the first block in every chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One immutable, hash-linked observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub entity_id: String,
    pub sensor: String,
    pub block_index: u64,
    pub observed_at: DateTime<Utc>,
    pub signals: Map<String, Value>,
    pub prev_hash: String,
    pub block_hash: String,
    pub delta: Delta,
    pub collection_time_ms: u64,
    pub sensor_version: String,
    pub node_id: String,
}

/// Latest block reference for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub hash: String,
    pub index: u64,
    pub updated_at: DateTime<Utc>,
}

/// Fields that go into a block's content hash
pub struct BlockDraft<'a> {
    pub entity_id: &'a str,
    pub sensor: &'a str,
    pub block_index: u64,
    pub observed_at: DateTime<Utc>,
    pub signals: &'a Map<String, Value>,
    pub prev_hash: &'a str,
}

impl BlockDraft<'_> {
    pub fn content_hash(&self) -> String {
        canonical_hash(&json!({
            "entity_id": self.entity_id,
            "sensor": self.sensor,
            "block_index": self.block_index,
            "observed_at": format_timestamp(&self.observed_at),
            "signals": self.signals,
            "prev_hash": self.prev_hash,
        }))
    }
}

/// Timestamp form used inside hashes, microsecond precision
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time truncated to the precision that is hashed
pub fn observation_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl Block {
    /// Recompute this block's content hash from its stored fields
    pub fn compute_hash(&self) -> String {
        BlockDraft {
            entity_id: &self.entity_id,
            sensor: &self.sensor,
            block_index: self.block_index,
            observed_at: self.observed_at,
            signals: &self.signals,
            prev_hash: &self.prev_hash,
        }
        .content_hash()
    }

    pub fn is_intact(&self) -> bool {
        self.compute_hash() == self.block_hash
    }

    pub fn head(&self) -> ChainHead {
        ChainHead {
            hash: self.block_hash.clone(),
            index: self.block_index,
            updated_at: self.observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Block {
        let mut signals = Map::new();
        signals.insert("dns_has_spf".into(), Value::Bool(true));
        let observed_at = observation_time();
        let prev_hash = GENESIS_HASH.to_string();
        let block_hash = BlockDraft {
            entity_id: "open:abc",
            sensor: "dns",
            block_index: 0,
            observed_at,
            signals: &signals,
            prev_hash: &prev_hash,
        }
        .content_hash();
        Block {
            entity_id: "open:abc".into(),
            sensor: "dns".into(),
            block_index: 0,
            observed_at,
            signals,
            prev_hash,
            block_hash,
            delta: Delta::new(),
            collection_time_ms: 12,
            sensor_version: "3.0.0".into(),
            node_id: "node-0".into(),
        }
    }

    #[test]
    fn test_fresh_block_is_intact() {
        assert!(block().is_intact());
    }

    #[test]
    fn test_tampered_signals_detected() {
        let mut b = block();
        b.signals.insert("dns_has_spf".into(), Value::Bool(false));
        assert!(!b.is_intact());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let b = block();
        let wire = serde_json::to_string(&b).unwrap();
        let back: Block = serde_json::from_str(&wire).unwrap();
        assert!(back.is_intact());
        assert_eq!(back, b);
    }

    #[test]
    fn test_metadata_not_hashed() {
        let mut b = block();
        b.collection_time_ms = 999;
        b.node_id = "node-9".into();
        assert!(b.is_intact());
    }
}
