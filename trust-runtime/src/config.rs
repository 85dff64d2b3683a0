//! Runtime configuration
//!
//! Loaded from TOML; every section is optional and falls back to the
//! built-in defaults. Credentials, cache TTLs, node id and lake directory
//! can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use trust_collectors::{BreakerPolicy, CollectorConfig};
use trust_ledger::LedgerConfig;
use trust_net::NetConfig;

use crate::{CacheConfig, OrchestratorConfig, PersistenceConfig, PipelineConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub net: NetConfig,
    pub collectors: CollectorConfig,
    /// Per-sensor breaker overrides, keyed by sensor id
    pub breakers: BTreeMap<String, BreakerPolicy>,
    pub orchestrator: OrchestratorConfig,
    pub cache: CacheConfig,
    pub ledger: LedgerConfig,
    /// Root of the JSON Lines block lake; no cold storage when unset
    pub lake_dir: Option<PathBuf>,
    /// Tranco-format `rank,domain` CSV loaded at startup
    pub rank_list: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub persistence: PersistenceConfig,
}

/// Headroom kept between the collection budget and the lock lifetime
const LOCK_TTL_MARGIN_SECS: u64 = 15;

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env(name).and_then(|v| v.trim().parse().ok())
}

impl TrustConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env();
        config.reconcile();
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&content)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.reconcile();
        config
    }

    /// The computation lock must outlive a full collection run
    fn reconcile(&mut self) {
        let budget_secs = self.orchestrator.overall_timeout_ms.div_ceil(1000);
        if self.cache.lock_ttl_secs <= budget_secs {
            let raised = budget_secs + LOCK_TTL_MARGIN_SECS;
            warn!(
                "cache.lock_ttl_secs {} does not outlive the {}ms collection budget, using {}",
                self.cache.lock_ttl_secs, self.orchestrator.overall_timeout_ms, raised
            );
            self.cache.lock_ttl_secs = raised;
        }
    }

    /// Environment overrides; the only place configuration reads the environment
    fn apply_env(&mut self) {
        if let Some(key) = env("VIRUSTOTAL_API_KEY") {
            self.collectors.virustotal_api_key = Some(key);
        }
        if let Some(key) = env("GOOGLE_SAFE_BROWSING_KEY") {
            self.collectors.safe_browsing_key = Some(key);
        }
        if let Some(key) = env("URLHAUS_AUTH_KEY") {
            self.collectors.urlhaus_auth_key = Some(key);
        }
        if let Some(ttl) = env_u64("CACHE_TTL_REGISTERED") {
            self.cache.ttl_registered_secs = ttl;
        }
        if let Some(ttl) = env_u64("CACHE_TTL_UNREGISTERED") {
            self.cache.ttl_unregistered_secs = ttl;
        }
        if let Some(ttl) = env_u64("CACHE_TTL_FAILED") {
            self.cache.ttl_failed_secs = ttl;
        }
        if let Some(ttl) = env_u64("CACHE_TTL_PREVIEW") {
            self.cache.ttl_preview_secs = ttl;
        }
        if let Some(node) = env("TRUST_NODE_ID") {
            self.ledger.node_id = node;
        }
        if let Some(dir) = env("TRUST_LAKE_DIR") {
            self.lake_dir = Some(PathBuf::from(dir));
        }
    }
}
