//! Wiring a pipeline from configuration

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use trust_collectors::{default_collectors, BreakerRegistry, RankIndex};
use trust_ledger::{JsonlLake, Ledger, MemoryHotStore};
use trust_net::{create_client, DnsLookup, SystemResolver};

use crate::{
    EntityRegistry, MemoryCacheStore, MemoryScoreRepository, Orchestrator, PersistenceQueue, ScoreCache,
    TrustConfig, TrustPipeline,
};

/// Build a pipeline with in-process stores, the built-in collectors and,
/// when configured, a block lake and a preloaded rank list.
pub async fn build_pipeline(
    config: &TrustConfig,
    registry: Option<Arc<dyn EntityRegistry>>,
) -> anyhow::Result<TrustPipeline> {
    let client = create_client(&config.net).context("building HTTP client")?;
    let dns: Arc<dyn DnsLookup> = Arc::new(SystemResolver::new(&config.net));

    let ranks = Arc::new(RankIndex::new());
    if let Some(path) = &config.rank_list {
        match ranks.load_file(path).await {
            Ok(count) => info!("Loaded {} ranked domains from {}", count, path.display()),
            Err(e) => warn!("Rank list {} unavailable: {}", path.display(), e),
        }
    }

    let breakers = config
        .breakers
        .iter()
        .fold(BreakerRegistry::new(), |registry, (sensor, policy)| {
            registry.with_policy(sensor, *policy)
        });
    let collectors = default_collectors(&config.collectors, client, dns, ranks.clone());
    let orchestrator = Orchestrator::new(collectors, Arc::new(breakers), config.orchestrator.clone());

    let cache = ScoreCache::new(Arc::new(MemoryCacheStore::new()), config.cache.clone());

    let hot = Arc::new(MemoryHotStore::new(config.ledger.max_recent));
    let mut ledger = Ledger::new(hot, config.ledger.clone());
    if let Some(dir) = &config.lake_dir {
        info!("Block lake at {}", dir.display());
        ledger = ledger.with_cold_store(Arc::new(JsonlLake::new(dir.clone())));
    }

    let queue = PersistenceQueue::spawn(Arc::new(MemoryScoreRepository::new()), &config.persistence);
    let mut pipeline = TrustPipeline::new(orchestrator, cache, Arc::new(ledger), config.pipeline.clone())
        .with_rank_index(ranks)
        .with_persistence(queue);
    if let Some(registry) = registry {
        pipeline = pipeline.with_registry(registry);
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rank_list = dir.path().join("top.csv");
        std::fs::write(&rank_list, "1,google.com\n2,example.com\n").unwrap();
        let config = TrustConfig {
            rank_list: Some(rank_list),
            lake_dir: Some(dir.path().join("lake")),
            ..Default::default()
        };

        let pipeline = build_pipeline(&config, None).await.unwrap();
        let status = pipeline.status().await;
        assert_eq!(status.sensors.len(), 9);
        assert_eq!(status.ranked_domains, 2);
        assert_eq!(status.engine_version, "3.0.0");
    }
}
