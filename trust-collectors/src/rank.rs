//! Popularity rank lookups against a locally loaded Tranco list

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use trust_core::{RankSignals, Source, SourceSignals, TargetIdentity};

use crate::{require_domain, Collector, CollectorError};

/// In-memory `domain -> rank` index
#[derive(Default)]
pub struct RankIndex {
    ranks: DashMap<String, u64>,
    loaded: AtomicBool,
}

impl RankIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest `rank,domain` lines, skipping headers and malformed rows.
    /// Returns the number of domains indexed.
    pub fn load_csv(&self, content: &str) -> usize {
        let mut count = 0;
        for line in content.lines() {
            let mut parts = line.trim().splitn(2, ',');
            let (Some(rank), Some(domain)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(rank) = rank.trim().parse::<u64>() else {
                continue;
            };
            let domain = domain.trim().trim_end_matches('.').to_lowercase();
            if rank == 0 || domain.is_empty() {
                continue;
            }
            self.ranks
                .entry(domain)
                .and_modify(|r| *r = (*r).min(rank))
                .or_insert(rank);
            count += 1;
        }
        if count > 0 {
            self.loaded.store(true, Ordering::Release);
        }
        info!("Indexed {} ranked domains", count);
        count
    }

    pub async fn load_file(&self, path: &Path) -> std::io::Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(self.load_csv(&content))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Rank of a domain, falling back to its registrable parent
    pub fn rank(&self, domain: &str) -> Option<u64> {
        let domain = domain.to_lowercase();
        if let Some(rank) = self.ranks.get(&domain) {
            return Some(*rank);
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() > 2 {
            let parent = labels[labels.len() - 2..].join(".");
            return self.ranks.get(&parent).map(|r| *r);
        }
        None
    }
}

pub struct TrancoCollector {
    index: Arc<RankIndex>,
}

impl TrancoCollector {
    pub fn new(index: Arc<RankIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Collector for TrancoCollector {
    fn sensor_id(&self) -> &str {
        Source::Tranco.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        if !self.index.is_loaded() {
            return Err(CollectorError::NotConfigured("rank list not loaded".into()));
        }
        let rank = self.index.rank(domain);
        debug!("Tranco rank for {}: {:?}", domain, rank);
        Ok(SourceSignals::Rank(RankSignals { tranco_rank: rank }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_csv_skips_noise() {
        let index = RankIndex::new();
        let count = index.load_csv("rank,domain\n1,google.com\n2,Facebook.com\nbad line\n0,zero.com\n");
        assert_eq!(count, 2);
        assert_eq!(index.rank("google.com"), Some(1));
        assert_eq!(index.rank("facebook.com"), Some(2));
        assert_eq!(index.rank("zero.com"), None);
    }

    #[test]
    fn test_subdomain_falls_back_to_parent() {
        let index = RankIndex::new();
        index.load_csv("7,example.com\n");
        assert_eq!(index.rank("shop.example.com"), Some(7));
        assert_eq!(index.rank("example.org"), None);
    }

    #[tokio::test]
    async fn test_collector_requires_loaded_list() {
        let index = Arc::new(RankIndex::new());
        let collector = TrancoCollector::new(index.clone());
        let target = TargetIdentity::parse("example.com").unwrap();
        assert!(matches!(
            collector.collect(&target).await,
            Err(CollectorError::NotConfigured(_))
        ));

        index.load_csv("500,example.com\n");
        let signals = collector.collect(&target).await.unwrap();
        assert_eq!(signals, SourceSignals::Rank(RankSignals { tranco_rank: Some(500) }));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top-1m.csv");
        std::fs::write(&path, "1,a.com\n2,b.com\n").unwrap();
        let index = RankIndex::new();
        assert_eq!(index.load_file(&path).await.unwrap(), 2);
        assert_eq!(index.len(), 2);
    }
}
