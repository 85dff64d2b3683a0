//! Trust score pipeline
//!
//! cache check -> lock -> collect -> score -> registry enrichment ->
//! ledger -> cache store -> persist -> lock release.
//!
//! `compute` never fails: any error becomes a degraded result that is
//! cached briefly under the failed tier.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use trust_collectors::{BreakerSnapshot, RankIndex};
use trust_core::{Freshness, TargetError, TargetIdentity, TrustScoreResult};
use trust_ledger::{Block, Ledger, LedgerError, LedgerStats, VerificationReport, SCORE_SENSOR};

use crate::{
    CacheStats, CacheTier, Collection, EntityRegistry, Orchestrator, PersistenceQueue, QueueStats, ScoreCache,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid target: {0}")]
    Target(#[from] TargetError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Rank list error: {0}")]
    RankList(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent computations in batch and refresh runs
    pub batch_concurrency: usize,
    /// Pause between entities during a refresh run, milliseconds
    pub refresh_delay_ms: u64,
    /// Maximum entities re-scored by one refresh run
    pub refresh_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 5,
            refresh_delay_ms: 2_000,
            refresh_batch_size: 50,
        }
    }
}

/// Which side of a comparison came out ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
    Tie,
}

impl Side {
    fn of(a: u32, b: u32) -> Self {
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => Self::A,
            std::cmp::Ordering::Less => Self::B,
            std::cmp::Ordering::Equal => Self::Tie,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryComparison {
    pub category: String,
    pub a: u32,
    pub b: u32,
    pub winner: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub a: TrustScoreResult,
    pub b: TrustScoreResult,
    pub winner: Side,
    pub score_difference: u32,
    pub categories: Vec<CategoryComparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub engine_version: String,
    pub sensors: Vec<String>,
    pub breakers: Vec<BreakerSnapshot>,
    pub cache: CacheStats,
    pub ledger: LedgerStats,
    pub persistence: Option<QueueStats>,
    pub ranked_domains: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub candidates: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct TrustPipeline {
    orchestrator: Orchestrator,
    cache: ScoreCache,
    ledger: Arc<Ledger>,
    registry: Option<Arc<dyn EntityRegistry>>,
    persistence: Option<PersistenceQueue>,
    ranks: Arc<RankIndex>,
    config: PipelineConfig,
}

impl TrustPipeline {
    pub fn new(orchestrator: Orchestrator, cache: ScoreCache, ledger: Arc<Ledger>, config: PipelineConfig) -> Self {
        Self {
            orchestrator,
            cache,
            ledger,
            registry: None,
            persistence: None,
            ranks: Arc::new(RankIndex::new()),
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    /// Share the rank index the popularity collector reads from
    pub fn with_rank_index(mut self, ranks: Arc<RankIndex>) -> Self {
        self.ranks = ranks;
        self
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn persistence(&self) -> Option<&PersistenceQueue> {
        self.persistence.as_ref()
    }

    /// Score a target. Never fails; errors yield a degraded result.
    pub async fn compute(&self, target: &str, force_refresh: bool, is_preview: bool) -> TrustScoreResult {
        match self.try_compute(target, force_refresh, is_preview).await {
            Ok(result) => result,
            Err(e) => {
                error!("Scoring failed for {}: {}", target, e);
                let degraded = TrustScoreResult::degraded(target, e.to_string());
                self.cache.set(target, &degraded, CacheTier::Failed).await;
                degraded
            }
        }
    }

    async fn try_compute(
        &self,
        target: &str,
        force_refresh: bool,
        is_preview: bool,
    ) -> Result<TrustScoreResult, PipelineError> {
        let identity = TargetIdentity::parse(target)?;

        if !force_refresh {
            if let Some(cached) = self.cached(target).await {
                return Ok(cached);
            }
        }

        let mut lock = self.cache.acquire_lock(target).await;
        if lock.is_none() {
            debug!("Computation for {} already in flight, waiting", target);
            let config = self.cache.config();
            let deadline = Instant::now() + Duration::from_millis(config.lock_wait_ms);
            let poll = Duration::from_millis(config.lock_poll_ms.max(1));
            while Instant::now() < deadline {
                sleep(poll).await;
                if let Some(cached) = self.cached(target).await {
                    return Ok(cached);
                }
                // A lock that expired under a crashed holder is free again
                lock = self.cache.acquire_lock(target).await;
                if lock.is_some() {
                    break;
                }
            }
            if lock.is_none() {
                warn!("Lock wait for {} timed out, computing anyway", target);
            }
        }

        let outcome = self.compute_locked(&identity, target, force_refresh, is_preview).await;
        if let Some(token) = lock {
            self.cache.release_lock(target, &token).await;
        }
        outcome
    }

    async fn compute_locked(
        &self,
        identity: &TargetIdentity,
        target: &str,
        force_refresh: bool,
        is_preview: bool,
    ) -> Result<TrustScoreResult, PipelineError> {
        // The previous holder may have finished between our miss and our lock
        if !force_refresh {
            if let Some(cached) = self.cached(target).await {
                return Ok(cached);
            }
        }

        let collection = self.orchestrator.collect(identity).await;
        let mut result = trust_core::compute_score(&collection.signals);

        let registered = match &self.registry {
            Some(registry) => match registry.lookup_registered(identity).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Registry lookup failed for {}: {}", target, e);
                    None
                }
            },
            None => None,
        };
        if let Some(entity) = &registered {
            result.apply_registration(entity);
        }

        if let Err(e) = self.record_observations(&result, &collection).await {
            warn!("Ledger append failed for {}: {}", result.entity_id, e);
        }

        let tier = if is_preview {
            CacheTier::Preview
        } else if registered.is_some() {
            CacheTier::Registered
        } else {
            CacheTier::Unregistered
        };
        self.cache.set(target, &result, tier).await;
        if let Some(queue) = &self.persistence {
            queue.enqueue(&result);
        }

        info!(
            "Scored {}: {} ({}) confidence {:.2}{}",
            target,
            result.score,
            result.grade,
            result.confidence,
            result
                .cap_applied
                .map(|c| format!(", capped by {}", c))
                .unwrap_or_default()
        );
        Ok(result)
    }

    async fn cached(&self, target: &str) -> Option<TrustScoreResult> {
        let mut result = self.cache.get(target).await?;
        if !result.is_degraded() {
            result.data_freshness = Freshness::Cached;
        }
        Some(result)
    }

    /// One block per responding sensor in collector order, then the score
    async fn record_observations(&self, result: &TrustScoreResult, collection: &Collection) -> Result<(), PipelineError> {
        let entity_id = result.entity_id.as_str();
        for observation in &collection.observations {
            self.ledger
                .record(
                    entity_id,
                    &observation.sensor,
                    observation.signals.to_payload(),
                    observation.elapsed_ms,
                )
                .await?;
        }
        self.ledger
            .record(entity_id, SCORE_SENSOR, score_payload(result), result.collection_time_ms)
            .await?;
        Ok(())
    }

    /// Score many targets with bounded concurrency, preserving input order
    pub async fn batch(&self, targets: &[String], force_refresh: bool) -> Vec<TrustScoreResult> {
        stream::iter(targets)
            .map(|target| self.compute(target, force_refresh, false))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }

    /// Score two targets side by side
    pub async fn compare(&self, a: &str, b: &str) -> Comparison {
        let (a, b) = tokio::join!(self.compute(a, false, false), self.compute(b, false, false));
        let categories = [
            ("existence_age", a.categories.existence_age, b.categories.existence_age),
            ("security_integrity", a.categories.security_integrity, b.categories.security_integrity),
            ("reputation_scale", a.categories.reputation_scale, b.categories.reputation_scale),
            ("operational_maturity", a.categories.operational_maturity, b.categories.operational_maturity),
        ]
        .into_iter()
        .map(|(category, sa, sb)| CategoryComparison {
            category: category.to_string(),
            a: sa,
            b: sb,
            winner: Side::of(sa, sb),
        })
        .collect();

        Comparison {
            winner: Side::of(a.score, b.score),
            score_difference: a.score.abs_diff(b.score),
            categories,
            a,
            b,
        }
    }

    pub async fn verify(&self, entity_id: &str, limit: Option<usize>) -> Result<VerificationReport, PipelineError> {
        let limit = limit.unwrap_or(self.ledger.config().verify_limit);
        Ok(self.ledger.verify(entity_id, limit).await?)
    }

    pub async fn history(&self, entity_id: &str, limit: usize) -> Result<Vec<Block>, PipelineError> {
        Ok(self.ledger.history(entity_id, limit).await?)
    }

    /// Load a `rank,domain` CSV into the popularity index
    pub async fn ingest_ranks(&self, path: &Path) -> Result<usize, PipelineError> {
        let count = self.ranks.load_file(path).await?;
        info!("Ingested {} ranked domains from {}", count, path.display());
        Ok(count)
    }

    /// Re-score known ledger entities one at a time, pausing between them.
    ///
    /// The target is read back from each entity's latest score block.
    pub async fn refresh(&self, limit: Option<usize>) -> Result<RefreshReport, PipelineError> {
        let limit = limit.unwrap_or(self.config.refresh_batch_size);
        let mut entities = self.ledger.known_entities().await?;
        entities.sort();

        let mut targets = Vec::new();
        for entity_id in entities {
            if targets.len() >= limit {
                break;
            }
            let blocks = self.ledger.history(&entity_id, self.ledger.config().max_recent).await?;
            let target = blocks
                .iter()
                .filter(|b| b.sensor == SCORE_SENSOR)
                .find_map(|b| b.signals.get("target").and_then(Value::as_str).map(str::to_string));
            match target {
                Some(target) => targets.push(target),
                None => debug!("No scored target recorded for {}, skipping refresh", entity_id),
            }
        }

        let mut report = RefreshReport {
            candidates: targets.len(),
            ..Default::default()
        };
        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(self.config.refresh_delay_ms)).await;
            }
            let result = self.compute(target, true, false).await;
            if result.is_degraded() {
                report.failed += 1;
            } else {
                report.refreshed += 1;
            }
        }
        info!("Refresh complete: {}/{} re-scored", report.refreshed, report.candidates);
        Ok(report)
    }

    pub async fn status(&self) -> PipelineStatus {
        let ledger = match self.ledger.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Ledger stats unavailable: {}", e);
                LedgerStats::default()
            }
        };
        PipelineStatus {
            engine_version: trust_core::ENGINE_VERSION.to_string(),
            sensors: self.orchestrator.sensor_ids(),
            breakers: self.orchestrator.breakers().snapshots(),
            cache: self.cache.stats().await,
            ledger,
            persistence: self.persistence.as_ref().map(|q| q.stats()),
            ranked_domains: self.ranks.len(),
        }
    }
}

/// Ledger payload of the `score_computed` block
fn score_payload(result: &TrustScoreResult) -> Map<String, Value> {
    let payload = json!({
        "target": result.target,
        "score": result.score,
        "raw_score": result.raw_score,
        "grade": result.grade.to_string(),
        "recommendation": result.recommendation.as_str(),
        "confidence": result.confidence,
        "cap_applied": result.cap_applied.map(|c| c.to_string()),
        "sources_responded": result.sources_responded.len(),
        "engine_version": result.engine_version,
    });
    match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
