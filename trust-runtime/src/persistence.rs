//! Durable score history behind a bounded background queue
//!
//! Writes never block scoring. Jobs that do not fit the queue are dropped
//! and counted; failed saves are counted and logged.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use trust_core::TrustScoreResult;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Persistence backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ScoreRepository: Send + Sync {
    async fn save_score(&self, result: &TrustScoreResult) -> Result<(), PersistError>;

    /// Most recent first
    async fn get_score_history(&self, entity_id: &str, limit: usize) -> Result<Vec<TrustScoreResult>, PersistError>;
}

/// Scores kept per entity by [`MemoryScoreRepository`] unless overridden
pub const DEFAULT_HISTORY_PER_ENTITY: usize = 100;

/// In-process repository keeping a bounded history per entity
pub struct MemoryScoreRepository {
    scores: DashMap<String, VecDeque<TrustScoreResult>>,
    max_per_entity: usize,
}

impl Default for MemoryScoreRepository {
    fn default() -> Self {
        Self {
            scores: DashMap::new(),
            max_per_entity: DEFAULT_HISTORY_PER_ENTITY,
        }
    }
}

impl MemoryScoreRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_history(mut self, per_entity: usize) -> Self {
        self.max_per_entity = per_entity.max(1);
        self
    }
}

#[async_trait]
impl ScoreRepository for MemoryScoreRepository {
    async fn save_score(&self, result: &TrustScoreResult) -> Result<(), PersistError> {
        let mut history = self.scores.entry(result.entity_id.clone()).or_default();
        history.push_back(result.clone());
        while history.len() > self.max_per_entity {
            history.pop_front();
        }
        Ok(())
    }

    async fn get_score_history(&self, entity_id: &str, limit: usize) -> Result<Vec<TrustScoreResult>, PersistError> {
        Ok(self
            .scores
            .get(entity_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub saved: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle to the background writer task
pub struct PersistenceQueue {
    sender: mpsc::Sender<TrustScoreResult>,
    counters: Arc<Counters>,
    repository: Arc<dyn ScoreRepository>,
    worker: JoinHandle<()>,
}

impl PersistenceQueue {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(repository: Arc<dyn ScoreRepository>, config: &PersistenceConfig) -> Self {
        let (sender, mut receiver) = mpsc::channel::<TrustScoreResult>(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker_repo = repository.clone();
        let worker_counters = counters.clone();
        let worker = tokio::spawn(async move {
            while let Some(result) = receiver.recv().await {
                match worker_repo.save_score(&result).await {
                    Ok(()) => {
                        worker_counters.saved.fetch_add(1, Ordering::Relaxed);
                        debug!("Persisted score for {}", result.entity_id);
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to persist score for {}: {}", result.entity_id, e);
                    }
                }
            }
        });

        Self {
            sender,
            counters,
            repository,
            worker,
        }
    }

    /// Queue a result for saving. Returns false if it was dropped.
    pub fn enqueue(&self, result: &TrustScoreResult) -> bool {
        match self.sender.try_send(result.clone()) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Persistence queue rejected score for {}: {}", result.entity_id, e);
                false
            }
        }
    }

    pub async fn history(&self, entity_id: &str, limit: usize) -> Result<Vec<TrustScoreResult>, PersistError> {
        self.repository.get_score_history(entity_id, limit).await
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait until every queued job has been handled
    pub async fn shutdown(self) -> QueueStats {
        let Self {
            sender,
            counters,
            worker,
            ..
        } = self;
        drop(sender);
        if let Err(e) = worker.await {
            warn!("Persistence worker ended abnormally: {}", e);
        }
        QueueStats {
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            saved: counters.saved.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenRepository;

    #[async_trait]
    impl ScoreRepository for BrokenRepository {
        async fn save_score(&self, _result: &TrustScoreResult) -> Result<(), PersistError> {
            Err(PersistError::Unavailable("disk full".into()))
        }

        async fn get_score_history(&self, _entity_id: &str, _limit: usize) -> Result<Vec<TrustScoreResult>, PersistError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_saves_in_background() {
        let repo = Arc::new(MemoryScoreRepository::new());
        let queue = PersistenceQueue::spawn(repo.clone(), &PersistenceConfig::default());
        let first = TrustScoreResult::degraded("example.com", "first");
        let second = TrustScoreResult::degraded("example.com", "second");
        assert!(queue.enqueue(&first));
        assert!(queue.enqueue(&second));

        let stats = queue.shutdown().await;
        assert_eq!(stats.saved, 2);
        let history = repo.get_score_history(&first.entity_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].error.as_deref(), Some("second"));
        assert_eq!(repo.get_score_history(&first.entity_id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let repo = MemoryScoreRepository::new().with_max_history(3);
        for i in 0..10 {
            repo.save_score(&TrustScoreResult::degraded("example.com", format!("run {}", i)))
                .await
                .unwrap();
        }
        let entity = TrustScoreResult::degraded("example.com", "x").entity_id;
        let history = repo.get_score_history(&entity, 100).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].error.as_deref(), Some("run 9"));
        assert_eq!(history[2].error.as_deref(), Some("run 7"));
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let queue = PersistenceQueue::spawn(Arc::new(BrokenRepository), &PersistenceConfig::default());
        queue.enqueue(&TrustScoreResult::degraded("example.com", "x"));
        let stats = queue.shutdown().await;
        assert_eq!(stats, QueueStats { enqueued: 1, failed: 1, ..Default::default() });
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_overflow_is_dropped_not_blocking() {
        let queue = PersistenceQueue::spawn(
            Arc::new(MemoryScoreRepository::new()),
            &PersistenceConfig { queue_capacity: 1 },
        );
        let result = TrustScoreResult::degraded("example.com", "x");
        // The worker cannot run until this task yields
        assert!(queue.enqueue(&result));
        assert!(!queue.enqueue(&result));
        assert_eq!(queue.stats().dropped, 1);
    }
}
