//! Collection orchestrator
//!
//! Fans a parsed target out to every applicable collector at once. Each
//! call is gated by its circuit breaker and bounded by a per-call timeout
//! and the run's overall deadline; one slow or failing source never holds
//! up the others.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use trust_collectors::{BreakerRegistry, Collector};
use trust_core::{RawSignals, SourceSignals, TargetIdentity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard limit for one collector call, milliseconds
    pub per_call_timeout_ms: u64,
    /// Budget for the whole fan-out, milliseconds
    pub overall_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_ms: 12_000,
            overall_timeout_ms: 30_000,
        }
    }
}

/// One successful collector result, kept for the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub sensor: String,
    pub signals: SourceSignals,
    pub elapsed_ms: u64,
}

/// Merged signals plus the per-source observations behind them
#[derive(Debug, Clone)]
pub struct Collection {
    pub signals: RawSignals,
    pub observations: Vec<Observation>,
}

enum Outcome {
    Responded(Observation),
    Failed(String),
    Skipped,
}

pub struct Orchestrator {
    collectors: Vec<Arc<dyn Collector>>,
    breakers: Arc<BreakerRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(collectors: Vec<Arc<dyn Collector>>, breakers: Arc<BreakerRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            collectors,
            breakers,
            config,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.sensor_id().to_string()).collect()
    }

    async fn run_one(&self, collector: &Arc<dyn Collector>, target: &TargetIdentity, deadline: tokio::time::Instant) -> Outcome {
        let sensor = collector.sensor_id();
        let breaker = self.breakers.get(sensor);
        if !breaker.try_acquire() {
            debug!("Circuit open for {}, skipping", sensor);
            return Outcome::Skipped;
        }

        let started = Instant::now();
        let per_call = tokio::time::Instant::now() + Duration::from_millis(self.config.per_call_timeout_ms);
        // Own task so a panic fails only this source
        let task = {
            let collector = collector.clone();
            let target = target.clone();
            tokio::spawn(async move { collector.collect(&target).await })
        };
        let abort = task.abort_handle();
        match timeout_at(per_call.min(deadline), task).await {
            Ok(Ok(Ok(signals))) => {
                breaker.record_success();
                Outcome::Responded(Observation {
                    sensor: sensor.to_string(),
                    signals,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Ok(Err(e))) => {
                breaker.record_failure();
                debug!("Collector {} failed: {}", sensor, e);
                Outcome::Failed(e.to_string())
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                warn!("Collector {} crashed: {}", sensor, e);
                Outcome::Failed(if e.is_panic() {
                    "collector panicked".to_string()
                } else {
                    format!("collector task failed: {}", e)
                })
            }
            Err(_) => {
                abort.abort();
                breaker.record_failure();
                warn!("Collector {} timed out after {}ms", sensor, started.elapsed().as_millis());
                Outcome::Failed(format!("timed out after {}ms", started.elapsed().as_millis()))
            }
        }
    }

    /// Collect every applicable source for a target.
    ///
    /// Results are merged in collector order, so the signal set does not
    /// depend on which source answered first.
    pub async fn collect(&self, target: &TargetIdentity) -> Collection {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.overall_timeout_ms);
        let applicable: Vec<&Arc<dyn Collector>> =
            self.collectors.iter().filter(|c| c.applies_to(target)).collect();

        let outcomes: Vec<(String, Outcome)> = stream::iter(applicable.iter().copied())
            .map(|collector| async move {
                let outcome = self.run_one(collector, target, deadline).await;
                (collector.sensor_id().to_string(), outcome)
            })
            .buffered(applicable.len().max(1))
            .collect()
            .await;

        let mut signals = RawSignals::new(target.clone());
        let mut observations = Vec::new();
        for (sensor, outcome) in outcomes {
            signals.coverage.queried.push(sensor.clone());
            match outcome {
                Outcome::Responded(observation) => {
                    signals.coverage.responded.push(sensor);
                    signals.merge(observation.signals.clone());
                    observations.push(observation);
                }
                Outcome::Failed(reason) => {
                    signals.coverage.errors.insert(sensor, reason);
                }
                Outcome::Skipped => signals.coverage.skipped.push(sensor),
            }
        }
        signals.coverage.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "Collected {}/{} sources for {} in {}ms ({} skipped)",
            signals.coverage.responded.len(),
            signals.coverage.queried.len(),
            target.raw,
            signals.coverage.elapsed_ms,
            signals.coverage.skipped.len()
        );
        Collection { signals, observations }
    }
}
