//! Per-collector circuit breakers
//!
//! closed -> open after `failure_threshold` consecutive failures.
//! open -> half-open once `recovery_timeout` has elapsed.
//! half-open admits a single trial call: success closes the breaker,
//! failure re-opens it with a fresh timer.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use trust_core::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Threshold and recovery window for one collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl BreakerPolicy {
    pub const fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_secs,
        }
    }

    fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

/// Tuned defaults per built-in source
pub fn default_policy(source: Source) -> BreakerPolicy {
    match source {
        Source::Tranco => BreakerPolicy::new(5, 30),
        Source::Crtsh => BreakerPolicy::new(3, 120),
        Source::Reputation => BreakerPolicy::new(3, 60),
        Source::Dns => BreakerPolicy::new(5, 120),
        Source::HttpHeaders => BreakerPolicy::new(3, 60),
        Source::Whois => BreakerPolicy::new(3, 120),
        Source::KnowledgeGraph => BreakerPolicy::new(3, 60),
        Source::WebPresence => BreakerPolicy::new(3, 60),
        Source::Social => BreakerPolicy::new(5, 120),
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub last_failure_secs_ago: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    recovery: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, policy: BreakerPolicy) -> Self {
        Self::with_recovery(name, policy, policy.recovery_timeout())
    }

    /// Breaker with a sub-second recovery window
    pub fn with_recovery(name: &str, policy: BreakerPolicy, recovery: Duration) -> Self {
        Self {
            name: name.to_string(),
            policy,
            recovery,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                opened_at: None,
                trial_started: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask permission to make a call.
    ///
    /// Returns false while open, and for everyone but the single trial
    /// caller while half-open.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| now.duration_since(t)).unwrap_or_default();
                if elapsed >= self.recovery {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_started = Some(now);
                    info!("Circuit {} half-open, admitting trial call", self.name);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // An abandoned trial (cancelled caller) frees the slot after one window
                let stale = inner
                    .trial_started
                    .map_or(true, |t| now.duration_since(t) >= self.recovery);
                if stale {
                    inner.trial_started = Some(now);
                }
                stale
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!("Circuit {} closed", self.name);
        }
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(now);
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_started = None;
                warn!("Circuit {} trial failed, re-opened", self.name);
            }
            BreakerState::Closed if inner.failures >= self.policy.failure_threshold => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                warn!(
                    "Circuit {} opened after {} consecutive failures",
                    self.name, inner.failures
                );
            }
            _ => {}
        }
    }

    /// Current state; an open breaker past its window reports half-open
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(t)) if t.elapsed() >= self.recovery => BreakerState::HalfOpen,
            (state, _) => state,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failures: inner.failures,
            failure_threshold: self.policy.failure_threshold,
            recovery_timeout_secs: self.policy.recovery_timeout_secs,
            last_failure_secs_ago: inner.last_failure.map(|t| t.elapsed().as_secs()),
        }
    }
}

/// One breaker per sensor, created on first use
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    policies: HashMap<String, BreakerPolicy>,
    fallback: BreakerPolicy,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        let policies = Source::ALL
            .iter()
            .map(|s| (s.sensor_id().to_string(), default_policy(*s)))
            .collect();
        Self {
            breakers: DashMap::new(),
            policies,
            fallback: BreakerPolicy::default(),
        }
    }

    /// Override the policy for one sensor
    pub fn with_policy(mut self, sensor: &str, policy: BreakerPolicy) -> Self {
        self.policies.insert(sensor.to_string(), policy);
        self
    }

    /// Install a pre-built breaker (used for custom recovery windows)
    pub fn insert(&self, breaker: CircuitBreaker) {
        self.breakers
            .insert(breaker.name().to_string(), Arc::new(breaker));
    }

    pub fn get(&self, sensor: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(sensor.to_string())
            .or_insert_with(|| {
                let policy = self.policies.get(sensor).copied().unwrap_or(self.fallback);
                Arc::new(CircuitBreaker::new(sensor, policy))
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::with_recovery("test", BreakerPolicy::new(threshold, 0), Duration::from_millis(40))
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = fast(3);
        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = fast(2);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().failures, 1);
    }

    #[test]
    fn test_half_open_admits_one_trial() {
        let breaker = fast(1);
        breaker.record_failure();
        assert!(!breaker.try_acquire());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = fast(1);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_registry_uses_source_policies() {
        let registry = BreakerRegistry::new().with_policy("custom", BreakerPolicy::new(7, 9));
        assert_eq!(registry.get("dns").snapshot().failure_threshold, 5);
        assert_eq!(registry.get("crtsh").snapshot().recovery_timeout_secs, 120);
        assert_eq!(registry.get("custom").snapshot().failure_threshold, 7);
        assert_eq!(registry.get("unknown").snapshot().failure_threshold, 3);
        assert!(Arc::ptr_eq(&registry.get("dns"), &registry.get("dns")));
        assert_eq!(registry.snapshots().len(), 4);
    }
}
