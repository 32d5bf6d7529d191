// src/breaker.rs
//! Per-source circuit breaker.
//!
//! CLOSED records outcomes in a rolling time window. Once the window holds at
//! least `min_samples` outcomes and the failure rate exceeds
//! `failure_rate_threshold` percent, the source goes OPEN and is skipped until
//! its cool-down elapses. The next `allow_request` moves it to HALF_OPEN, where
//! up to `half_open_trials` requests pass: a success closes the circuit, a
//! failure re-opens it with the cool-down multiplied (capped at
//! `max_cooldown_secs`).
//!
//! Each source has its own mutex; the outer map lock is only taken to find or
//! create a bucket, so unrelated sources never serialize on each other.

use metrics::{counter, describe_counter, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::FetchError;

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Rolling window over which outcomes are counted.
    #[serde(default = "default_window")]
    pub window_secs: u64,
    /// Outcomes required in the window before the rate is trusted.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Open once the failure rate (percent) exceeds this.
    #[serde(default = "default_threshold")]
    pub failure_rate_threshold: f32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Cool-down growth when a half-open trial fails.
    #[serde(default = "default_multiplier")]
    pub cooldown_multiplier: f32,
    #[serde(default = "default_max_cooldown")]
    pub max_cooldown_secs: u64,
    #[serde(default = "default_trials")]
    pub half_open_trials: u32,
}

fn default_window() -> u64 {
    300
}
fn default_min_samples() -> usize {
    3
}
fn default_threshold() -> f32 {
    50.0
}
fn default_cooldown() -> u64 {
    60
}
fn default_multiplier() -> f32 {
    2.0
}
fn default_max_cooldown() -> u64 {
    30 * 60
}
fn default_trials() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            min_samples: default_min_samples(),
            failure_rate_threshold: default_threshold(),
            cooldown_secs: default_cooldown(),
            cooldown_multiplier: default_multiplier(),
            max_cooldown_secs: default_max_cooldown(),
            half_open_trials: default_trials(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

/// Snapshot returned by `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_rate_percent: f32,
    pub is_healthy: bool,
    pub samples: usize,
}

#[derive(Debug)]
struct Bucket {
    state: BreakerState,
    /// (when, succeeded)
    outcomes: VecDeque<(Instant, bool)>,
    last_transition: Instant,
    cooldown: Duration,
    reopen_at: Option<Instant>,
    trials_in_flight: u32,
    /// Unanswered half-open trials expire here; a dropped fetch never reports back.
    trial_deadline: Option<Instant>,
    last_error: Option<String>,
}

impl Bucket {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            outcomes: VecDeque::new(),
            last_transition: Instant::now(),
            cooldown,
            reopen_at: None,
            trials_in_flight: 0,
            trial_deadline: None,
            last_error: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(t, _)) = self.outcomes.front() {
            if now.duration_since(t) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f32 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        failures as f32 * 100.0 / self.outcomes.len() as f32
    }
}

/// Process-wide breaker registry keyed by source id.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "breaker_transitions_total",
            "Circuit breaker state transitions per source."
        );
        describe_counter!(
            "breaker_rejections_total",
            "Requests skipped because the source circuit was open."
        );
    });
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        ensure_metrics_described();
        Self {
            cfg,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.cfg
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.cfg.window_secs)
    }

    fn base_cooldown(&self) -> Duration {
        Duration::from_secs(self.cfg.cooldown_secs)
    }

    fn bucket(&self, source_id: &str) -> Arc<Mutex<Bucket>> {
        if let Ok(map) = self.buckets.read() {
            if let Some(b) = map.get(source_id) {
                return b.clone();
            }
        }
        match self.buckets.write() {
            Ok(mut map) => map
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(self.base_cooldown()))))
                .clone(),
            // Poisoned registry: hand out a detached bucket so callers keep working.
            Err(_) => Arc::new(Mutex::new(Bucket::new(self.base_cooldown()))),
        }
    }

    fn transition(&self, source_id: &str, b: &mut Bucket, to: BreakerState, now: Instant) {
        if b.state == to {
            return;
        }
        let from = b.state;
        b.state = to;
        b.last_transition = now;
        counter!("breaker_transitions_total", "source" => source_id.to_string(), "to" => to.as_str())
            .increment(1);
        gauge!("breaker_state", "source" => source_id.to_string()).set(to.gauge_value());
        match to {
            BreakerState::Open => warn!(
                target: "breaker",
                source = source_id,
                from = from.as_str(),
                cooldown_secs = b.cooldown.as_secs(),
                last_error = b.last_error.as_deref().unwrap_or(""),
                "circuit opened"
            ),
            _ => info!(target: "breaker", source = source_id, from = from.as_str(), to = to.as_str(), "circuit transition"),
        }
    }

    /// Pre-flight gate. Returning `true` in HALF_OPEN consumes a trial slot.
    pub fn allow_request(&self, source_id: &str) -> bool {
        let bucket = self.bucket(source_id);
        let Ok(mut b) = bucket.lock() else {
            return true;
        };
        let now = Instant::now();
        let allowed = match b.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if b.reopen_at.is_some_and(|t| now >= t) {
                    self.transition(source_id, &mut b, BreakerState::HalfOpen, now);
                    b.trials_in_flight = 1;
                    b.trial_deadline = Some(now + b.cooldown);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if b.trials_in_flight < self.cfg.half_open_trials.max(1) {
                    b.trials_in_flight += 1;
                    b.trial_deadline = Some(now + b.cooldown);
                    true
                } else if b.trial_deadline.is_some_and(|t| now >= t) {
                    warn!(
                        target: "breaker",
                        source = source_id,
                        abandoned = b.trials_in_flight,
                        "half-open trials never reported; re-arming"
                    );
                    b.trials_in_flight = 1;
                    b.trial_deadline = Some(now + b.cooldown);
                    true
                } else {
                    false
                }
            }
        };
        if !allowed {
            counter!("breaker_rejections_total", "source" => source_id.to_string()).increment(1);
        }
        allowed
    }

    pub fn record_success(&self, source_id: &str) {
        let bucket = self.bucket(source_id);
        let Ok(mut b) = bucket.lock() else {
            return;
        };
        let now = Instant::now();
        match b.state {
            BreakerState::HalfOpen => {
                b.outcomes.clear();
                b.cooldown = self.base_cooldown();
                b.reopen_at = None;
                b.trials_in_flight = 0;
                b.trial_deadline = None;
                b.last_error = None;
                b.outcomes.push_back((now, true));
                self.transition(source_id, &mut b, BreakerState::Closed, now);
            }
            _ => {
                b.outcomes.push_back((now, true));
                b.prune(now, self.window());
            }
        }
    }

    pub fn record_failure(&self, source_id: &str, error: &FetchError) {
        let bucket = self.bucket(source_id);
        let Ok(mut b) = bucket.lock() else {
            return;
        };
        let now = Instant::now();
        b.last_error = Some(error.to_string());
        match b.state {
            BreakerState::HalfOpen => {
                let grown = b.cooldown.as_secs_f32() * self.cfg.cooldown_multiplier.max(1.0);
                let capped = grown.min(self.cfg.max_cooldown_secs as f32);
                b.cooldown = Duration::from_secs_f32(capped.max(0.0));
                b.reopen_at = Some(now + b.cooldown);
                b.trials_in_flight = 0;
                b.trial_deadline = None;
                self.transition(source_id, &mut b, BreakerState::Open, now);
            }
            BreakerState::Closed => {
                b.outcomes.push_back((now, false));
                b.prune(now, self.window());
                let samples = b.outcomes.len();
                if samples >= self.cfg.min_samples
                    && b.failure_rate() > self.cfg.failure_rate_threshold
                {
                    b.reopen_at = Some(now + b.cooldown);
                    self.transition(source_id, &mut b, BreakerState::Open, now);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn get_stats(&self, source_id: &str) -> BreakerStats {
        let bucket = self.bucket(source_id);
        let Ok(mut b) = bucket.lock() else {
            return BreakerStats {
                state: BreakerState::Closed,
                failure_rate_percent: 0.0,
                is_healthy: true,
                samples: 0,
            };
        };
        let window = self.window();
        b.prune(Instant::now(), window);
        BreakerStats {
            state: b.state,
            failure_rate_percent: b.failure_rate(),
            is_healthy: b.state == BreakerState::Closed,
            samples: b.outcomes.len(),
        }
    }

    /// Stats for every source seen so far, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, BreakerStats)> {
        let ids: Vec<String> = match self.buckets.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        let mut out: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let s = self.get_stats(&id);
                (id, s)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BreakerConfig {
        BreakerConfig {
            window_secs: 60,
            min_samples: 3,
            failure_rate_threshold: 50.0,
            cooldown_secs: 30,
            cooldown_multiplier: 2.0,
            max_cooldown_secs: 100,
            half_open_trials: 1,
        }
    }

    fn boom() -> FetchError {
        FetchError::Status { code: 503 }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_only_after_min_samples() {
        let cb = CircuitBreaker::new(cfg());
        cb.record_failure("s", &boom());
        cb.record_failure("s", &boom());
        assert!(cb.allow_request("s"), "two samples are below the minimum");
        cb.record_failure("s", &boom());
        assert!(!cb.allow_request("s"));
        let st = cb.get_stats("s");
        assert_eq!(st.state, BreakerState::Open);
        assert!(!st.is_healthy);
        assert!((st.failure_rate_percent - 100.0).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_at_threshold_stays_closed() {
        let cb = CircuitBreaker::new(cfg());
        cb.record_success("s");
        cb.record_failure("s", &boom());
        cb.record_success("s");
        cb.record_failure("s", &boom());
        assert_eq!(cb.get_stats("s").state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn old_outcomes_leave_the_window() {
        let cb = CircuitBreaker::new(cfg());
        cb.record_failure("s", &boom());
        cb.record_failure("s", &boom());
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.record_failure("s", &boom());
        assert_eq!(cb.get_stats("s").state, BreakerState::Closed);
        assert_eq!(cb.get_stats("s").samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_bounded_trials_then_closes_on_success() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("s", &boom());
        }
        assert!(!cb.allow_request("s"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow_request("s"), "first trial after cool-down");
        assert_eq!(cb.get_stats("s").state, BreakerState::HalfOpen);
        assert!(!cb.allow_request("s"), "trial budget exhausted");

        cb.record_success("s");
        let st = cb.get_stats("s");
        assert_eq!(st.state, BreakerState::Closed);
        assert!(st.is_healthy);
        assert!(cb.allow_request("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_with_longer_cooldown() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("s", &boom());
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow_request("s"));
        cb.record_failure("s", &boom());
        assert_eq!(cb.get_stats("s").state, BreakerState::Open);

        // Cool-down doubled to 60s.
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(!cb.allow_request("s"));
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(cb.allow_request("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn sources_are_isolated() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..5 {
            cb.record_failure("dead", &boom());
        }
        assert!(!cb.allow_request("dead"));
        assert!(cb.allow_request("alive"));
        let snap = cb.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "alive");
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_trials_when_configured() {
        let cb = CircuitBreaker::new(BreakerConfig {
            half_open_trials: 2,
            ..cfg()
        });
        for _ in 0..3 {
            cb.record_failure("s", &boom());
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.allow_request("s"));
        assert!(cb.allow_request("s"));
        assert!(!cb.allow_request("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_trial_is_rearmed_after_cooldown() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("s", &boom());
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        // Trial granted, then the caller goes away without reporting.
        assert!(cb.allow_request("s"));
        assert!(!cb.allow_request("s"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.allow_request("s"), "trial still within its deadline");
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow_request("s"), "abandoned trial slot is reclaimed");
        assert_eq!(cb.get_stats("s").state, BreakerState::HalfOpen);

        cb.record_success("s");
        assert_eq!(cb.get_stats("s").state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_trials_still_admits_one() {
        let cb = CircuitBreaker::new(BreakerConfig {
            half_open_trials: 0,
            ..cfg()
        });
        for _ in 0..3 {
            cb.record_failure("s", &boom());
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow_request("s"));
        assert!(!cb.allow_request("s"));
    }
}
