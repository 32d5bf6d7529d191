// src/retry.rs
//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! Delay before retry `n` (0-based) is `base * 2^n`, capped at `max_delay`.
//! Only retryable errors (see `FetchError::is_retryable`) are retried; the
//! last error is returned once retries are exhausted.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Hard bound on each individual attempt.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    8_000
}
fn default_attempt_timeout() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            attempt_timeout_ms: default_attempt_timeout(),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("retry_attempts_total", "Retries issued after a retryable failure.");
    });
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    cfg: RetryConfig,
}

impl RetryExecutor {
    pub fn new(cfg: RetryConfig) -> Self {
        ensure_metrics_described();
        Self { cfg }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.cfg
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.attempt_timeout_ms.max(1))
    }

    /// Deterministic schedule (no jitter) so delays match `base * 2^n`.
    fn schedule(&self) -> ExponentialBackoff {
        let base = Duration::from_millis(self.cfg.base_delay_ms);
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_millis(self.cfg.max_delay_ms.max(self.cfg.base_delay_ms)),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget runs out. `label` only feeds logs and metrics.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut schedule = self.schedule();
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout(), op()).await {
                Ok(res) => res,
                Err(_) => Err(FetchError::Timeout),
            };

            let err = match outcome {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.cfg.max_retries {
                if attempt > 0 {
                    warn!(target: "ingest", source = label, attempts = attempt + 1, error = %err, "giving up");
                }
                return Err(err);
            }

            let delay = schedule
                .next_backoff()
                .unwrap_or_else(|| Duration::from_millis(self.cfg.max_delay_ms));
            debug!(target: "ingest", source = label, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            counter!("retry_attempts_total", "source" => label.to_string()).increment(1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
