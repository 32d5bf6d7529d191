// src/ingest/guarded.rs
//! Fault-isolated source: cache first, then the circuit breaker gate, then the
//! retried adapter call. Every outcome is captured as a value; nothing here
//! propagates an error to the orchestrator.

use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::breaker::CircuitBreaker;
use crate::cache::{cache_key, ResponseCache};
use crate::config::CuratorConfig;
use crate::error::FetchError;
use crate::ingest::{ensure_metrics_described, SourceAdapter};
use crate::retry::RetryExecutor;

/// Shared resilience context handed to every guarded source.
#[derive(Clone)]
pub struct FetchContext {
    pub cache: Arc<ResponseCache<Vec<Article>>>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryExecutor,
}

impl FetchContext {
    /// Fresh cache, breaker and retry executor from config.
    pub fn from_config(cfg: &CuratorConfig) -> Self {
        Self {
            cache: Arc::new(ResponseCache::new(cfg.cache.clone())),
            breaker: Arc::new(CircuitBreaker::new(cfg.breaker.clone())),
            retry: RetryExecutor::new(cfg.retry.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Invalid,
    CircuitOpen,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::Invalid => "invalid",
            SkipReason::CircuitOpen => "circuit_open",
        }
    }
}

/// Per-source result of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Fetched { articles: Vec<Article>, cached: bool },
    Skipped(SkipReason),
    Failed { error: FetchError },
}

impl SourceOutcome {
    /// Graceful degradation: anything but a fetch yields no articles.
    pub fn into_articles(self) -> Vec<Article> {
        match self {
            SourceOutcome::Fetched { articles, .. } => articles,
            _ => Vec::new(),
        }
    }
}

/// Serializable summary of a `SourceOutcome`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub status: &'static str,
    pub articles: usize,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SourceReport {
    pub fn from_outcome(source: &str, outcome: &SourceOutcome) -> Self {
        let (status, articles, cached, detail) = match outcome {
            SourceOutcome::Fetched { articles, cached } => ("ok", articles.len(), *cached, None),
            SourceOutcome::Skipped(r) => ("skipped", 0, false, Some(r.as_str().to_string())),
            SourceOutcome::Failed { error } => ("failed", 0, false, Some(error.to_string())),
        };
        Self {
            source: source.to_string(),
            status,
            articles,
            cached,
            detail,
        }
    }
}

enum Produced {
    Fresh(Vec<Article>),
    Rejected,
}

pub struct GuardedSource {
    adapter: Box<dyn SourceAdapter>,
    ctx: FetchContext,
    validation: Result<(), FetchError>,
}

impl GuardedSource {
    /// Validates once; an invalid source is logged here and skipped on every fetch.
    pub fn new(adapter: Box<dyn SourceAdapter>, ctx: FetchContext) -> Self {
        ensure_metrics_described();
        let validation = adapter.validate();
        if let Err(e) = &validation {
            warn!(target: "ingest", source = adapter.id(), error = %e, "source invalid; disabled for this run");
        }
        Self {
            adapter,
            ctx,
            validation,
        }
    }

    pub fn adapter(&self) -> &dyn SourceAdapter {
        self.adapter.as_ref()
    }

    pub fn id(&self) -> &str {
        self.adapter.id()
    }

    pub fn validation_error(&self) -> Option<&FetchError> {
        self.validation.as_ref().err()
    }

    fn skipped(&self, reason: SkipReason) -> SourceOutcome {
        counter!("ingest_source_skipped_total", "source" => self.id().to_string(), "reason" => reason.as_str())
            .increment(1);
        SourceOutcome::Skipped(reason)
    }

    pub async fn fetch(&self, keywords: &[String]) -> SourceOutcome {
        if !self.adapter.enabled() {
            return self.skipped(SkipReason::Disabled);
        }
        if self.validation.is_err() {
            return self.skipped(SkipReason::Invalid);
        }

        let id = self.id().to_string();
        let class = self.adapter.kind().cache_class();
        let key = cache_key(&id, &self.adapter.request_params(keywords));
        let t0 = Instant::now();

        // Only real network calls reach the breaker; cache hits never do.
        let mut produced = None;
        let slot = &mut produced;
        let sid = id.as_str();
        let result = self
            .ctx
            .cache
            .wrap(class, &key, move || async move {
                if !self.ctx.breaker.allow_request(sid) {
                    *slot = Some(Produced::Rejected);
                    return Ok(None);
                }
                let res = self
                    .ctx
                    .retry
                    .execute(sid, || self.adapter.fetch(keywords))
                    .await;
                match res {
                    Ok(articles) => {
                        self.ctx.breaker.record_success(sid);
                        // Empty results are not cached.
                        let out = (!articles.is_empty()).then(|| articles.clone());
                        *slot = Some(Produced::Fresh(articles));
                        Ok(out)
                    }
                    Err(e) => {
                        self.ctx.breaker.record_failure(sid, &e);
                        Err(e)
                    }
                }
            })
            .await;

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_fetch_ms", "source" => id.clone()).record(ms);

        match (result, produced) {
            (Err(error), _) => {
                counter!("ingest_source_errors_total", "source" => id.clone(), "kind" => error.kind())
                    .increment(1);
                warn!(target: "ingest", source = %id, error = %error, "source failed; contributing nothing");
                SourceOutcome::Failed { error }
            }
            (Ok(_), Some(Produced::Rejected)) => {
                info!(target: "ingest", source = %id, "circuit open; fetch skipped");
                self.skipped(SkipReason::CircuitOpen)
            }
            (Ok(_), Some(Produced::Fresh(articles))) => {
                debug!(target: "ingest", source = %id, count = articles.len(), ms, "fetched");
                SourceOutcome::Fetched {
                    articles,
                    cached: false,
                }
            }
            (Ok(hit), None) => {
                let articles = hit.unwrap_or_default();
                debug!(target: "ingest", source = %id, count = articles.len(), "served from cache");
                SourceOutcome::Fetched {
                    articles,
                    cached: true,
                }
            }
        }
    }

    /// Convenience: the articles this source contributes, empty on any failure.
    pub async fn articles(&self, keywords: &[String]) -> Vec<Article> {
        self.fetch(keywords).await.into_articles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, BreakerState};
    use crate::cache::CacheConfig;
    use crate::ingest::{AdapterKind, SourceMeta};
    use crate::retry::RetryConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Scripted {
        meta: SourceMeta,
        calls: Arc<AtomicU32>,
        fail: bool,
        valid: bool,
        delay: Duration,
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn meta(&self) -> &SourceMeta {
            &self.meta
        }
        fn kind(&self) -> AdapterKind {
            AdapterKind::GenericFeed
        }
        fn validate(&self) -> Result<(), FetchError> {
            if self.valid {
                Ok(())
            } else {
                Err(FetchError::Misconfigured("missing url".into()))
            }
        }
        fn request_params(&self, keywords: &[String]) -> Vec<String> {
            keywords.to_vec()
        }
        async fn fetch(&self, _keywords: &[String]) -> Result<Vec<Article>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(FetchError::Malformed("bad xml".into()));
            }
            Ok(vec![Article {
                title: "A perfectly normal headline".into(),
                link: format!("https://{}.test/a", self.meta.id),
                published: None,
                description: String::new(),
                source: self.meta.id.clone(),
                image: None,
            }])
        }
    }

    fn ctx() -> FetchContext {
        FetchContext {
            cache: Arc::new(ResponseCache::new(CacheConfig::default())),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig {
                min_samples: 2,
                ..Default::default()
            })),
            retry: RetryExecutor::new(RetryConfig {
                max_retries: 0,
                ..Default::default()
            }),
        }
    }

    fn source(id: &str, fail: bool, valid: bool, enabled: bool) -> (Box<dyn SourceAdapter>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let a = Scripted {
            meta: SourceMeta {
                id: id.into(),
                name: id.into(),
                priority: 0,
                enabled,
            },
            calls: calls.clone(),
            fail,
            valid,
            delay: Duration::ZERO,
        };
        (Box::new(a), calls)
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let (a, calls) = source("ok", false, true, true);
        let g = GuardedSource::new(a, ctx());
        let kw = vec!["ai".to_string()];
        assert!(matches!(g.fetch(&kw).await, SourceOutcome::Fetched { cached: false, .. }));
        assert!(matches!(g.fetch(&kw).await, SourceOutcome::Fetched { cached: true, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_open_the_circuit_and_skip_the_call() {
        let c = ctx();
        let (a, calls) = source("bad", true, true, true);
        let g = GuardedSource::new(a, c.clone());
        let kw = vec!["ai".to_string()];
        assert!(matches!(g.fetch(&kw).await, SourceOutcome::Failed { .. }));
        assert!(matches!(g.fetch(&kw).await, SourceOutcome::Failed { .. }));
        assert_eq!(c.breaker.get_stats("bad").state, BreakerState::Open);

        let out = g.fetch(&kw).await;
        assert_eq!(out, SourceOutcome::Skipped(SkipReason::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(g.articles(&kw).await.is_empty());
    }

    #[tokio::test]
    async fn disabled_and_invalid_sources_never_call_upstream() {
        let (a, calls) = source("off", false, true, false);
        let g = GuardedSource::new(a, ctx());
        assert_eq!(g.fetch(&[]).await, SourceOutcome::Skipped(SkipReason::Disabled));

        let (b, calls_b) = source("broken", false, false, true);
        let g = GuardedSource::new(b, ctx());
        assert!(g.validation_error().is_some());
        assert_eq!(g.fetch(&[]).await, SourceOutcome::Skipped(SkipReason::Invalid));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_half_open_trial_does_not_strand_the_source() {
        let c = FetchContext {
            cache: Arc::new(ResponseCache::new(CacheConfig::default())),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig {
                min_samples: 1,
                cooldown_secs: 30,
                half_open_trials: 1,
                ..Default::default()
            })),
            retry: RetryExecutor::new(RetryConfig {
                max_retries: 0,
                attempt_timeout_ms: 10_000,
                ..Default::default()
            }),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let slow = Scripted {
            meta: SourceMeta {
                id: "slow".into(),
                name: "slow".into(),
                priority: 0,
                enabled: true,
            },
            calls: calls.clone(),
            fail: false,
            valid: true,
            delay: Duration::from_secs(5),
        };
        let g = GuardedSource::new(Box::new(slow), c.clone());
        let kw = vec!["ai".to_string()];

        c.breaker.record_failure("slow", &FetchError::Timeout);
        assert_eq!(c.breaker.get_stats("slow").state, BreakerState::Open);
        tokio::time::advance(Duration::from_secs(31)).await;

        // The caller gives up mid-trial; neither success nor failure is recorded.
        let dropped = tokio::time::timeout(Duration::from_secs(1), g.fetch(&kw)).await;
        assert!(dropped.is_err());
        assert_eq!(c.breaker.get_stats("slow").state, BreakerState::HalfOpen);

        tokio::time::advance(Duration::from_secs(24 * 3600)).await;
        let out = g.fetch(&kw).await;
        assert!(matches!(out, SourceOutcome::Fetched { cached: false, .. }), "got {out:?}");
        assert_eq!(c.breaker.get_stats("slow").state, BreakerState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn report_summarizes_outcome() {
        let r = SourceReport::from_outcome(
            "x",
            &SourceOutcome::Failed {
                error: FetchError::Status { code: 503 },
            },
        );
        assert_eq!(r.status, "failed");
        assert_eq!(r.detail.as_deref(), Some("upstream returned HTTP 503"));
    }
}
