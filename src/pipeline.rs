// src/pipeline.rs
//! Orchestrator: fan out to every source concurrently, settle all, aggregate,
//! score, diversify, and package the result as a `Digest`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::article::ScoredArticle;
use crate::breaker::BreakerStats;
use crate::config::CuratorConfig;
use crate::diversify::{diversify, DiversifyConfig, DiversityReport};
use crate::error::ConfigError;
use crate::ingest::guarded::{FetchContext, GuardedSource, SourceReport};
use crate::ingest::transport::HttpTransport;
use crate::ingest::{build_adapter, clean_keywords, AdapterKind};
use crate::relevance::{FilterStats, RelevanceEngine};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
        describe_gauge!("pipeline_last_run_ts", "Unix timestamp of the last completed run.");
    });
}

/// Everything one run produced, handed to the delivery sink.
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub generated_at: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub articles: Vec<ScoredArticle>,
    pub distribution: BTreeMap<String, usize>,
    pub diversity: DiversityReport,
    pub sources: Vec<SourceReport>,
    /// Counts over the whole run: `input` is every fetched article and
    /// `duplicates` includes cross-source collapses made during aggregation.
    pub filter_stats: FilterStats,
    /// Articles after aggregation, before the relevance engine.
    pub aggregated: usize,
}

/// Static view of one source plus its live breaker stats.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    pub kind: AdapterKind,
    pub priority: i32,
    pub enabled: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    pub breaker: BreakerStats,
}

pub struct Pipeline {
    sources: Vec<GuardedSource>,
    engine: RelevanceEngine,
    diversify: DiversifyConfig,
    duplicate_threshold: f64,
    ctx: FetchContext,
}

impl Pipeline {
    /// Sources are kept in descending priority; that order is the
    /// aggregation order, so earlier sources win duplicate ties.
    pub fn new(
        cfg: &CuratorConfig,
        transport: Arc<dyn HttpTransport>,
        ctx: FetchContext,
    ) -> Result<Self, ConfigError> {
        ensure_metrics_described();
        let engine = RelevanceEngine::from_config(cfg)?;
        let mut sources: Vec<GuardedSource> = cfg
            .sources
            .iter()
            .map(|s| GuardedSource::new(build_adapter(s, transport.clone()), ctx.clone()))
            .collect();
        sources.sort_by_key(|g| std::cmp::Reverse(g.adapter().priority()));

        info!(
            target: "pipeline",
            sources = sources.len(),
            enabled = sources.iter().filter(|s| s.adapter().enabled()).count(),
            "pipeline ready"
        );
        Ok(Self {
            sources,
            engine,
            diversify: cfg.diversify.clone(),
            duplicate_threshold: cfg.filters.duplicate_threshold,
            ctx,
        })
    }

    pub fn from_config(cfg: &CuratorConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, ConfigError> {
        Self::new(cfg, transport, FetchContext::from_config(cfg))
    }

    pub fn context(&self) -> &FetchContext {
        &self.ctx
    }

    pub fn sources(&self) -> &[GuardedSource] {
        &self.sources
    }

    pub fn engine(&self) -> &RelevanceEngine {
        &self.engine
    }

    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|g| {
                let a = g.adapter();
                SourceStatus {
                    id: a.id().to_string(),
                    name: a.name().to_string(),
                    kind: a.kind(),
                    priority: a.priority(),
                    enabled: a.enabled(),
                    valid: g.validation_error().is_none(),
                    validation_error: g.validation_error().map(|e| e.to_string()),
                    breaker: self.ctx.breaker.get_stats(a.id()),
                }
            })
            .collect()
    }

    pub async fn run(&self, keywords: &[String]) -> Digest {
        self.run_at(keywords, Utc::now()).await
    }

    /// Same as `run` with an explicit clock for scoring.
    pub async fn run_at(&self, keywords: &[String], now: DateTime<Utc>) -> Digest {
        let keywords = clean_keywords(keywords);
        let t0 = std::time::Instant::now();

        // Settle all: each outcome is a value, none can abort the others.
        let outcomes = join_all(self.sources.iter().map(|s| s.fetch(&keywords))).await;

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut per_source = Vec::with_capacity(outcomes.len());
        for (src, outcome) in self.sources.iter().zip(outcomes) {
            reports.push(SourceReport::from_outcome(src.id(), &outcome));
            per_source.push(outcome.into_articles());
        }

        let fetched: usize = per_source.iter().map(Vec::len).sum();
        let aggregated = crate::aggregate::aggregate(per_source, self.duplicate_threshold);
        let aggregated_count = aggregated.len();
        let mut ranked = self.engine.run(aggregated, now);
        ranked.stats.input = fetched;
        ranked.stats.duplicates += fetched - aggregated_count;
        let picked = diversify(ranked.articles, &self.diversify);

        counter!("pipeline_runs_total").increment(1);
        gauge!("pipeline_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "pipeline",
            keywords = keywords.len(),
            sources_ok = reports.iter().filter(|r| r.status == "ok").count(),
            aggregated = aggregated_count,
            selected = picked.articles.len(),
            ms = t0.elapsed().as_millis() as u64,
            "run complete"
        );

        Digest {
            generated_at: now,
            keywords,
            distribution: picked.report.distribution.clone(),
            articles: picked.articles,
            diversity: picked.report,
            sources: reports,
            filter_stats: ranked.stats,
            aggregated: aggregated_count,
        }
    }
}
