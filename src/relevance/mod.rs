// src/relevance/mod.rs
//! Relevance engine.
//!
//! Stages run in a fixed order:
//! 1. hard filters (spam, near-duplicates, quality, age)
//! 2. scoring (thematic, authority, timeliness, optional innovation)
//! 3. soft threshold (`min_score`)
//! 4. stable ranking by score
//! 5. truncation to `max_items`

pub mod authority;
pub mod filters;
pub mod innovation;
pub mod semantic;
pub mod thematic;
pub mod timeliness;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::aggregate::dedupe;
use crate::article::{Article, Breakdown, Relevance, RelevanceMetadata, ScoredArticle};
use crate::config::CuratorConfig;
use crate::error::ConfigError;
use authority::AuthorityScorer;
use filters::{HardFilters, RejectStage};
use innovation::InnovationScorer;
use semantic::{SemanticScorer, TopicVectorScorer};
use thematic::ThematicScorer;
use timeliness::TimelinessScorer;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ScoringWeights {
    pub thematic: f32,
    pub authority: f32,
    pub timeliness: f32,
    /// Ignored when the innovation dimension is disabled.
    #[serde(default)]
    pub innovation: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub min_score: f32,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// λ in `e^(-λ·hours)`; 0.029 halves the score roughly every 24h.
    #[serde(default = "default_decay")]
    pub decay_per_hour: f64,
    #[serde(default = "default_floor")]
    pub timeliness_floor: f64,
    #[serde(default = "default_neutral")]
    pub timeliness_neutral: f64,
}

fn default_max_items() -> usize {
    30
}
fn default_decay() -> f64 {
    0.029
}
fn default_floor() -> f64 {
    0.1
}
fn default_neutral() -> f64 {
    0.5
}

/// Per-stage counts for one engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterStats {
    pub input: usize,
    pub spam: usize,
    pub duplicates: usize,
    pub quality: usize,
    pub too_old: usize,
    pub below_threshold: usize,
    pub truncated: usize,
    pub output: usize,
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub articles: Vec<ScoredArticle>,
    pub stats: FilterStats,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relevance_filtered_total", "Articles removed, by pipeline stage.");
        describe_counter!("relevance_scored_total", "Articles that reached the scoring stage.");
    });
}

/// Short stable id for a title, so logs never carry article text.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub struct RelevanceEngine {
    weights: ScoringWeights,
    min_score: f32,
    max_items: usize,
    duplicate_threshold: f64,
    filters: HardFilters,
    thematic: ThematicScorer,
    authority: AuthorityScorer,
    timeliness: TimelinessScorer,
    innovation: Option<InnovationScorer>,
    semantic: Option<(Box<dyn SemanticScorer>, f32)>,
}

impl RelevanceEngine {
    /// Build from a validated config. Re-validates so a hand-built config
    /// cannot produce an engine with inconsistent weights.
    pub fn from_config(cfg: &CuratorConfig) -> Result<Self, ConfigError> {
        ensure_metrics_described();
        cfg.validate()?;

        let per_source: HashMap<String, f32> = cfg
            .sources
            .iter()
            .filter_map(|s| s.authority.map(|a| (s.id.clone(), a)))
            .collect();
        let innovation = if cfg.innovation.enabled {
            Some(InnovationScorer::new(&cfg.innovation)?)
        } else {
            None
        };
        let semantic = cfg.semantic.as_ref().map(|s| {
            (
                Box::new(TopicVectorScorer::new(s)) as Box<dyn SemanticScorer>,
                s.blend.clamp(0.0, 1.0),
            )
        });

        Ok(Self {
            weights: cfg.scoring.weights,
            min_score: cfg.scoring.min_score,
            max_items: cfg.scoring.max_items,
            duplicate_threshold: cfg.filters.duplicate_threshold,
            filters: HardFilters::new(cfg.filters.clone())?,
            thematic: ThematicScorer::new(&cfg.vocabulary),
            authority: AuthorityScorer::new(&cfg.authority, per_source),
            timeliness: TimelinessScorer::new(
                cfg.scoring.decay_per_hour,
                cfg.scoring.timeliness_floor,
                cfg.scoring.timeliness_neutral,
            ),
            innovation,
            semantic,
        })
    }

    /// Replace the semantic scorer (e.g. an embedding-backed one).
    pub fn with_semantic(mut self, scorer: Box<dyn SemanticScorer>, blend: f32) -> Self {
        self.semantic = Some((scorer, blend.clamp(0.0, 1.0)));
        self
    }

    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn filters(&self) -> &HardFilters {
        &self.filters
    }

    /// Score one article on every active dimension. Does not filter.
    pub fn score_article(&self, article: &Article, now: DateTime<Utc>) -> Relevance {
        let text = article.full_text();

        let lexical = self.thematic.score_text(&text);
        let mut thematic = lexical.score;
        let mut semantic_note = None;
        if let Some((scorer, blend)) = &self.semantic {
            if let Some(sim) = scorer.similarity(&text) {
                thematic = (1.0 - blend) * thematic + blend * sim;
                semantic_note = Some(format!("{} {:.2}", scorer.name(), sim));
            }
        }

        let authority = self.authority.score(article);
        let timeliness = self.timeliness.score(article.published, now);
        let innovation = self.innovation.as_ref().map(|s| s.score_text(&text));

        let breakdown = Breakdown {
            thematic: thematic.clamp(0.0, 1.0),
            authority,
            timeliness,
            innovation: innovation.as_ref().map(|i| i.score),
        };

        let w = &self.weights;
        let mut total = w.thematic * breakdown.thematic
            + w.authority * breakdown.authority
            + w.timeliness * breakdown.timeliness;
        if let Some(i) = breakdown.innovation {
            total += w.innovation * i;
        }
        let score = if total.is_finite() {
            total.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let age = article.age_hours(now);
        let mut reasons = Vec::new();
        if lexical.matched.is_empty() {
            reasons.push("no topic keywords".to_string());
        } else {
            let kws: Vec<&str> = lexical.matched.iter().take(3).map(|(k, _)| k.as_str()).collect();
            reasons.push(format!("topics: {}", kws.join(", ")));
        }
        if let Some(note) = semantic_note {
            reasons.push(note);
        }
        reasons.push(format!("authority {authority:.2}"));
        match age {
            Some(h) if h >= 0.0 => reasons.push(format!("{h:.0}h old")),
            Some(_) => reasons.push("future-dated".to_string()),
            None => reasons.push("undated".to_string()),
        }
        if let Some(sig) = &innovation {
            if !sig.boosts.is_empty() {
                reasons.push(format!("signals: {}", sig.boosts.join(", ")));
            }
            if !sig.penalties.is_empty() {
                reasons.push(format!("penalized: {}", sig.penalties.join(", ")));
            }
        }

        Relevance {
            score,
            breakdown,
            metadata: RelevanceMetadata {
                confidence: confidence(&breakdown.values()),
                reasoning: reasons.join("; "),
                source: article.source.clone(),
                age,
            },
        }
    }

    /// Full five-stage pass over `articles`.
    pub fn run(&self, articles: Vec<Article>, now: DateTime<Utc>) -> EngineOutput {
        let mut stats = FilterStats {
            input: articles.len(),
            ..Default::default()
        };

        // 1. hard filters
        let mut survivors = Vec::with_capacity(articles.len());
        for a in articles {
            match self.filters.check(&a, now) {
                Ok(()) => survivors.push(a),
                Err(r) => {
                    match r.stage {
                        RejectStage::Spam => stats.spam += 1,
                        RejectStage::Quality => stats.quality += 1,
                        RejectStage::Age => stats.too_old += 1,
                    }
                    counter!("relevance_filtered_total", "stage" => r.stage.as_str()).increment(1);
                    debug!(target: "relevance", id = %anon_hash(&a.title), stage = r.stage.as_str(), reason = %r.reason, "rejected");
                }
            }
        }
        let before = survivors.len();
        let survivors = dedupe(survivors, self.duplicate_threshold);
        stats.duplicates = before - survivors.len();

        // 2. scoring
        counter!("relevance_scored_total").increment(survivors.len() as u64);
        let scored: Vec<ScoredArticle> = survivors
            .into_iter()
            .map(|article| {
                let relevance = self.score_article(&article, now);
                ScoredArticle { article, relevance }
            })
            .collect();

        // 3. soft threshold
        let (mut kept, dropped): (Vec<_>, Vec<_>) =
            scored.into_iter().partition(|s| s.score() >= self.min_score);
        stats.below_threshold = dropped.len();
        if !dropped.is_empty() {
            counter!("relevance_filtered_total", "stage" => "threshold").increment(dropped.len() as u64);
        }

        // 4. rank (stable)
        kept.sort_by(|a, b| b.score().total_cmp(&a.score()));

        // 5. limit
        if kept.len() > self.max_items {
            stats.truncated = kept.len() - self.max_items;
            kept.truncate(self.max_items);
        }
        stats.output = kept.len();

        info!(
            target: "relevance",
            input = stats.input,
            spam = stats.spam,
            duplicates = stats.duplicates,
            quality = stats.quality,
            too_old = stats.too_old,
            below_threshold = stats.below_threshold,
            output = stats.output,
            "relevance pass"
        );

        EngineOutput {
            articles: kept,
            stats,
        }
    }
}

/// `1 - population variance`, clamped to [0,1].
pub fn confidence(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (1.0 - var).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use chrono::Duration;

    fn engine() -> RelevanceEngine {
        let cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        RelevanceEngine::from_config(&cfg).unwrap()
    }

    fn art(title: &str, desc: &str, hours_ago: Option<i64>, now: DateTime<Utc>) -> Article {
        Article {
            title: title.into(),
            link: format!("https://news.test/{}", anon_hash(title)),
            published: hours_ago.map(|h| now - Duration::hours(h)),
            description: desc.into(),
            source: "feed".into(),
            image: None,
        }
    }

    #[test]
    fn confidence_is_one_minus_variance() {
        assert_eq!(confidence(&[0.5, 0.5, 0.5]), 1.0);
        let c = confidence(&[0.0, 1.0]);
        assert!((c - 0.75).abs() < 1e-6);
    }

    #[test]
    fn scores_stay_in_unit_range_with_breakdown() {
        let now = Utc::now();
        let e = engine();
        let r = e.score_article(
            &art(
                "Robotics startup launches artificial intelligence platform",
                "The robotics company raised funding for its technology",
                Some(1),
                now,
            ),
            now,
        );
        assert!((0.0..=1.0).contains(&r.score));
        assert!(r.breakdown.thematic > 0.5);
        assert!(r.breakdown.innovation.is_some());
        assert!(r.metadata.reasoning.contains("topics:"));
        assert_eq!(r.metadata.source, "feed");
    }

    #[test]
    fn stages_run_in_order_and_count() {
        let now = Utc::now();
        let e = engine();
        let input = vec![
            art("YOU WON'T BELIEVE THIS!!!", "", Some(1), now),
            art("Robotics startup launches new robot arm", "", Some(1), now),
            art("Robotics startup launches new robot arm!", "", Some(2), now),
            art("Robotics breakthrough from old archive", "", Some(500), now),
            art("Tiny", "", Some(1), now),
            art("Gardening tips for a rainy weekend", "", Some(60), now),
        ];
        let out = e.run(input, now);
        assert_eq!(out.stats.input, 6);
        assert_eq!(out.stats.spam, 1);
        assert_eq!(out.stats.duplicates, 1);
        assert_eq!(out.stats.quality, 1);
        assert_eq!(out.stats.too_old, 1);
        assert_eq!(out.stats.below_threshold, 1);
        assert_eq!(out.articles.len(), 1);
        assert_eq!(out.stats.output, 1);
    }
}
