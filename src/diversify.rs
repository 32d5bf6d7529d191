// src/diversify.rs
//! Source diversification: pick `target` articles round-robin across sources
//! under a per-source cap, relaxing the cap (cap+1, cap+2, cap+3, target)
//! only when the batch cannot otherwise be filled.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::article::ScoredArticle;

#[derive(Debug, Clone, Deserialize)]
pub struct DiversifyConfig {
    #[serde(default = "default_target")]
    pub target: usize,
    #[serde(default = "default_cap")]
    pub per_source_cap: usize,
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
}

fn default_target() -> usize {
    10
}
fn default_cap() -> usize {
    3
}
fn default_min_sources() -> usize {
    4
}

impl Default for DiversifyConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            per_source_cap: default_cap(),
            min_sources: default_min_sources(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiversityReport {
    /// Source id → selected count.
    pub distribution: BTreeMap<String, usize>,
    pub distinct_sources: usize,
    pub target: usize,
    pub selected: usize,
    /// Cap that produced the final selection.
    pub cap_used: usize,
    pub relaxed: bool,
    /// Fewer distinct sources than `min_sources` made it in.
    pub below_min_sources: bool,
}

#[derive(Debug, Clone)]
pub struct Diversified {
    pub articles: Vec<ScoredArticle>,
    pub report: DiversityReport,
}

/// Increasing cap sequence, starting at `cap`, ending at `target`.
pub fn relaxation_schedule(cap: usize, target: usize) -> Vec<usize> {
    let cap = cap.max(1);
    let mut caps = vec![cap, cap + 1, cap + 2, cap + 3, target.max(cap)];
    caps.sort_unstable();
    caps.dedup();
    caps
}

/// Sources ordered by their best score; each group keeps score order.
fn group_by_source(ranked: Vec<ScoredArticle>) -> Vec<Vec<ScoredArticle>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ScoredArticle>> = Vec::new();
    for a in ranked {
        let slot = *index.entry(a.source().to_string()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(a);
    }
    for g in groups.iter_mut() {
        g.sort_by(|a, b| b.score().total_cmp(&a.score()));
    }
    // Stable: ties keep first-appearance order.
    groups.sort_by(|a, b| b[0].score().total_cmp(&a[0].score()));
    groups
}

/// Round-robin picks under `cap`. Returns `(group, position)` pairs.
fn round_robin(groups: &[Vec<ScoredArticle>], cap: usize, target: usize) -> Vec<(usize, usize)> {
    let mut taken = vec![0usize; groups.len()];
    let mut picks = Vec::with_capacity(target);
    while picks.len() < target {
        let mut progressed = false;
        for (g, items) in groups.iter().enumerate() {
            if picks.len() >= target {
                break;
            }
            if taken[g] < cap && taken[g] < items.len() {
                picks.push((g, taken[g]));
                taken[g] += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    picks
}

pub fn diversify(ranked: Vec<ScoredArticle>, cfg: &DiversifyConfig) -> Diversified {
    let target = cfg.target;
    let base_cap = cfg.per_source_cap.max(1);
    let groups = group_by_source(ranked);

    let mut picks = Vec::new();
    let mut cap_used = base_cap;
    for cap in relaxation_schedule(base_cap, target) {
        picks = round_robin(&groups, cap, target);
        cap_used = cap;
        if picks.len() >= target {
            break;
        }
    }

    let mut slots: Vec<Vec<Option<ScoredArticle>>> = groups
        .into_iter()
        .map(|g| g.into_iter().map(Some).collect())
        .collect();
    let mut articles: Vec<ScoredArticle> = picks
        .into_iter()
        .filter_map(|(g, i)| slots[g][i].take())
        .collect();
    articles.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut distribution = BTreeMap::new();
    for a in &articles {
        *distribution.entry(a.source().to_string()).or_insert(0) += 1;
    }
    let distinct_sources = distribution.len();
    let report = DiversityReport {
        distinct_sources,
        target,
        selected: articles.len(),
        cap_used,
        relaxed: cap_used > base_cap,
        below_min_sources: distinct_sources < cfg.min_sources,
        distribution,
    };

    if report.relaxed {
        info!(target: "diversify", cap = base_cap, cap_used, "per-source cap relaxed to fill batch");
    }
    if report.below_min_sources {
        warn!(
            target: "diversify",
            distinct = distinct_sources,
            min_sources = cfg.min_sources,
            "fewer distinct sources than requested"
        );
    }
    info!(target: "diversify", selected = report.selected, target, distinct = distinct_sources, "diversified");

    Diversified { articles, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{Article, Breakdown, Relevance, RelevanceMetadata};

    pub(crate) fn scored(source: &str, i: usize, score: f32) -> ScoredArticle {
        ScoredArticle {
            article: Article {
                title: format!("{source} story {i}"),
                link: format!("https://{source}.test/{i}"),
                published: None,
                description: String::new(),
                source: source.into(),
                image: None,
            },
            relevance: Relevance {
                score,
                breakdown: Breakdown::default(),
                metadata: RelevanceMetadata {
                    confidence: 1.0,
                    reasoning: String::new(),
                    source: source.into(),
                    age: None,
                },
            },
        }
    }

    fn ranked(sources: &[(&str, usize)]) -> Vec<ScoredArticle> {
        let mut v = Vec::new();
        for (si, (s, n)) in sources.iter().enumerate() {
            for i in 0..*n {
                v.push(scored(s, i, 0.99 - si as f32 * 0.01 - i as f32 * 0.05));
            }
        }
        v.sort_by(|a, b| b.score().total_cmp(&a.score()));
        v
    }

    #[test]
    fn schedule_is_increasing_and_ends_at_target() {
        assert_eq!(relaxation_schedule(3, 10), vec![3, 4, 5, 6, 10]);
        assert_eq!(relaxation_schedule(3, 4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn eight_sources_respect_cap() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let input: Vec<(&str, usize)> = names.iter().map(|n| (*n, 5)).collect();
        let out = diversify(ranked(&input), &DiversifyConfig::default());
        assert_eq!(out.articles.len(), 10);
        assert!(out.report.distinct_sources >= 4);
        assert!(out.report.distribution.values().all(|&c| c <= 3));
        assert!(!out.report.relaxed);
        // Output is score-ordered.
        assert!(out
            .articles
            .windows(2)
            .all(|w| w[0].score() >= w[1].score()));
    }

    #[test]
    fn two_sources_relax_until_full() {
        let out = diversify(ranked(&[("a", 8), ("b", 8)]), &DiversifyConfig::default());
        assert_eq!(out.articles.len(), 10);
        assert!(out.report.relaxed);
        assert_eq!(out.report.cap_used, 5);
        assert!(out.report.below_min_sources);
    }

    #[test]
    fn short_supply_returns_everything() {
        let out = diversify(ranked(&[("a", 3), ("b", 2)]), &DiversifyConfig::default());
        assert_eq!(out.articles.len(), 5);
        assert_eq!(out.report.cap_used, 10);
    }
}
