// src/aggregate.rs
//! Merge per-source lists into one stream and drop near-duplicates.
//!
//! Two articles are duplicates when their canonical links are equal, their
//! identity titles are equal, or their cleaned titles reach the similarity
//! threshold (normalized Levenshtein). The better article of a pair is kept
//! in the position of the first one seen.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::cmp::Ordering;
use tracing::debug;

use crate::article::{Article, ScoredArticle};

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.85;
/// Titles are compared on at most this many chars.
pub const TITLE_COMPARE_CHARS: usize = 100;
/// A description must be this much longer to win on length alone.
pub const LONGER_DESCRIPTION_FACTOR: f64 = 1.5;

/// Lowercase, non-alphanumerics to spaces, collapsed and truncated.
pub fn clean_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(TITLE_COMPARE_CHARS)
        .collect()
}

pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&clean_title(a), &clean_title(b))
}

pub fn is_duplicate(a: &Article, b: &Article, threshold: f64) -> bool {
    if a.link == b.link {
        return true;
    }
    if a.identity_title() == b.identity_title() {
        return true;
    }
    title_similarity(&a.title, &b.title) >= threshold
}

/// `true` when `challenger` should replace `incumbent`.
pub fn is_better(challenger: &Article, incumbent: &Article) -> bool {
    let (c_len, i_len) = (
        challenger.description.chars().count(),
        incumbent.description.chars().count(),
    );
    if c_len > 0 && i_len == 0 {
        return true;
    }
    if c_len == 0 && i_len > 0 {
        return false;
    }
    if c_len as f64 > i_len as f64 * LONGER_DESCRIPTION_FACTOR {
        return true;
    }
    if i_len as f64 > c_len as f64 * LONGER_DESCRIPTION_FACTOR {
        return false;
    }
    match (challenger.published, incumbent.published) {
        (Some(c), Some(i)) => c > i,
        (Some(_), None) => true,
        _ => false,
    }
}

fn dedupe_pass(articles: Vec<Article>, threshold: f64) -> Vec<Article> {
    let mut kept: Vec<Article> = Vec::with_capacity(articles.len());
    for a in articles {
        match kept.iter().position(|k| is_duplicate(k, &a, threshold)) {
            Some(idx) => {
                if is_better(&a, &kept[idx]) {
                    kept[idx] = a;
                }
            }
            None => kept.push(a),
        }
    }
    kept
}

/// Remove near-duplicates. Idempotent: passes repeat until nothing changes,
/// so a replacement that creates a new duplicate pair is also collapsed.
pub fn dedupe(articles: Vec<Article>, threshold: f64) -> Vec<Article> {
    let before = articles.len();
    let mut current = articles;
    loop {
        let len = current.len();
        current = dedupe_pass(current, threshold);
        if current.len() == len {
            break;
        }
    }
    let removed = before - current.len();
    if removed > 0 {
        counter!("relevance_filtered_total", "stage" => "duplicate").increment(removed as u64);
        debug!(target: "relevance", before, after = current.len(), "deduplicated");
    }
    current
}

/// Flatten per-source results (source order, then upstream order) and dedupe.
pub fn aggregate(per_source: Vec<Vec<Article>>, threshold: f64) -> Vec<Article> {
    let flat: Vec<Article> = per_source.into_iter().flatten().collect();
    dedupe(flat, threshold)
}

/* ----------------------------
Sorting
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Newest first; undated last.
    Date,
    /// Highest first; unscored counts as 0.
    Score,
    /// Source id ascending.
    Source,
}

pub trait Sortable {
    fn published(&self) -> Option<DateTime<Utc>>;
    fn score(&self) -> Option<f32>;
    fn source(&self) -> &str;
}

impl Sortable for Article {
    fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }
    fn score(&self) -> Option<f32> {
        None
    }
    fn source(&self) -> &str {
        &self.source
    }
}

impl Sortable for ScoredArticle {
    fn published(&self) -> Option<DateTime<Utc>> {
        self.article.published
    }
    fn score(&self) -> Option<f32> {
        Some(self.relevance.score)
    }
    fn source(&self) -> &str {
        &self.article.source
    }
}

/// Stable sort in place.
pub fn sort<T: Sortable>(items: &mut [T], by: SortBy) {
    match by {
        SortBy::Date => items.sort_by(|a, b| match (a.published(), b.published()) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
        SortBy::Score => items.sort_by(|a, b| {
            b.score()
                .unwrap_or(0.0)
                .total_cmp(&a.score().unwrap_or(0.0))
        }),
        SortBy::Source => items.sort_by(|a, b| a.source().cmp(b.source())),
    }
}
