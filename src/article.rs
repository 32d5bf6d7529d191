// src/article.rs
//! Core entities flowing through the pipeline: the normalized `Article`, the
//! derived `Relevance` record and their pairing `ScoredArticle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A normalized article. Adapters build these once and nothing downstream
/// mutates them; scoring attaches a `Relevance` alongside instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    /// Canonical URL (see `ingest::normalize::canonical_link`).
    pub link: String,
    /// `None` when upstream omitted the date or it failed to parse.
    pub published: Option<DateTime<Utc>>,
    pub description: String,
    /// Id of the configured source that produced this article.
    pub source: String,
    pub image: Option<String>,
}

impl Article {
    /// Lowercased, whitespace-collapsed title. Together with the link this is
    /// the identity key used for exact duplicate detection.
    pub fn identity_title(&self) -> String {
        self.title
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Hours elapsed since publication, relative to `now`. Negative when the
    /// upstream clock is ahead of ours.
    pub fn age_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.published
            .map(|p| (now - p).num_seconds() as f64 / 3600.0)
    }

    /// Title + description, used by the lexical scorers.
    pub fn full_text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.description)
        }
    }
}

/// Per-dimension sub-scores, each in [0,1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Breakdown {
    pub thematic: f32,
    pub authority: f32,
    pub timeliness: f32,
    /// `None` when the innovation dimension is disabled.
    pub innovation: Option<f32>,
}

impl Breakdown {
    /// Sub-scores of the active dimensions, in a fixed order.
    pub fn values(&self) -> Vec<f32> {
        let mut v = vec![self.thematic, self.authority, self.timeliness];
        if let Some(i) = self.innovation {
            v.push(i);
        }
        v
    }

    pub fn as_map(&self) -> BTreeMap<&'static str, f32> {
        let mut m = BTreeMap::new();
        m.insert("thematic", self.thematic);
        m.insert("authority", self.authority);
        m.insert("timeliness", self.timeliness);
        if let Some(i) = self.innovation {
            m.insert("innovation", i);
        }
        m
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelevanceMetadata {
    /// `1 - variance(sub-scores)`, clamped to [0,1].
    pub confidence: f32,
    pub reasoning: String,
    pub source: String,
    /// Hours since publication; `None` for undated articles.
    pub age: Option<f64>,
}

/// Result of one scoring pass over one article. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relevance {
    pub score: f32,
    pub breakdown: Breakdown,
    pub metadata: RelevanceMetadata,
}

/// The shape handed to the delivery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredArticle {
    #[serde(flatten)]
    pub article: Article,
    pub relevance: Relevance,
}

impl ScoredArticle {
    pub fn score(&self) -> f32 {
        self.relevance.score
    }

    pub fn source(&self) -> &str {
        &self.article.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn article() -> Article {
        Article {
            title: "  Rust   Ships  New Compiler ".into(),
            link: "https://example.com/a".into(),
            published: None,
            description: String::new(),
            source: "example".into(),
            image: None,
        }
    }

    #[test]
    fn identity_title_is_lowercase_and_collapsed() {
        assert_eq!(article().identity_title(), "rust ships new compiler");
    }

    #[test]
    fn age_is_none_without_date_and_negative_for_future() {
        let now = Utc::now();
        let mut a = article();
        assert!(a.age_hours(now).is_none());
        a.published = Some(now + Duration::hours(2));
        assert!(a.age_hours(now).unwrap() < 0.0);
    }

    #[test]
    fn breakdown_values_skip_disabled_innovation() {
        let b = Breakdown {
            thematic: 0.1,
            authority: 0.2,
            timeliness: 0.3,
            innovation: None,
        };
        assert_eq!(b.values().len(), 3);
        assert!(!b.as_map().contains_key("innovation"));
    }
}
