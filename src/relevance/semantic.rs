// src/relevance/semantic.rs
//! Optional semantic similarity, blended into the thematic dimension.
//!
//! The built-in `TopicVectorScorer` is lexical: cosine similarity between the
//! article's term-frequency vector and precomputed topic vectors. Raw cosine
//! is rescaled from `[low, high]` (default `[0.2, 0.9]`) onto `[0, 1]`.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::relevance::thematic::{singular, words};

/// Pluggable similarity scorer. Returns a value in `[0,1]`, or `None` when it
/// has nothing to say about `text`.
pub trait SemanticScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn similarity(&self, text: &str) -> Option<f32>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticConfig {
    /// Share of the thematic dimension taken by the semantic score.
    #[serde(default = "default_blend")]
    pub blend: f32,
    /// Topic name → representative terms.
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_low")]
    pub low: f32,
    #[serde(default = "default_high")]
    pub high: f32,
}

fn default_blend() -> f32 {
    0.3
}
fn default_low() -> f32 {
    0.2
}
fn default_high() -> f32 {
    0.9
}

type Vector = HashMap<String, f32>;

fn term_vector(text: &str) -> Vector {
    let mut v = Vector::new();
    for w in words(text) {
        if w.chars().count() < 3 {
            continue;
        }
        *v.entry(singular(&w)).or_insert(0.0) += 1.0;
    }
    v
}

fn norm(v: &Vector) -> f32 {
    v.values().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &Vector, b: &Vector, b_norm: f32) -> f32 {
    let a_norm = norm(a);
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small
        .iter()
        .filter_map(|(k, x)| large.get(k).map(|y| x * y))
        .sum();
    dot / (a_norm * b_norm)
}

#[derive(Debug, Clone)]
pub struct TopicVectorScorer {
    topics: Vec<(String, Vector, f32)>,
    low: f32,
    high: f32,
}

impl TopicVectorScorer {
    pub fn new(cfg: &SemanticConfig) -> Self {
        let topics = cfg
            .topics
            .iter()
            .map(|(name, terms)| {
                let v = term_vector(&terms.join(" "));
                let n = norm(&v);
                (name.clone(), v, n)
            })
            .filter(|(_, v, _)| !v.is_empty())
            .collect();
        let low = cfg.low.clamp(0.0, 1.0);
        Self {
            topics,
            low,
            high: cfg.high.clamp(low, 1.0),
        }
    }

    pub fn rescale(&self, raw: f32) -> f32 {
        let span = self.high - self.low;
        if span <= f32::EPSILON {
            return if raw >= self.high { 1.0 } else { 0.0 };
        }
        ((raw - self.low) / span).clamp(0.0, 1.0)
    }

    /// Best raw cosine and the topic it came from.
    pub fn best_topic(&self, text: &str) -> Option<(&str, f32)> {
        let tv = term_vector(text);
        self.topics
            .iter()
            .map(|(name, v, n)| (name.as_str(), cosine(&tv, v, *n)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl SemanticScorer for TopicVectorScorer {
    fn name(&self) -> &'static str {
        "topic_vector"
    }

    fn similarity(&self, text: &str) -> Option<f32> {
        self.best_topic(text).map(|(_, raw)| self.rescale(raw))
    }
}
