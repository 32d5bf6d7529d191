// src/relevance/timeliness.rs
//! Exponential recency decay: `max(floor, e^(-λ·hours))`.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct TimelinessScorer {
    /// λ, per hour.
    pub decay_per_hour: f64,
    pub floor: f64,
    /// Score for undated articles.
    pub neutral: f64,
}

impl TimelinessScorer {
    pub fn new(decay_per_hour: f64, floor: f64, neutral: f64) -> Self {
        Self {
            decay_per_hour: decay_per_hour.max(0.0),
            floor: floor.clamp(0.0, 1.0),
            neutral: neutral.clamp(0.0, 1.0),
        }
    }

    /// Score from an age in hours. Negative ages (clock skew) score 1.0.
    pub fn score_age(&self, hours: Option<f64>) -> f32 {
        let s = match hours {
            None => self.neutral,
            Some(h) if !h.is_finite() => self.neutral,
            Some(h) if h <= 0.0 => 1.0,
            Some(h) => (-self.decay_per_hour * h).exp().max(self.floor),
        };
        s.clamp(0.0, 1.0) as f32
    }

    pub fn score(&self, published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
        self.score_age(published.map(|p| (now - p).num_seconds() as f64 / 3600.0))
    }
}
