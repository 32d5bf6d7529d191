// src/relevance/innovation.rs
//! Innovation/impact signal: rewards announcement, launch and funding
//! language, penalizes commentary and earnings chatter.
//!
//! `score = clamp(base + Σ min(hits·w, cap) − min(Σ penalty, penalty_cap), 0, 1)`

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct SignalFamily {
    pub name: String,
    pub terms: Vec<String>,
    /// Contribution per hit.
    pub weight: f64,
    /// Ceiling on this family's total contribution.
    pub cap: f64,
}

impl SignalFamily {
    fn new(name: &str, terms: &[&str], weight: f64, cap: f64) -> Self {
        Self {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            weight,
            cap,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InnovationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base")]
    pub base: f64,
    #[serde(default = "default_signals")]
    pub signals: Vec<SignalFamily>,
    #[serde(default = "default_penalties")]
    pub penalties: Vec<SignalFamily>,
    #[serde(default = "default_penalty_cap")]
    pub penalty_cap: f64,
}

fn default_enabled() -> bool {
    true
}
fn default_base() -> f64 {
    0.3
}
fn default_signals() -> Vec<SignalFamily> {
    vec![
        SignalFamily::new(
            "launch",
            &["launch", "launches", "launched", "unveils", "unveiled", "introduces", "debuts", "releases", "ships"],
            0.15,
            0.3,
        ),
        SignalFamily::new(
            "funding",
            &["raises", "raised", "funding", "seed round", "series a", "series b", "series c", "investment", "backed"],
            0.15,
            0.3,
        ),
        SignalFamily::new(
            "breakthrough",
            &["breakthrough", "first-ever", "world's first", "new method", "discovers", "patent", "prototype"],
            0.1,
            0.2,
        ),
        SignalFamily::new(
            "partnership",
            &["partners with", "partnership", "acquires", "acquisition", "collaboration"],
            0.1,
            0.2,
        ),
    ]
}
fn default_penalties() -> Vec<SignalFamily> {
    vec![
        SignalFamily::new(
            "commentary",
            &["opinion", "op-ed", "column", "editorial", "podcast", "recap", "review"],
            0.1,
            0.2,
        ),
        SignalFamily::new(
            "earnings",
            &["earnings", "quarterly results", "eps", "guidance", "dividend", "stock price", "shares fell", "shares rose"],
            0.1,
            0.2,
        ),
    ]
}
fn default_penalty_cap() -> f64 {
    0.3
}

impl Default for InnovationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base: default_base(),
            signals: default_signals(),
            penalties: default_penalties(),
            penalty_cap: default_penalty_cap(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledFamily {
    name: String,
    re: Regex,
    weight: f64,
    cap: f64,
}

impl CompiledFamily {
    fn compile(f: &SignalFamily) -> Result<Option<Self>, ConfigError> {
        let alts: Vec<String> = f
            .terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();
        if alts.is_empty() {
            return Ok(None);
        }
        let pattern = format!(r"(?i)\b(?:{})\b", alts.join("|"));
        let re = Regex::new(&pattern).map_err(|e| ConfigError::SignalPattern {
            family: f.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(Self {
            name: f.name.clone(),
            re,
            weight: f.weight.max(0.0),
            cap: f.cap.max(0.0),
        }))
    }

    fn contribution(&self, text: &str) -> f64 {
        let hits = self.re.find_iter(text).count() as f64;
        (hits * self.weight).min(self.cap)
    }
}

/// Score plus the families that fired, for the reasoning string.
#[derive(Debug, Clone, PartialEq)]
pub struct InnovationSignal {
    pub score: f32,
    pub boosts: Vec<String>,
    pub penalties: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InnovationScorer {
    base: f64,
    signals: Vec<CompiledFamily>,
    penalties: Vec<CompiledFamily>,
    penalty_cap: f64,
}

impl InnovationScorer {
    pub fn new(cfg: &InnovationConfig) -> Result<Self, ConfigError> {
        let compile = |fams: &[SignalFamily]| -> Result<Vec<CompiledFamily>, ConfigError> {
            Ok(fams
                .iter()
                .map(CompiledFamily::compile)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect())
        };
        Ok(Self {
            base: cfg.base.clamp(0.0, 1.0),
            signals: compile(&cfg.signals)?,
            penalties: compile(&cfg.penalties)?,
            penalty_cap: cfg.penalty_cap.max(0.0),
        })
    }

    pub fn score_text(&self, text: &str) -> InnovationSignal {
        let mut boosts = Vec::new();
        let mut bonus = 0.0;
        for f in &self.signals {
            let c = f.contribution(text);
            if c > 0.0 {
                bonus += c;
                boosts.push(f.name.clone());
            }
        }
        let mut penalties = Vec::new();
        let mut penalty = 0.0;
        for f in &self.penalties {
            let c = f.contribution(text);
            if c > 0.0 {
                penalty += c;
                penalties.push(f.name.clone());
            }
        }
        let score = (self.base + bonus - penalty.min(self.penalty_cap)).clamp(0.0, 1.0);
        InnovationSignal {
            score: score as f32,
            boosts,
            penalties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> InnovationScorer {
        InnovationScorer::new(&InnovationConfig::default()).unwrap()
    }

    #[test]
    fn neutral_text_scores_base() {
        assert!((scorer().score_text("A calm day in the city").score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn launch_and_funding_raise_the_score() {
        let s = scorer().score_text("Startup launches chip, raises $20M in Series A funding");
        assert!(s.score > 0.6, "got {}", s.score);
        assert_eq!(s.boosts, vec!["launch".to_string(), "funding".to_string()]);
    }

    #[test]
    fn one_family_cannot_dominate() {
        let s = scorer().score_text("launch launch launch launch launch launch launch launch");
        assert!((s.score - 0.6).abs() < 1e-6, "got {}", s.score);
    }

    #[test]
    fn penalties_are_capped_and_floored_at_zero() {
        let s = scorer().score_text(
            "Opinion column: earnings recap, EPS guidance and dividend review podcast editorial",
        );
        assert!((s.score - 0.0).abs() < 1e-6, "got {}", s.score);
        assert_eq!(s.penalties.len(), 2);
    }
}
