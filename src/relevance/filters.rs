// src/relevance/filters.rs
//! Hard filters: pass/fail gates applied before scoring.
//!
//! - Spam: regex set on title + description, shouting titles, punctuation runs.
//! - Age: older than `max_age_hours` is removed. Missing or future dates pass.
//! - Quality: missing title/link, short or symbol-heavy titles, thin bodies.
//!
//! Near-duplicate removal is the fourth hard filter; it lives in `aggregate`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::article::Article;
use crate::error::ConfigError;
use crate::ingest::normalize::word_count;

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_spam_patterns")]
    pub spam_patterns: Vec<String>,
    /// Uppercase share of title letters above which a title is shouting.
    #[serde(default = "default_max_caps_ratio")]
    pub max_caps_ratio: f64,
    /// Titles with fewer letters are exempt from the caps check (acronyms).
    #[serde(default = "default_min_caps_letters")]
    pub min_caps_letters: usize,
    /// Maximum combined `!` and `?` in a title.
    #[serde(default = "default_max_punctuation")]
    pub max_punctuation: usize,
    #[serde(default = "default_min_title_chars")]
    pub min_title_chars: usize,
    #[serde(default = "default_min_alnum_density")]
    pub min_alnum_density: f64,
    /// Minimum words in a non-empty description.
    #[serde(default = "default_min_word_count")]
    pub min_word_count: usize,
    /// `None` disables the age filter.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: Option<f64>,
    /// Title similarity at or above which two articles are duplicates.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
}

fn default_spam_patterns() -> Vec<String> {
    [
        r"(?i)\byou won'?t believe\b",
        r"(?i)\bwhat happens next\b",
        r"(?i)\bone (weird|simple) trick\b",
        r"(?i)\bdoctors hate\b",
        r"(?i)\bshocking\b",
        r"(?i)\bclick here\b",
        r"(?i)\bmust[- ]see\b",
        r"(?i)\bjaw[- ]dropping\b",
        r"(?i)\bgone wrong\b",
        r"(?i)\b(free|cheap) (crypto|bitcoin|followers)\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_caps_ratio() -> f64 {
    0.5
}
fn default_min_caps_letters() -> usize {
    8
}
fn default_max_punctuation() -> usize {
    2
}
fn default_min_title_chars() -> usize {
    10
}
fn default_min_alnum_density() -> f64 {
    0.5
}
fn default_min_word_count() -> usize {
    5
}
fn default_max_age_hours() -> Option<f64> {
    Some(72.0)
}
fn default_duplicate_threshold() -> f64 {
    0.85
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            spam_patterns: default_spam_patterns(),
            max_caps_ratio: default_max_caps_ratio(),
            min_caps_letters: default_min_caps_letters(),
            max_punctuation: default_max_punctuation(),
            min_title_chars: default_min_title_chars(),
            min_alnum_density: default_min_alnum_density(),
            min_word_count: default_min_word_count(),
            max_age_hours: default_max_age_hours(),
            duplicate_threshold: default_duplicate_threshold(),
        }
    }
}

pub fn compile_spam_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::SpamPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Which hard filter removed an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStage {
    Spam,
    Age,
    Quality,
}

impl RejectStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectStage::Spam => "spam",
            RejectStage::Age => "age",
            RejectStage::Quality => "quality",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub stage: RejectStage,
    pub reason: String,
}

impl Rejection {
    fn new(stage: RejectStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HardFilters {
    cfg: FilterConfig,
    spam: Vec<Regex>,
}

impl HardFilters {
    pub fn new(cfg: FilterConfig) -> Result<Self, ConfigError> {
        let spam = compile_spam_patterns(&cfg.spam_patterns)?;
        Ok(Self { cfg, spam })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.cfg
    }

    /// Spam check. Independent of topic.
    pub fn spam(&self, a: &Article) -> Result<(), Rejection> {
        for re in &self.spam {
            if re.is_match(&a.title) || re.is_match(&a.description) {
                return Err(Rejection::new(
                    RejectStage::Spam,
                    format!("pattern {}", re.as_str()),
                ));
            }
        }

        let letters: Vec<char> = a.title.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() >= self.cfg.min_caps_letters {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            let ratio = upper as f64 / letters.len() as f64;
            if ratio > self.cfg.max_caps_ratio {
                return Err(Rejection::new(
                    RejectStage::Spam,
                    format!("caps ratio {ratio:.2}"),
                ));
            }
        }

        let punct = a.title.chars().filter(|c| matches!(c, '!' | '?')).count();
        if punct > self.cfg.max_punctuation {
            return Err(Rejection::new(
                RejectStage::Spam,
                format!("{punct} exclamation/question marks"),
            ));
        }
        Ok(())
    }

    /// Age check. Fail-open for missing and future dates.
    pub fn age(&self, a: &Article, now: DateTime<Utc>) -> Result<(), Rejection> {
        let (Some(max), Some(hours)) = (self.cfg.max_age_hours, a.age_hours(now)) else {
            return Ok(());
        };
        if hours > max {
            return Err(Rejection::new(
                RejectStage::Age,
                format!("{hours:.0}h old (max {max:.0}h)"),
            ));
        }
        Ok(())
    }

    pub fn quality(&self, a: &Article) -> Result<(), Rejection> {
        let title = a.title.trim();
        if title.is_empty() || a.link.trim().is_empty() {
            return Err(Rejection::new(RejectStage::Quality, "missing title or link"));
        }
        if title.chars().count() < self.cfg.min_title_chars {
            return Err(Rejection::new(RejectStage::Quality, "title too short"));
        }

        let visible: Vec<char> = title.chars().filter(|c| !c.is_whitespace()).collect();
        let alnum = visible.iter().filter(|c| c.is_alphanumeric()).count();
        let density = alnum as f64 / visible.len().max(1) as f64;
        if density < self.cfg.min_alnum_density {
            return Err(Rejection::new(
                RejectStage::Quality,
                format!("title alnum density {density:.2}"),
            ));
        }

        // An empty body is tolerated; a present but thin one is not.
        if !a.description.trim().is_empty() {
            let words = word_count(&a.description);
            if words < self.cfg.min_word_count {
                return Err(Rejection::new(
                    RejectStage::Quality,
                    format!("body has {words} words"),
                ));
            }
        }
        Ok(())
    }

    /// All per-article hard filters, spam first.
    pub fn check(&self, a: &Article, now: DateTime<Utc>) -> Result<(), Rejection> {
        self.spam(a)?;
        self.quality(a)?;
        self.age(a, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn article(title: &str, desc: &str) -> Article {
        Article {
            title: title.into(),
            link: "https://x.test/a".into(),
            published: None,
            description: desc.into(),
            source: "s".into(),
            image: None,
        }
    }

    fn filters() -> HardFilters {
        HardFilters::new(FilterConfig::default()).unwrap()
    }

    #[test]
    fn clickbait_title_is_spam() {
        let f = filters();
        let r = f.spam(&article("YOU WON'T BELIEVE THIS!!!", "")).unwrap_err();
        assert_eq!(r.stage, RejectStage::Spam);
    }

    #[test]
    fn shouting_and_punctuation_are_spam() {
        let f = filters();
        assert!(f.spam(&article("BREAKING NEWS ABOUT THE CHIP MARKET", "")).is_err());
        assert!(f.spam(&article("Is this real?! Really?", "")).is_err());
        // Short acronym-heavy titles are not shouting.
        assert!(f.spam(&article("NASA and ESA plan joint mission", "")).is_ok());
        assert!(f.spam(&article("Why did the startup pivot?", "")).is_ok());
    }

    #[test]
    fn age_filter_fails_open() {
        let f = filters();
        let now = Utc::now();
        let mut a = article("Robotics startup raises seed round", "");
        assert!(f.age(&a, now).is_ok());
        a.published = Some(now + Duration::hours(5));
        assert!(f.age(&a, now).is_ok());
        a.published = Some(now - Duration::hours(100));
        assert_eq!(f.age(&a, now).unwrap_err().stage, RejectStage::Age);
    }

    #[test]
    fn quality_gate() {
        let f = filters();
        assert!(f.quality(&article("Too short", "")).is_err());
        assert!(f.quality(&article("$$$ ### !!! *** ???", "")).is_err());
        assert!(f
            .quality(&article("A reasonable headline here", "just three words"))
            .is_err());
        assert!(f.quality(&article("A reasonable headline here", "")).is_ok());
        assert!(f
            .quality(&article(
                "A reasonable headline here",
                "<p>Five whole words of body</p>"
            ))
            .is_ok());
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let cfg = FilterConfig {
            spam_patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        assert!(matches!(
            HardFilters::new(cfg),
            Err(ConfigError::SpamPattern { .. })
        ));
    }
}
