// src/relevance/thematic.rs
//! Thematic relevance against a three-tier keyword vocabulary.
//!
//! Each keyword contributes `tier_weight × strength`, where strength is 1.0
//! for an exact, plural/singular, hyphenation or synonym match, the string
//! similarity for a close fuzzy match, and 0 otherwise. The sum is divided
//! by the maximum achievable for the configured vocabulary.

use serde::Deserialize;
use std::collections::HashMap;

pub const TIER1_WEIGHT: f64 = 2.0;
pub const TIER2_WEIGHT: f64 = 1.0;
pub const TIER3_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Deserialize)]
pub struct VocabularyConfig {
    #[serde(default)]
    pub tier1: Vec<String>,
    #[serde(default)]
    pub tier2: Vec<String>,
    #[serde(default)]
    pub tier3: Vec<String>,
    /// Keyword → alternative phrasings (including other languages).
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Shorter keywords only match exactly.
    #[serde(default = "default_min_fuzzy_len")]
    pub min_fuzzy_len: usize,
}

fn default_fuzzy_threshold() -> f64 {
    0.85
}
fn default_min_fuzzy_len() -> usize {
    5
}

impl VocabularyConfig {
    pub fn is_empty(&self) -> bool {
        [&self.tier1, &self.tier2, &self.tier3]
            .iter()
            .all(|t| t.iter().all(|k| k.trim().is_empty()))
    }

    /// Every configured keyword, tier order.
    pub fn all_keywords(&self) -> Vec<String> {
        self.tier1
            .iter()
            .chain(&self.tier2)
            .chain(&self.tier3)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Lowercase, hyphens and punctuation to spaces, then words.
pub fn words(s: &str) -> Vec<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Crude English singular form; enough for plural tolerance.
pub fn singular(w: &str) -> String {
    let n = w.chars().count();
    if n > 4 && w.ends_with("ies") {
        return format!("{}y", &w[..w.len() - 3]);
    }
    if n > 4 && w.ends_with("es") {
        let stem = &w[..w.len() - 2];
        if stem.ends_with('s') || stem.ends_with('x') || stem.ends_with("ch") || stem.ends_with("sh") {
            return stem.to_string();
        }
    }
    if n > 3 && w.ends_with('s') && !w.ends_with("ss") && !w.ends_with("us") {
        return w[..w.len() - 1].to_string();
    }
    w.to_string()
}

#[derive(Debug, Clone)]
struct Form {
    /// Singularized words.
    words: Vec<String>,
    /// Words joined with nothing (`e-commerce` == `ecommerce`).
    joined: String,
    /// Words joined with spaces, for fuzzy comparison.
    spaced: String,
}

impl Form {
    fn new(phrase: &str) -> Option<Self> {
        let words: Vec<String> = words(phrase).iter().map(|w| singular(w)).collect();
        if words.is_empty() {
            return None;
        }
        Some(Self {
            joined: words.concat(),
            spaced: words.join(" "),
            words,
        })
    }
}

#[derive(Debug, Clone)]
struct Keyword {
    label: String,
    weight: f64,
    forms: Vec<Form>,
}

/// Result of one thematic pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ThematicMatch {
    pub score: f32,
    /// Matched keywords, with strength, in vocabulary order.
    pub matched: Vec<(String, f32)>,
}

#[derive(Debug, Clone)]
pub struct ThematicScorer {
    keywords: Vec<Keyword>,
    max_score: f64,
    fuzzy_threshold: f64,
    min_fuzzy_len: usize,
}

impl ThematicScorer {
    pub fn new(cfg: &VocabularyConfig) -> Self {
        let synonyms: HashMap<String, &Vec<String>> = cfg
            .synonyms
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();

        let mut keywords = Vec::new();
        for (tier, weight) in [
            (&cfg.tier1, TIER1_WEIGHT),
            (&cfg.tier2, TIER2_WEIGHT),
            (&cfg.tier3, TIER3_WEIGHT),
        ] {
            for raw in tier {
                let label = raw.trim().to_string();
                let Some(primary) = Form::new(&label) else {
                    continue;
                };
                let mut forms = vec![primary];
                if let Some(alts) = synonyms.get(&label.to_lowercase()) {
                    forms.extend(alts.iter().filter_map(|s| Form::new(s)));
                }
                keywords.push(Keyword {
                    label,
                    weight,
                    forms,
                });
            }
        }
        let max_score = keywords.iter().map(|k| k.weight).sum();
        Self {
            keywords,
            max_score,
            fuzzy_threshold: cfg.fuzzy_threshold,
            min_fuzzy_len: cfg.min_fuzzy_len,
        }
    }

    /// Theoretical maximum (sum of tier weights over the vocabulary).
    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    fn exact(form: &Form, tokens: &[String]) -> bool {
        let n = form.words.len();
        if tokens.windows(n).any(|w| w == form.words.as_slice()) {
            return true;
        }
        // Hyphenation collapsed upstream ("e-commerce" vs "ecommerce"), either direction.
        if n > 1 && tokens.iter().any(|t| *t == form.joined) {
            return true;
        }
        (2..=3).any(|k| {
            tokens
                .windows(k)
                .any(|w| w.concat() == form.joined && k != n)
        })
    }

    fn fuzzy(&self, form: &Form, tokens: &[String]) -> f64 {
        if form.joined.chars().count() < self.min_fuzzy_len {
            return 0.0;
        }
        let n = form.words.len();
        tokens
            .windows(n)
            .map(|w| strsim::normalized_levenshtein(&w.join(" "), &form.spaced))
            .fold(0.0, f64::max)
    }

    fn strength(&self, kw: &Keyword, tokens: &[String]) -> f64 {
        if kw.forms.iter().any(|f| Self::exact(f, tokens)) {
            return 1.0;
        }
        let best = kw
            .forms
            .iter()
            .map(|f| self.fuzzy(f, tokens))
            .fold(0.0, f64::max);
        if best >= self.fuzzy_threshold {
            best
        } else {
            0.0
        }
    }

    pub fn score_text(&self, text: &str) -> ThematicMatch {
        if self.max_score <= 0.0 {
            return ThematicMatch {
                score: 0.0,
                matched: Vec::new(),
            };
        }
        let tokens: Vec<String> = words(text).iter().map(|w| singular(w)).collect();
        let mut total = 0.0;
        let mut matched = Vec::new();
        for kw in &self.keywords {
            let s = self.strength(kw, &tokens);
            if s > 0.0 {
                total += kw.weight * s;
                matched.push((kw.label.clone(), s as f32));
            }
        }
        ThematicMatch {
            score: (total / self.max_score).clamp(0.0, 1.0) as f32,
            matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(t1: &[&str], t2: &[&str], t3: &[&str]) -> VocabularyConfig {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        VocabularyConfig {
            tier1: v(t1),
            tier2: v(t2),
            tier3: v(t3),
            synonyms: HashMap::new(),
            fuzzy_threshold: 0.85,
            min_fuzzy_len: 5,
        }
    }

    #[test]
    fn two_tier1_hits_out_of_fifteen_keywords() {
        let s = ThematicScorer::new(&vocab(
            &["quantum", "robotics", "semiconductor", "biotech", "fusion"],
            &["startup", "venture", "acquisition", "patent", "prototype"],
            &["europe", "university", "laboratory", "conference", "regulator"],
        ));
        assert!((s.max_score() - 11.5).abs() < 1e-9);
        let m = s.score_text("Quantum computing meets robotics in a new joint effort");
        assert!((m.score - 4.0 / 11.5).abs() < 1e-3, "got {}", m.score);
        assert_eq!(m.matched.len(), 2);
    }

    #[test]
    fn plural_and_hyphenation_variants_match() {
        let s = ThematicScorer::new(&vocab(&["robot", "machine learning", "e-commerce"], &[], &[]));
        assert_eq!(s.score_text("Robots take over warehouses").matched.len(), 1);
        assert_eq!(s.score_text("New machine-learning toolkit").matched.len(), 1);
        assert_eq!(s.score_text("Ecommerce sales surge").matched.len(), 1);
    }

    #[test]
    fn synonyms_count_as_exact() {
        let mut v = vocab(&["artificial intelligence"], &[], &[]);
        v.synonyms.insert(
            "artificial intelligence".into(),
            vec!["künstliche Intelligenz".into(), "AI".into()],
        );
        let s = ThematicScorer::new(&v);
        assert_eq!(s.score_text("Neue künstliche Intelligenz aus Berlin").score, 1.0);
        assert_eq!(s.score_text("AI chips are scarce").score, 1.0);
    }

    #[test]
    fn fuzzy_match_gives_partial_credit() {
        let s = ThematicScorer::new(&vocab(&["semiconductor"], &[], &[]));
        let m = s.score_text("Semiconducter shortage eases");
        assert!(m.score > 0.85 && m.score < 1.0, "got {}", m.score);
        assert_eq!(s.score_text("Completely unrelated headline").score, 0.0);
    }
}
