// src/relevance/authority.rs
//! # Authority
//!
//! Maps an article's link domain to a trust weight in `[0.0, 1.0]`.
//!
//! Lookup order:
//! 1. Alias (e.g. `news.google.com` → `google.com`) → weight.
//! 2. Exact domain match.
//! 3. Parent-domain match (`tech.reuters.com` → `reuters.com`).
//! 4. The configured authority of the producing source, if any.
//! 5. Default (low, 0.4).

use serde::Deserialize;
use std::collections::HashMap;

use crate::article::Article;
use crate::ingest::normalize::link_domain;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Weight for domains nobody configured.
    #[serde(default = "default_authority")]
    pub default: f32,
    #[serde(default)]
    pub domains: HashMap<String, f32>,
    /// Alternative domain → canonical domain.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_authority() -> f32 {
    0.4
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            default: default_authority(),
            domains: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

fn normalize_domain(d: &str) -> String {
    let d = d.trim().trim_end_matches('.').to_ascii_lowercase();
    d.strip_prefix("www.").unwrap_or(&d).to_string()
}

#[derive(Debug, Clone)]
pub struct AuthorityScorer {
    default: f32,
    domains: HashMap<String, f32>,
    aliases: HashMap<String, String>,
    per_source: HashMap<String, f32>,
}

impl AuthorityScorer {
    /// `per_source` carries source-level overrides keyed by source id.
    pub fn new(cfg: &AuthorityConfig, per_source: HashMap<String, f32>) -> Self {
        Self {
            default: clamp01(cfg.default),
            domains: cfg
                .domains
                .iter()
                .map(|(k, v)| (normalize_domain(k), clamp01(*v)))
                .collect(),
            aliases: cfg
                .aliases
                .iter()
                .map(|(k, v)| (normalize_domain(k), normalize_domain(v)))
                .collect(),
            per_source,
        }
    }

    /// Weight for a bare domain, or `None` if nothing in the map covers it.
    pub fn domain_weight(&self, domain: &str) -> Option<f32> {
        let d = normalize_domain(domain);

        if let Some(canon) = self.aliases.get(&d) {
            if let Some(&w) = self.domains.get(canon) {
                return Some(w);
            }
        }
        if let Some(&w) = self.domains.get(&d) {
            return Some(w);
        }
        // Walk up the labels: a.b.example.com → b.example.com → example.com
        let mut rest = d.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if !parent.contains('.') {
                break;
            }
            if let Some(&w) = self.domains.get(parent) {
                return Some(w);
            }
            rest = parent;
        }
        None
    }

    pub fn score(&self, article: &Article) -> f32 {
        link_domain(&article.link)
            .and_then(|d| self.domain_weight(&d))
            .or_else(|| self.per_source.get(&article.source).copied().map(clamp01))
            .unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> AuthorityScorer {
        let mut domains = HashMap::new();
        domains.insert("reuters.com".to_string(), 0.95);
        domains.insert("techcrunch.com".to_string(), 0.8);
        let mut aliases = HashMap::new();
        aliases.insert("feeds.reuters.net".to_string(), "reuters.com".to_string());
        let cfg = AuthorityConfig {
            default: 0.4,
            domains,
            aliases,
        };
        let mut per_source = HashMap::new();
        per_source.insert("curated".to_string(), 0.7);
        AuthorityScorer::new(&cfg, per_source)
    }

    fn article(link: &str, source: &str) -> Article {
        Article {
            title: "t".into(),
            link: link.into(),
            published: None,
            description: String::new(),
            source: source.into(),
            image: None,
        }
    }

    #[test]
    fn exact_parent_and_alias_lookups() {
        let s = scorer();
        assert_eq!(s.score(&article("https://www.reuters.com/x", "any")), 0.95);
        assert_eq!(s.score(&article("https://tech.eu.reuters.com/x", "any")), 0.95);
        assert_eq!(s.score(&article("https://feeds.reuters.net/x", "any")), 0.95);
    }

    #[test]
    fn falls_back_to_source_then_default() {
        let s = scorer();
        assert_eq!(s.score(&article("https://blog.unknown.io/x", "curated")), 0.7);
        assert_eq!(s.score(&article("https://blog.unknown.io/x", "other")), 0.4);
        assert_eq!(s.score(&article("not a link", "other")), 0.4);
    }
}
