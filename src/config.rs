// src/config.rs
//! Typed configuration loaded from one TOML file.
//!
//! Lookup order for the file: `$CURATOR_CONFIG_PATH`, then `config/curator.toml`.
//! `${VAR}` placeholders inside adapter settings are resolved against the
//! environment; a source with an unresolved placeholder is disabled for the
//! run instead of being sent a literal template string.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::breaker::BreakerConfig;
use crate::cache::CacheConfig;
use crate::diversify::DiversifyConfig;
use crate::error::ConfigError;
use crate::ingest::AdapterKind;
use crate::relevance::authority::AuthorityConfig;
use crate::relevance::filters::{compile_spam_patterns, FilterConfig};
use crate::relevance::innovation::InnovationConfig;
use crate::relevance::semantic::SemanticConfig;
use crate::relevance::thematic::VocabularyConfig;
use crate::relevance::ScoringConfig;
use crate::retry::RetryConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/curator.toml";
pub const ENV_CONFIG_PATH: &str = "CURATOR_CONFIG_PATH";
pub const ENV_MIN_SCORE: &str = "CURATOR_MIN_SCORE";

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f32 = 0.01;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/* ----------------------------
Schema
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct CuratorConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub scoring: ScoringConfig,
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub innovation: InnovationConfig,
    #[serde(default)]
    pub semantic: Option<SemanticConfig>,
    #[serde(default)]
    pub diversify: DiversifyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    /// Overrides the domain-map authority for every article of this source.
    #[serde(default)]
    pub authority: Option<f32>,
    pub adapter: AdapterSettings,
}

/// Adapter-specific settings, tagged by `kind`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSettings {
    GenericFeed {
        url: String,
    },
    QuerySearch {
        /// URL with a `{query}` placeholder.
        url_template: String,
        #[serde(default = "default_keywords_per_query")]
        keywords_per_query: usize,
    },
    PaginatedApi {
        endpoint: String,
        api_key: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
        #[serde(default)]
        language: Option<String>,
    },
}

impl AdapterSettings {
    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterSettings::GenericFeed { .. } => AdapterKind::GenericFeed,
            AdapterSettings::QuerySearch { .. } => AdapterKind::QuerySearch,
            AdapterSettings::PaginatedApi { .. } => AdapterKind::PaginatedApi,
        }
    }

    fn string_fields_mut(&mut self) -> Vec<&mut String> {
        match self {
            AdapterSettings::GenericFeed { url } => vec![url],
            AdapterSettings::QuerySearch { url_template, .. } => vec![url_template],
            AdapterSettings::PaginatedApi {
                endpoint,
                api_key,
                language,
                ..
            } => {
                let mut v = vec![endpoint, api_key];
                if let Some(l) = language.as_mut() {
                    v.push(l);
                }
                v
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}
fn default_keywords_per_query() -> usize {
    3
}
fn default_page_size() -> u32 {
    20
}
fn default_max_pages() -> u32 {
    2
}
fn default_user_agent() -> String {
    concat!("newswire-curator/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_http_timeout_secs() -> u64 {
    10
}

/* ----------------------------
Placeholder resolution
---------------------------- */

/// A source disabled because some `${VAR}` had no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedSource {
    pub source_id: String,
    pub missing: Vec<String>,
}

/// Substitute `${VAR}` occurrences using `lookup`. Returns the rendered
/// string and the names that did not resolve (rendered as empty).
pub fn substitute_placeholders<F>(raw: &str, lookup: &F) -> (String, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let out = RE_PLACEHOLDER.replace_all(raw, |caps: &regex::Captures| {
        let name = &caps[1];
        match lookup(name).filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });
    (out.into_owned(), missing)
}

/// Resolve every adapter placeholder in place. Sources with missing values
/// are disabled and reported; nothing is logged here.
pub fn resolve_placeholders<F>(sources: &mut [SourceConfig], lookup: F) -> Vec<UnresolvedSource>
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved = Vec::new();
    for src in sources.iter_mut() {
        let mut missing = Vec::new();
        for field in src.adapter.string_fields_mut() {
            let (rendered, mut miss) = substitute_placeholders(field, &lookup);
            *field = rendered;
            missing.append(&mut miss);
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            src.enabled = false;
            unresolved.push(UnresolvedSource {
                source_id: src.id.clone(),
                missing,
            });
        }
    }
    unresolved
}

/* ----------------------------
Parsing, validation, loading
---------------------------- */

// parse optional float env and clamp to <0.0..=1.0>
fn parse_min_score_env(raw: Option<String>) -> Option<f32> {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            range: "[0,1]",
            value,
        })
    }
}

impl CuratorConfig {
    /// Parse only; call `validate` before use.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Consistency checks that must hold before the engine is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // weights
        let w = &self.scoring.weights;
        let mut active = vec![
            ("thematic", w.thematic),
            ("authority", w.authority),
            ("timeliness", w.timeliness),
        ];
        if self.innovation.enabled {
            active.push(("innovation", w.innovation));
        }
        for &(name, value) in &active {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightRange { name, value });
            }
        }
        let sum: f32 = active.iter().map(|(_, v)| v).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsSum { sum });
        }

        check_unit("scoring.min_score", self.scoring.min_score as f64)?;
        check_unit("scoring.timeliness_floor", self.scoring.timeliness_floor)?;
        check_unit("scoring.timeliness_neutral", self.scoring.timeliness_neutral)?;
        if self.scoring.decay_per_hour < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "scoring.decay_per_hour",
                range: ">= 0",
                value: self.scoring.decay_per_hour,
            });
        }
        if self.scoring.max_items == 0 {
            return Err(ConfigError::OutOfRange {
                name: "scoring.max_items",
                range: ">= 1",
                value: 0.0,
            });
        }

        // vocabulary
        if self.vocabulary.is_empty() {
            return Err(ConfigError::EmptyVocabulary);
        }
        check_unit("vocabulary.fuzzy_threshold", self.vocabulary.fuzzy_threshold)?;

        // filters
        compile_spam_patterns(&self.filters.spam_patterns)?;
        check_unit("filters.max_caps_ratio", self.filters.max_caps_ratio)?;
        check_unit("filters.min_alnum_density", self.filters.min_alnum_density)?;
        check_unit("filters.duplicate_threshold", self.filters.duplicate_threshold)?;
        if let Some(h) = self.filters.max_age_hours {
            if h <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    name: "filters.max_age_hours",
                    range: "> 0",
                    value: h,
                });
            }
        }

        // authority
        check_unit("authority.default", self.authority.default as f64)?;
        for v in self.authority.domains.values() {
            check_unit("authority.domains", *v as f64)?;
        }

        // semantic
        if let Some(sem) = &self.semantic {
            check_unit("semantic.blend", sem.blend as f64)?;
        }

        // diversification
        if self.diversify.target == 0 {
            return Err(ConfigError::OutOfRange {
                name: "diversify.target",
                range: ">= 1",
                value: 0.0,
            });
        }
        if self.diversify.per_source_cap == 0 {
            return Err(ConfigError::OutOfRange {
                name: "diversify.per_source_cap",
                range: ">= 1",
                value: 0.0,
            });
        }

        // breaker
        if !(0.0..=100.0).contains(&self.breaker.failure_rate_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "breaker.failure_rate_threshold",
                range: "[0,100]",
                value: self.breaker.failure_rate_threshold as f64,
            });
        }
        if self.breaker.half_open_trials == 0 {
            return Err(ConfigError::OutOfRange {
                name: "breaker.half_open_trials",
                range: ">= 1",
                value: 0.0,
            });
        }

        // sources
        let mut seen = HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.id.as_str()) {
                return Err(ConfigError::DuplicateSource(s.id.clone()));
            }
            if let Some(a) = s.authority {
                check_unit("sources.authority", a as f64)?;
            }
        }
        Ok(())
    }

    /// Apply `CURATOR_MIN_SCORE` when it parses.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_min_score_env(std::env::var(ENV_MIN_SCORE).ok()) {
            info!(target: "pipeline", min_score = v, "min_score overridden from env");
            self.scoring.min_score = v;
        }
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Parse, resolve placeholders from the process env, apply env overrides and
/// validate. Unresolved placeholders are reported once per source.
pub fn load_from_str(s: &str) -> Result<CuratorConfig> {
    let mut cfg = CuratorConfig::from_toml_str(s)?;
    let unresolved = resolve_placeholders(&mut cfg.sources, |name| std::env::var(name).ok());
    for u in &unresolved {
        warn!(
            target: "pipeline",
            source = %u.source_id,
            missing = ?u.missing,
            "unresolved credential placeholder; source disabled for this run"
        );
    }
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> Result<CuratorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    load_from_str(&content).with_context(|| format!("loading config {}", path.display()))
}

/// Load using env var + fallback:
/// 1) $CURATOR_CONFIG_PATH
/// 2) config/curator.toml
pub fn load_default() -> Result<CuratorConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        return load_from_path(&pb);
    }
    load_from_path(Path::new(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) const MINIMAL: &str = r#"
[scoring]
min_score = 0.3
[scoring.weights]
thematic = 0.4
authority = 0.2
timeliness = 0.25
innovation = 0.15

[vocabulary]
tier1 = ["artificial intelligence", "robotics"]
tier2 = ["startup"]
tier3 = ["technology"]

[[sources]]
id = "feed"
name = "Feed"
adapter = { kind = "generic_feed", url = "https://feed.test/rss" }

[[sources]]
id = "api"
name = "API"
priority = 2
adapter = { kind = "paginated_api", endpoint = "https://api.test/v2/everything", api_key = "${TEST_NEWS_KEY}" }
"#;

    #[test]
    fn parses_tagged_adapters_with_defaults() {
        let cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.sources.len(), 2);
        assert!(cfg.sources[0].enabled);
        assert_eq!(cfg.sources[0].adapter.kind(), AdapterKind::GenericFeed);
        match &cfg.sources[1].adapter {
            AdapterSettings::PaginatedApi {
                page_size,
                max_pages,
                ..
            } => {
                assert_eq!(*page_size, 20);
                assert_eq!(*max_pages, 2);
            }
            other => panic!("unexpected adapter {other:?}"),
        }
        cfg.validate().unwrap();
    }

    #[test]
    fn missing_scoring_section_is_a_parse_error() {
        let err = CuratorConfig::from_toml_str("[vocabulary]\ntier1 = [\"ai\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        cfg.scoring.weights.thematic = 0.9;
        assert!(matches!(cfg.validate(), Err(ConfigError::WeightsSum { .. })));
    }

    #[test]
    fn disabled_innovation_drops_its_weight_from_the_sum() {
        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        cfg.innovation.enabled = false;
        assert!(cfg.validate().is_err());
        cfg.scoring.weights.thematic = 0.55;
        cfg.validate().unwrap();
    }

    #[test]
    fn duplicate_ids_and_bad_diversify_are_rejected() {
        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        cfg.sources[1].id = "feed".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateSource(_))));

        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        cfg.diversify.per_source_cap = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn zero_half_open_trials_is_rejected() {
        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        cfg.breaker.half_open_trials = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { name: "breaker.half_open_trials", .. })
        ));
    }

    #[test]
    fn placeholders_resolve_or_disable() {
        let env: HashMap<&str, &str> = [("TEST_NEWS_KEY", "secret")].into_iter().collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        let unresolved = resolve_placeholders(&mut cfg.sources, lookup);
        assert!(unresolved.is_empty());
        match &cfg.sources[1].adapter {
            AdapterSettings::PaginatedApi { api_key, .. } => assert_eq!(api_key, "secret"),
            _ => unreachable!(),
        }

        let mut cfg = CuratorConfig::from_toml_str(MINIMAL).unwrap();
        let unresolved = resolve_placeholders(&mut cfg.sources, |_| None);
        assert_eq!(
            unresolved,
            vec![UnresolvedSource {
                source_id: "api".into(),
                missing: vec!["TEST_NEWS_KEY".into()],
            }]
        );
        assert!(!cfg.sources[1].enabled);
        match &cfg.sources[1].adapter {
            AdapterSettings::PaginatedApi { api_key, .. } => assert!(!api_key.contains("${")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn min_score_env_is_clamped() {
        assert_eq!(parse_min_score_env(Some("0.7".into())), Some(0.7));
        assert_eq!(parse_min_score_env(Some("3".into())), Some(1.0));
        assert_eq!(parse_min_score_env(Some("nope".into())), None);
        assert_eq!(parse_min_score_env(None), None);
    }
}
