// src/ingest/mod.rs
//! Source adapters: one concrete implementation per adapter kind, chosen by
//! `build_adapter` from the source's configured `kind`.

pub mod guarded;
pub mod normalize;
pub mod providers;
pub mod transport;

use async_trait::async_trait;
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::article::Article;
use crate::cache::CacheClass;
use crate::config::{AdapterSettings, SourceConfig};
use crate::error::FetchError;
use crate::ingest::providers::{
    feed::GenericFeedAdapter, paginated::PaginatedApiAdapter, search::QuerySearchAdapter,
};
use crate::ingest::transport::HttpTransport;

/// Closed set of adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    GenericFeed,
    QuerySearch,
    PaginatedApi,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::GenericFeed => "generic_feed",
            AdapterKind::QuerySearch => "query_search",
            AdapterKind::PaginatedApi => "paginated_api",
        }
    }

    /// TTL class used when caching this kind's results.
    pub fn cache_class(&self) -> CacheClass {
        match self {
            AdapterKind::GenericFeed => CacheClass::FeedResults,
            AdapterKind::QuerySearch => CacheClass::SearchResults,
            AdapterKind::PaginatedApi => CacheClass::ApiResults,
        }
    }
}

/// Identity shared by every adapter.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
}

impl SourceMeta {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            name: cfg.name.clone(),
            priority: cfg.priority,
            enabled: cfg.enabled,
        }
    }
}

/// Fetch/normalize contract implemented once per adapter kind.
///
/// `fetch` reports failures as `Err`; the guarded wrapper in `guarded` turns
/// them into breaker records and an empty contribution.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn meta(&self) -> &SourceMeta;

    fn kind(&self) -> AdapterKind;

    /// Required settings present and credentials resolved.
    fn validate(&self) -> Result<(), FetchError>;

    /// Request parameters that identify a fetch for caching purposes.
    fn request_params(&self, keywords: &[String]) -> Vec<String>;

    async fn fetch(&self, keywords: &[String]) -> Result<Vec<Article>, FetchError>;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn priority(&self) -> i32 {
        self.meta().priority
    }

    fn enabled(&self) -> bool {
        self.meta().enabled
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Build the adapter for `cfg.adapter`'s kind.
pub fn build_adapter(cfg: &SourceConfig, transport: Arc<dyn HttpTransport>) -> Box<dyn SourceAdapter> {
    let meta = SourceMeta::from_config(cfg);
    match &cfg.adapter {
        AdapterSettings::GenericFeed { url } => {
            Box::new(GenericFeedAdapter::new(meta, url.clone(), transport))
        }
        AdapterSettings::QuerySearch {
            url_template,
            keywords_per_query,
        } => Box::new(QuerySearchAdapter::new(
            meta,
            url_template.clone(),
            *keywords_per_query,
            transport,
        )),
        AdapterSettings::PaginatedApi {
            endpoint,
            api_key,
            page_size,
            max_pages,
            language,
        } => Box::new(PaginatedApiAdapter::new(
            meta,
            endpoint.clone(),
            api_key.clone(),
            *page_size,
            *max_pages,
            language.clone(),
            transport,
        )),
    }
}

/// Un-normalized fields as they come off the wire.
#[derive(Debug, Default, Clone)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

impl RawItem {
    /// Normalize into an `Article`. Items without a usable title or link are dropped.
    pub fn into_article(self, source_id: &str) -> Option<Article> {
        let title = normalize::clean_title(self.title.as_deref().unwrap_or_default());
        let link = normalize::canonical_link(self.link.as_deref().unwrap_or_default());
        if title.is_empty() || link.is_empty() {
            return None;
        }
        Some(Article {
            title,
            link,
            published: self.published.as_deref().and_then(normalize::parse_date),
            description: normalize::clean_description(self.description.as_deref().unwrap_or_default()),
            source: source_id.to_string(),
            image: self
                .image
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

/// Keep only non-empty, trimmed keywords, preserving order.
pub fn clean_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// One-time metrics registration for ingest series.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_articles_total", "Articles normalized per source.");
        describe_counter!("ingest_source_errors_total", "Source fetches that failed after retries.");
        describe_counter!("ingest_source_skipped_total", "Source fetches skipped (disabled, invalid, circuit open).");
        describe_histogram!("ingest_fetch_ms", "Per-source fetch time in milliseconds.");
    });
}
