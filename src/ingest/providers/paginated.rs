// src/ingest/providers/paginated.rs
//! Paginated JSON API adapter (NewsAPI-style `everything` endpoint):
//! `X-Api-Key` auth, `page`/`pageSize` paging, `{status, totalResults, articles}` body.

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::article::Article;
use crate::error::FetchError;
use crate::ingest::transport::HttpTransport;
use crate::ingest::{clean_keywords, AdapterKind, RawItem, SourceAdapter, SourceMeta};

pub const MAX_PAGE_SIZE: u32 = 100;
const REMOVED_MARKER: &str = "[Removed]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    total_results: Option<u64>,
    #[serde(default)]
    articles: Vec<ApiArticle>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

impl ApiArticle {
    fn is_removed(&self) -> bool {
        self.title.as_deref().map(str::trim) == Some(REMOVED_MARKER)
    }

    fn into_raw(self) -> RawItem {
        RawItem {
            title: self.title,
            link: self.url,
            published: self.published_at,
            description: self.description,
            image: self.url_to_image,
        }
    }
}

/// Map an API-level error body onto the fetch taxonomy.
fn api_error(code: Option<&str>, message: Option<&str>) -> FetchError {
    let code = code.unwrap_or("unknown");
    let msg = message.unwrap_or_default();
    if code.starts_with("apiKey") {
        FetchError::Misconfigured(format!("{code}: {msg}"))
    } else if code == "rateLimited" {
        FetchError::Status { code: 429 }
    } else {
        FetchError::Malformed(format!("api error {code}: {msg}"))
    }
}

/// One parsed page. `upstream_len` counts every entry the API returned,
/// including the ones dropped during normalization.
#[derive(Debug)]
struct Page {
    articles: Vec<Article>,
    upstream_len: usize,
    total: Option<u64>,
}

fn parse_page(body: &str, source_id: &str) -> Result<Page, FetchError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(format!("json: {e}")))?;
    if resp.status != "ok" {
        return Err(api_error(resp.code.as_deref(), resp.message.as_deref()));
    }
    let upstream_len = resp.articles.len();
    let articles = resp
        .articles
        .into_iter()
        .filter(|a| !a.is_removed())
        .filter_map(|a| a.into_raw().into_article(source_id))
        .collect();
    Ok(Page {
        articles,
        upstream_len,
        total: resp.total_results,
    })
}

pub struct PaginatedApiAdapter {
    meta: SourceMeta,
    endpoint: String,
    api_key: String,
    page_size: u32,
    max_pages: u32,
    language: Option<String>,
    transport: Arc<dyn HttpTransport>,
}

impl PaginatedApiAdapter {
    pub fn new(
        meta: SourceMeta,
        endpoint: String,
        api_key: String,
        page_size: u32,
        max_pages: u32,
        language: Option<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            meta,
            endpoint,
            api_key,
            page_size,
            max_pages: max_pages.max(1),
            language,
            transport,
        }
    }

    fn query(keywords: &[String]) -> String {
        clean_keywords(keywords).join(" OR ")
    }

    pub fn page_url(&self, query: &str, page: u32) -> Result<String, FetchError> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| FetchError::Misconfigured(format!("invalid endpoint: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("q", query);
            q.append_pair("pageSize", &self.page_size.to_string());
            q.append_pair("page", &page.to_string());
            q.append_pair("sortBy", "publishedAt");
            if let Some(lang) = self.language.as_deref().filter(|l| !l.is_empty()) {
                q.append_pair("language", lang);
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl SourceAdapter for PaginatedApiAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::PaginatedApi
    }

    fn validate(&self) -> Result<(), FetchError> {
        let key = self.api_key.trim();
        if key.is_empty() || key.contains("${") {
            return Err(FetchError::Misconfigured("api_key is not set".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(FetchError::Misconfigured(format!(
                "page_size must be within 1..={MAX_PAGE_SIZE} (got {})",
                self.page_size
            )));
        }
        url::Url::parse(&self.endpoint)
            .map(|_| ())
            .map_err(|e| FetchError::Misconfigured(format!("invalid endpoint: {e}")))
    }

    fn request_params(&self, keywords: &[String]) -> Vec<String> {
        vec![
            self.endpoint.clone(),
            Self::query(keywords),
            format!("lang={}", self.language.as_deref().unwrap_or_default()),
        ]
    }

    async fn fetch(&self, keywords: &[String]) -> Result<Vec<Article>, FetchError> {
        let query = Self::query(keywords);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let headers = [("X-Api-Key", self.api_key.as_str())];

        let mut out: Vec<Article> = Vec::new();
        for page in 1..=self.max_pages {
            let url = self.page_url(&query, page)?;
            let fetched = match self.transport.get_text(&url, &headers).await {
                Ok(body) => parse_page(&body, &self.meta.id),
                Err(e) => Err(e),
            };
            let Page {
                articles: mut items,
                upstream_len,
                total,
            } = match fetched {
                Ok(v) => v,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    // Later pages are best-effort; keep what we already have.
                    warn!(target: "ingest", source = %self.meta.id, page, error = %e, "page fetch failed; returning partial result");
                    break;
                }
            };

            let got = items.len();
            out.append(&mut items);
            debug!(target: "ingest", source = %self.meta.id, page, got, "page fetched");

            // Paging follows what upstream sent, not what survived normalization.
            let short_page = (upstream_len as u32) < self.page_size;
            let exhausted = total.is_some_and(|t| (page as u64) * (self.page_size as u64) >= t);
            if short_page || exhausted {
                break;
            }
        }

        counter!("ingest_articles_total", "source" => self.meta.id.clone())
            .increment(out.len() as u64);
        Ok(out)
    }
}
