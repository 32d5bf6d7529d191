// src/ingest/providers/search.rs
//! Query-search adapter: fills a `{query}` URL template with keyword groups
//! (e.g. a news search endpoint returning RSS) and concatenates the results.

use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use std::sync::Arc;
use tracing::warn;

use crate::article::Article;
use crate::error::FetchError;
use crate::ingest::providers::feed::parse_feed;
use crate::ingest::transport::HttpTransport;
use crate::ingest::{clean_keywords, AdapterKind, SourceAdapter, SourceMeta};

pub const QUERY_PLACEHOLDER: &str = "{query}";

pub struct QuerySearchAdapter {
    meta: SourceMeta,
    url_template: String,
    keywords_per_query: usize,
    transport: Arc<dyn HttpTransport>,
}

impl QuerySearchAdapter {
    pub fn new(
        meta: SourceMeta,
        url_template: String,
        keywords_per_query: usize,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            meta,
            url_template,
            keywords_per_query: keywords_per_query.max(1),
            transport,
        }
    }

    /// One query string per keyword group, terms joined with ` OR `.
    pub fn queries(&self, keywords: &[String]) -> Vec<String> {
        clean_keywords(keywords)
            .chunks(self.keywords_per_query)
            .map(|group| {
                group
                    .iter()
                    .map(|k| {
                        if k.contains(' ') {
                            format!("\"{k}\"")
                        } else {
                            k.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" OR ")
            })
            .collect()
    }

    pub fn query_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.url_template.replace(QUERY_PLACEHOLDER, &encoded)
    }
}

#[async_trait]
impl SourceAdapter for QuerySearchAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::QuerySearch
    }

    fn validate(&self) -> Result<(), FetchError> {
        if !self.url_template.contains(QUERY_PLACEHOLDER) {
            return Err(FetchError::Misconfigured(format!(
                "url_template lacks `{QUERY_PLACEHOLDER}`"
            )));
        }
        let probe = self.url_template.replace(QUERY_PLACEHOLDER, "probe");
        url::Url::parse(&probe)
            .map(|_| ())
            .map_err(|e| FetchError::Misconfigured(format!("invalid url_template: {e}")))
    }

    fn request_params(&self, keywords: &[String]) -> Vec<String> {
        let mut params = vec![self.url_template.clone()];
        params.extend(self.queries(keywords));
        params
    }

    async fn fetch(&self, keywords: &[String]) -> Result<Vec<Article>, FetchError> {
        let queries = self.queries(keywords);
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let calls = queries.iter().map(|q| {
            let url = self.query_url(q);
            async move {
                let body = self.transport.get_text(&url, &[]).await?;
                parse_feed(&body, &self.meta.id)
            }
        });
        let results = join_all(calls).await;

        let mut out = Vec::new();
        let mut last_err = None;
        let mut ok_count = 0usize;
        for (query, res) in queries.iter().zip(results) {
            match res {
                Ok(mut items) => {
                    ok_count += 1;
                    out.append(&mut items);
                }
                Err(e) => {
                    warn!(target: "ingest", source = %self.meta.id, query = %query, error = %e, "search query failed");
                    last_err = Some(e);
                }
            }
        }

        // Partial success is still success; only a total wipe-out is a failure.
        if ok_count == 0 {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        counter!("ingest_articles_total", "source" => self.meta.id.clone())
            .increment(out.len() as u64);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        urls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl HttpTransport for Recorder {
        async fn get_text(&self, url: &str, _h: &[(&str, &str)]) -> Result<String, FetchError> {
            self.urls.lock().unwrap().push(url.to_string());
            if let Some(bad) = self.fail_on {
                if url.contains(bad) {
                    return Err(FetchError::Status { code: 503 });
                }
            }
            Ok(format!(
                r#"<rss><channel><item><title>Result for {url}</title><link>{url}</link></item></channel></rss>"#,
                url = url.replace('&', "&amp;")
            ))
        }
    }

    fn meta() -> SourceMeta {
        SourceMeta {
            id: "search".into(),
            name: "Search".into(),
            priority: 1,
            enabled: true,
        }
    }

    fn adapter(t: Arc<Recorder>) -> QuerySearchAdapter {
        QuerySearchAdapter::new(meta(), "https://search.test/rss?q={query}&hl=en".into(), 2, t)
    }

    #[test]
    fn groups_keywords_and_quotes_phrases() {
        let t = Arc::new(Recorder {
            urls: Mutex::new(vec![]),
            fail_on: None,
        });
        let a = adapter(t);
        let q = a.queries(&["ai".into(), "machine learning".into(), "robotics".into()]);
        assert_eq!(q, vec!["ai OR \"machine learning\"".to_string(), "robotics".to_string()]);
        assert_eq!(
            a.query_url("ai OR robotics"),
            "https://search.test/rss?q=ai+OR+robotics&hl=en"
        );
    }

    #[test]
    fn validate_requires_placeholder() {
        let t = Arc::new(Recorder {
            urls: Mutex::new(vec![]),
            fail_on: None,
        });
        let a = QuerySearchAdapter::new(meta(), "https://search.test/rss".into(), 2, t);
        assert!(matches!(a.validate(), Err(FetchError::Misconfigured(_))));
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_queries() {
        let t = Arc::new(Recorder {
            urls: Mutex::new(vec![]),
            fail_on: Some("robotics"),
        });
        let a = adapter(t.clone());
        let out = a
            .fetch(&["ai".into(), "cloud".into(), "robotics".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(t.urls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn total_failure_is_an_error() {
        let t = Arc::new(Recorder {
            urls: Mutex::new(vec![]),
            fail_on: Some("search.test"),
        });
        let a = adapter(t);
        let err = a.fetch(&["ai".into()]).await.unwrap_err();
        assert_eq!(err, FetchError::Status { code: 503 });
    }
}
