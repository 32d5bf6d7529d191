// tests/common/mod.rs
//
// Shared fixtures for integration tests: a scripted HTTP transport and
// small RSS builders. Nothing here touches the network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use newswire_curator::ingest::transport::HttpTransport;
use newswire_curator::FetchError;

/// Serves canned bodies (or errors) by URL prefix and counts calls.
#[derive(Default)]
pub struct StubTransport {
    routes: Mutex<Vec<(String, Result<String, FetchError>)>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, prefix: &str, body: impl Into<String>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Ok(body.into())));
        self
    }

    pub fn fail(self, prefix: &str, error: FetchError) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Err(error)));
        self
    }

    /// Calls whose URL starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get_text(&self, url: &str, _headers: &[(&str, &str)]) -> Result<String, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or(Err(FetchError::Status { code: 404 }))
    }
}

/// One feed item: title, link, hours before `now`, description.
pub struct Item<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub hours_ago: i64,
    pub description: &'a str,
}

pub fn item<'a>(title: &'a str, link: &'a str, hours_ago: i64) -> Item<'a> {
    Item {
        title,
        link,
        hours_ago,
        description: "",
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// RSS 2.0 document with pubDates relative to `now`.
pub fn rss(now: DateTime<Utc>, items: &[Item<'_>]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\"><channel><title>Fixture</title>\n",
    );
    for it in items {
        let published = (now - Duration::hours(it.hours_ago)).to_rfc2822();
        out.push_str(&format!(
            "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate><description>{}</description></item>\n",
            xml_escape(it.title),
            xml_escape(it.link),
            published,
            xml_escape(it.description),
        ));
    }
    out.push_str("</channel></rss>\n");
    out
}

/// Scoring and vocabulary sections shared by most test configs.
pub const SCORING: &str = r#"
[scoring]
min_score = 0.45
max_items = 30
[scoring.weights]
thematic = 0.4
authority = 0.2
timeliness = 0.25
innovation = 0.15

[vocabulary]
tier1 = ["artificial intelligence", "robotics"]
tier2 = ["startup", "open source"]
tier3 = ["technology"]

[retry]
max_retries = 0
"#;
