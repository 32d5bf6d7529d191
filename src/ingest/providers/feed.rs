// src/ingest/providers/feed.rs
//! Generic feed adapter: RSS 2.0, with Atom as a fallback format.

use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;

use crate::article::Article;
use crate::error::FetchError;
use crate::ingest::transport::HttpTransport;
use crate::ingest::{AdapterKind, RawItem, SourceAdapter, SourceMeta};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Named HTML entities are not valid XML; replace the common ones up front.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn rss_items(rss: Rss) -> Vec<RawItem> {
    rss.channel
        .item
        .into_iter()
        .map(|it| {
            let image = it
                .enclosure
                .filter(|e| e.mime.as_deref().map_or(true, |m| m.starts_with("image/")))
                .and_then(|e| e.url);
            RawItem {
                title: it.title,
                link: it.link,
                published: it.pub_date,
                description: it.description,
                image,
            }
        })
        .collect()
}

fn atom_items(feed: AtomFeed) -> Vec<RawItem> {
    feed.entries
        .into_iter()
        .map(|e| {
            let link = e
                .link
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .or_else(|| e.link.first())
                .and_then(|l| l.href.clone());
            RawItem {
                title: e.title.map(|t| t.value),
                link,
                published: e.published.or(e.updated),
                description: e.summary.or(e.content).map(|t| t.value),
                image: None,
            }
        })
        .collect()
}

/// Parse an RSS or Atom document into normalized articles for `source_id`.
/// Upstream item order is preserved.
pub fn parse_feed(xml: &str, source_id: &str) -> Result<Vec<Article>, FetchError> {
    let t0 = std::time::Instant::now();
    let cleaned = scrub_html_entities_for_xml(xml);

    let raw = match from_str::<Rss>(&cleaned) {
        Ok(rss) => rss_items(rss),
        Err(_) if cleaned.contains("<feed") => match from_str::<AtomFeed>(&cleaned) {
            Ok(feed) => atom_items(feed),
            Err(e) => return Err(FetchError::Malformed(format!("atom: {e}"))),
        },
        Err(rss_err) => return Err(FetchError::Malformed(format!("rss: {rss_err}"))),
    };

    let out: Vec<Article> = raw
        .into_iter()
        .filter_map(|r| r.into_article(source_id))
        .collect();

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms", "source" => source_id.to_string()).record(ms);
    Ok(out)
}

pub struct GenericFeedAdapter {
    meta: SourceMeta,
    url: String,
    transport: Arc<dyn HttpTransport>,
}

impl GenericFeedAdapter {
    pub fn new(meta: SourceMeta, url: String, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            meta,
            url,
            transport,
        }
    }
}

#[async_trait]
impl SourceAdapter for GenericFeedAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::GenericFeed
    }

    fn validate(&self) -> Result<(), FetchError> {
        match url::Url::parse(&self.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
            Ok(u) => Err(FetchError::Misconfigured(format!(
                "feed url scheme `{}` not supported",
                u.scheme()
            ))),
            Err(e) => Err(FetchError::Misconfigured(format!("invalid feed url: {e}"))),
        }
    }

    /// A generic feed ignores keywords; the URL alone identifies the request.
    fn request_params(&self, _keywords: &[String]) -> Vec<String> {
        vec![self.url.clone()]
    }

    async fn fetch(&self, _keywords: &[String]) -> Result<Vec<Article>, FetchError> {
        let body = self.transport.get_text(&self.url, &[]).await?;
        let articles = parse_feed(&body, &self.meta.id)?;
        counter!("ingest_articles_total", "source" => self.meta.id.clone())
            .increment(articles.len() as u64);
        Ok(articles)
    }
}
