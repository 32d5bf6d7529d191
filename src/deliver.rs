// src/deliver.rs
//! Delivery boundary. A sink receives the finished digest and nothing else;
//! rendering and transport belong to the sink.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::pipeline::Digest;
use crate::relevance::anon_hash;

#[async_trait]
pub trait DigestSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, digest: &Digest) -> Result<()>;
}

/// Structured log of the digest. Titles are logged as hashes only.
pub struct LogSink;

#[async_trait]
impl DigestSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        info!(
            target: "pipeline",
            sink = self.name(),
            articles = digest.articles.len(),
            distribution = ?digest.distribution,
            relaxed = digest.diversity.relaxed,
            "digest delivered"
        );
        for (rank, a) in digest.articles.iter().enumerate() {
            info!(
                target: "pipeline",
                rank = rank + 1,
                id = %anon_hash(&a.article.title),
                source = %a.article.source,
                score = a.relevance.score,
                confidence = a.relevance.metadata.confidence,
                "digest item"
            );
        }
        Ok(())
    }
}

/// Keeps every delivered digest in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Digest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Digest> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DigestSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        self.delivered
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(digest.clone());
        Ok(())
    }
}
