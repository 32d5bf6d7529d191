// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod article;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod deliver;
pub mod diversify;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod relevance;
pub mod retry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::article::{Article, Relevance, ScoredArticle};
pub use crate::config::CuratorConfig;
pub use crate::error::{ConfigError, FetchError};
pub use crate::pipeline::{Digest, Pipeline};
