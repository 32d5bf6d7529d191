// src/metrics.rs
use anyhow::{Context, Result};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::cache::{CacheClass, CacheConfig};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the static cache TTLs.
    /// Fails if a recorder is already installed in this process.
    pub fn init(cache: &CacheConfig) -> Result<Self> {
        // Default buckets; histograms are rendered as summaries.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        for class in CacheClass::ALL {
            gauge!("cache_ttl_seconds", "class" => class.as_str()).set(cache.ttl(class).as_secs_f64());
        }

        Ok(Self { handle })
    }
}
