// src/cache.rs
//! In-memory TTL cache for per-source fetch results.
//!
//! - Entries live in one bucket per `CacheClass`, each with its own TTL, so a
//!   busy class never contends with another one.
//! - Keys come from `cache_key`: a sha256 over the source id, the normalized
//!   request parameters and the current UTC calendar day. Results therefore
//!   roll over daily even without explicit invalidation.
//! - Expired entries are ignored on read and evicted by `evict_expired`, which
//!   `spawn_sweeper` runs periodically.
//! - Fail-open: a poisoned bucket is logged and treated as a miss, never an error.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fixed set of cache classes, one per adapter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheClass {
    FeedResults,
    SearchResults,
    ApiResults,
}

impl CacheClass {
    pub const ALL: [CacheClass; 3] = [
        CacheClass::FeedResults,
        CacheClass::SearchResults,
        CacheClass::ApiResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::FeedResults => "feed_results",
            CacheClass::SearchResults => "search_results",
            CacheClass::ApiResults => "api_results",
        }
    }
}

/// TTLs per class, in seconds. Defaults are on the order of hours.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_feed_ttl")]
    pub feed_ttl_secs: u64,
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_api_ttl")]
    pub api_ttl_secs: u64,
    #[serde(default = "default_sweep")]
    pub sweep_interval_secs: u64,
}

fn default_feed_ttl() -> u64 {
    2 * 3600
}
fn default_search_ttl() -> u64 {
    3 * 3600
}
fn default_api_ttl() -> u64 {
    4 * 3600
}
fn default_sweep() -> u64 {
    15 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            feed_ttl_secs: default_feed_ttl(),
            search_ttl_secs: default_search_ttl(),
            api_ttl_secs: default_api_ttl(),
            sweep_interval_secs: default_sweep(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, class: CacheClass) -> Duration {
        let secs = match class {
            CacheClass::FeedResults => self.feed_ttl_secs,
            CacheClass::SearchResults => self.search_ttl_secs,
            CacheClass::ApiResults => self.api_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

type Bucket<V> = Mutex<HashMap<String, CacheEntry<V>>>;

/// Process-lifetime cache shared by every guarded source of a pipeline.
#[derive(Debug)]
pub struct ResponseCache<V> {
    cfg: CacheConfig,
    buckets: HashMap<CacheClass, Bucket<V>>,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_hits_total", "Cache lookups served from memory.");
        describe_counter!("cache_misses_total", "Cache lookups that found nothing fresh.");
        describe_counter!("cache_sets_total", "Values stored in the cache.");
        describe_counter!("cache_deletes_total", "Entries removed (explicitly or by sweep).");
        describe_counter!("cache_errors_total", "Cache operations that failed open.");
    });
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(cfg: CacheConfig) -> Self {
        ensure_metrics_described();
        let buckets = CacheClass::ALL
            .iter()
            .map(|c| (*c, Mutex::new(HashMap::new())))
            .collect();
        Self { cfg, buckets }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    fn bucket(&self, class: CacheClass) -> Option<MutexGuard<'_, HashMap<String, CacheEntry<V>>>> {
        let bucket = self.buckets.get(&class)?;
        match bucket.lock() {
            Ok(g) => Some(g),
            Err(e) => {
                warn!(target: "cache", class = class.as_str(), error = %e, "cache bucket poisoned; treating as miss");
                counter!("cache_errors_total", "class" => class.as_str()).increment(1);
                None
            }
        }
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, class: CacheClass, key: &str) -> Option<V> {
        let now = Instant::now();
        let hit = self
            .bucket(class)
            .and_then(|b| b.get(key).filter(|e| e.is_fresh(now)).map(|e| e.value.clone()));
        if hit.is_some() {
            counter!("cache_hits_total", "class" => class.as_str()).increment(1);
        } else {
            counter!("cache_misses_total", "class" => class.as_str()).increment(1);
        }
        hit
    }

    /// Store `value`; `ttl` overrides the class TTL.
    pub fn set(&self, class: CacheClass, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.cfg.ttl(class));
        if let Some(mut b) = self.bucket(class) {
            b.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                    ttl,
                },
            );
            counter!("cache_sets_total", "class" => class.as_str()).increment(1);
        }
    }

    pub fn delete(&self, class: CacheClass, key: &str) -> bool {
        let removed = self
            .bucket(class)
            .map(|mut b| b.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            counter!("cache_deletes_total", "class" => class.as_str()).increment(1);
        }
        removed
    }

    /// Return the cached value, or run `producer` and cache what it yields.
    ///
    /// `Ok(None)` from the producer is passed through without being stored;
    /// producer errors propagate and are never cached.
    pub async fn wrap<F, Fut, E>(&self, class: CacheClass, key: &str, producer: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(hit) = self.get(class, key) {
            debug!(target: "cache", class = class.as_str(), "hit");
            return Ok(Some(hit));
        }
        let produced = producer().await?;
        if let Some(v) = &produced {
            self.set(class, key, v.clone(), None);
        }
        Ok(produced)
    }

    /// Drop every expired entry. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut total = 0usize;
        for class in CacheClass::ALL {
            if let Some(mut b) = self.bucket(class) {
                let before = b.len();
                b.retain(|_, e| e.is_fresh(now));
                let evicted = before - b.len();
                if evicted > 0 {
                    counter!("cache_deletes_total", "class" => class.as_str())
                        .increment(evicted as u64);
                }
                total += evicted;
            }
        }
        total
    }

    /// Number of stored entries (fresh or not) in `class`.
    pub fn len(&self, class: CacheClass) -> usize {
        self.bucket(class).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        CacheClass::ALL.iter().all(|c| self.len(*c) == 0)
    }
}

impl<V: Clone + Send + 'static> ResponseCache<V> {
    /// Periodically evict expired entries for as long as the cache is alive.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    debug!(target: "cache", evicted, "sweep");
                }
            }
        })
    }
}

/// Deterministic cache key for `source_id` + request params, scoped to the
/// current UTC day.
pub fn cache_key(source_id: &str, params: &[String]) -> String {
    let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
    cache_key_for_day(source_id, params, &day)
}

/// Same as `cache_key` with an explicit day stamp.
pub fn cache_key_for_day(source_id: &str, params: &[String], day: &str) -> String {
    let mut norm: Vec<String> = params
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    norm.sort();
    norm.dedup();

    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    for p in &norm {
        hasher.update(p.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(day.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(source_id.len() + 17);
    out.push_str(source_id);
    out.push(':');
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
