//! newswire-curator: binary entrypoint.
//! Loads config, wires the fetch context and pipeline, and serves the Axum router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newswire_curator::api::{self, AppState};
use newswire_curator::config;
use newswire_curator::deliver::{DigestSink, LogSink};
use newswire_curator::ingest::guarded::FetchContext;
use newswire_curator::ingest::transport::ReqwestTransport;
use newswire_curator::metrics::Metrics;
use newswire_curator::Pipeline;

const ENV_LOG_FORMAT: &str = "CURATOR_LOG_FORMAT";
const ENV_RUN_EVERY_SECS: &str = "CURATOR_RUN_EVERY_SECS";

/// `RUST_LOG` wins; otherwise our crate at info and everything else at warn.
/// `CURATOR_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newswire_curator=info,warn"));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // The runtime may already have installed a subscriber; keep it if so.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        info!("tracing subscriber already installed");
    }
}

fn spawn_periodic_runs(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let digest = state.pipeline.run(&state.default_keywords).await;
            if let Err(e) = state.sink.deliver(&digest).await {
                warn!(target: "pipeline", error = %e, "scheduled delivery failed");
            }
        }
    });
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading curator config")?;

    let transport = Arc::new(
        ReqwestTransport::new(&cfg.http.user_agent, cfg.http.timeout())
            .context("building http client")?,
    );
    let ctx = FetchContext::from_config(&cfg);
    let _sweeper = ctx.cache.spawn_sweeper(cfg.cache.sweep_interval());

    let pipeline = Pipeline::new(&cfg, transport, ctx).context("building pipeline")?;
    let sink: Arc<dyn DigestSink> = Arc::new(LogSink);
    let mut state = AppState::new(Arc::new(pipeline), sink, cfg.vocabulary.all_keywords());

    match Metrics::init(&cfg.cache) {
        Ok(m) => state = state.with_metrics(m.handle),
        Err(e) => warn!(error = %e, "metrics exporter disabled"),
    }

    if let Some(secs) = std::env::var(ENV_RUN_EVERY_SECS)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|s| *s > 0)
    {
        info!(every_secs = secs, "scheduled runs enabled");
        spawn_periodic_runs(state.clone(), Duration::from_secs(secs));
    }

    Ok(api::router(state).into())
}
