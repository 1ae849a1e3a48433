use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use suimarketcap::config::{OverrideBackendKind, Settings};
use suimarketcap::controller;
use suimarketcap::fetcher::Fetcher;
use suimarketcap::overrides::{FileBackend, OverrideBackend, OverrideStore, RemoteBackend};
use suimarketcap::pipeline::CategoryPipeline;
use suimarketcap::source::catalog::load_sources;
use suimarketcap::source::{HttpSource, TokenSource};
use suimarketcap::stats::Stats;
use suimarketcap::{Category, Market, MarketEvent};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

async fn maybe_write_jsonl(path: &Option<String>, line: &str) {
    if let Some(p) = path.as_ref().map(|x| x.trim().to_string()).filter(|x| !x.is_empty()) {
        if let Ok(mut f) = tokio::fs::OpenOptions::new().create(true).append(true).open(&p).await {
            use tokio::io::AsyncWriteExt;
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
    }
}

fn override_backend(s: &Settings) -> Result<Arc<dyn OverrideBackend>> {
    let backend: Arc<dyn OverrideBackend> = match s.override_backend {
        OverrideBackendKind::File => Arc::new(FileBackend::new(&s.override_file)),
        OverrideBackendKind::Remote => {
            let url = s
                .override_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("OVERRIDE_URL is required when OVERRIDE_BACKEND=remote"))?;
            Arc::new(RemoteBackend::new(
                url,
                s.override_api_key.clone(),
                s.override_key_header.clone(),
                Duration::from_millis(s.source_timeout_ms),
            )?)
        }
    };
    Ok(backend)
}

fn log_top(market: &Market, category: Category) {
    let view = market.view(category);
    if let Some(snap) = &view.snapshot {
        for t in snap.ranked().into_iter().take(5) {
            tracing::info!(
                category = %category,
                rank = t.rank,
                symbol = %t.symbol,
                price_usd = %t.price_usd,
                change_24h_pct = %t.change_24h_pct,
                direction = ?t.price_direction,
                source = %t.source_origin,
                "top"
            );
        }
    }
    if !view.overrides.is_empty() {
        tracing::info!(category = %category, overrides = view.overrides.len(), rows = view.rows().len(), "overrides appended");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let s = Settings::from_env()?;
    let stats = Stats::new(now_ms());

    let defs = load_sources(s.sources_file.as_deref())?;
    let sources: Vec<Arc<dyn TokenSource>> = HttpSource::from_defs(defs, s.source_timeout_ms)?
        .into_iter()
        .map(|src| Arc::new(src) as Arc<dyn TokenSource>)
        .collect();
    let fetcher = Fetcher::new(s.source_attempts, Duration::from_millis(s.source_retry_delay_ms));

    let pipelines: Vec<CategoryPipeline> = Category::ALL
        .iter()
        .map(|&c| {
            let of_cat: Vec<Arc<dyn TokenSource>> =
                sources.iter().filter(|src| src.category() == c).cloned().collect();
            let p = CategoryPipeline::new(c, of_cat, fetcher.clone(), s.max_tokens(c));
            tracing::info!(category = %c, sources = ?p.source_names(), max_tokens = s.max_tokens(c), "pipeline configured");
            p
        })
        .collect();

    let store = Arc::new(OverrideStore::new(override_backend(&s)?));
    let market = Arc::new(Market::new(pipelines, store, stats.clone()));
    let mut events = market.subscribe();

    let handle = controller::start(market.clone(), &Category::ALL, Duration::from_millis(s.poll_ms));
    let mut stats_tick = tokio::time::interval(Duration::from_secs(s.stats_log_sec.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                break;
            }
            ev = events.recv() => match ev {
                Ok(MarketEvent::SnapshotReady { category }) => log_top(&market, category),
                Ok(MarketEvent::CycleFailed { category, reason }) => {
                    tracing::warn!(category = %category, reason = %reason, "showing previous snapshot");
                }
                Ok(MarketEvent::OverridesChanged) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!(missed = n, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = stats_tick.tick() => {
                let t = now_ms();
                if stats.should_log(t, s.stats_log_sec) {
                    let ss = stats.snapshot(t);
                    stats.mark_logged(t);

                    let line = serde_json::to_string(&ss).unwrap_or_default();
                    tracing::info!(
                        up_sec = ss.up_sec,
                        cycles = ss.cycles,
                        cycles_failed = ss.cycles_failed,
                        source_failures = ss.source_failures,
                        global_tokens = ss.global_tokens,
                        ecosystem_tokens = ss.ecosystem_tokens,
                        overrides = ss.overrides,
                        "stats"
                    );

                    maybe_write_jsonl(&s.stats_jsonl_path, &line).await;
                }
            }
        }
    }

    handle.stop();
    Ok(())
}
