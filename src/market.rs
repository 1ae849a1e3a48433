use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::error::{CycleError, OverrideError};
use crate::overrides::{OverrideDraft, OverrideStore};
use crate::pipeline::CategoryPipeline;
use crate::stats::Stats;
use crate::types::{Category, CategoryView, MarketEvent, MarketSnapshot, OverrideRecord};

#[derive(Debug, Default)]
struct CategoryState {
    snapshot: Option<Arc<MarketSnapshot>>,
    last_error: Option<String>,
}

/// Owns the current snapshot per category and the override list consumers read from.
pub struct Market {
    pipelines: HashMap<Category, CategoryPipeline>,
    state: HashMap<Category, RwLock<CategoryState>>,
    overrides: Arc<OverrideStore>,
    events: broadcast::Sender<MarketEvent>,
    stats: Arc<Stats>,
}

impl Market {
    pub fn new(pipelines: Vec<CategoryPipeline>, overrides: Arc<OverrideStore>, stats: Arc<Stats>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pipelines: pipelines.into_iter().map(|p| (p.category(), p)).collect(),
            state: Category::ALL
                .iter()
                .map(|c| (*c, RwLock::new(CategoryState::default())))
                .collect(),
            overrides,
            events,
            stats,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    fn emit(&self, ev: MarketEvent) {
        // No receivers is fine.
        let _ = self.events.send(ev);
    }

    pub fn snapshot(&self, category: Category) -> Option<Arc<MarketSnapshot>> {
        self.state
            .get(&category)
            .and_then(|s| s.read().ok().and_then(|g| g.snapshot.clone()))
    }

    pub fn last_error(&self, category: Category) -> Option<String> {
        self.state
            .get(&category)
            .and_then(|s| s.read().ok().and_then(|g| g.last_error.clone()))
    }

    /// Current snapshot with this category's overrides appended.
    pub fn view(&self, category: Category) -> CategoryView {
        CategoryView {
            category,
            snapshot: self.snapshot(category),
            overrides: self.overrides.for_category(category),
            last_error: self.last_error(category),
        }
    }

    /// Run one cycle now and commit its result.
    pub async fn refresh(&self, category: Category) -> Result<Arc<MarketSnapshot>, CycleError> {
        self.cycle(category, None).await
    }

    /// One fetch-reconcile cycle. With `alive` set, nothing is committed once it reads false.
    pub async fn cycle(
        &self,
        category: Category,
        alive: Option<&AtomicBool>,
    ) -> Result<Arc<MarketSnapshot>, CycleError> {
        let is_alive = || alive.map(|a| a.load(Ordering::SeqCst)).unwrap_or(true);

        let (Some(pipeline), Some(state)) = (self.pipelines.get(&category), self.state.get(&category)) else {
            tracing::debug!(category = %category, "cycle requested for unconfigured category");
            return Err(CycleError::NoPipeline(category));
        };

        let previous = self.snapshot(category);
        let (result, overrides) = tokio::join!(pipeline.run(previous.as_deref()), self.overrides.load());
        self.stats.set_overrides(overrides.len() as u64);

        self.stats.inc_cycle();
        match result {
            Ok(out) => {
                self.stats.add_source_failures(out.failures.len() as u64);
                let snap = Arc::new(out.snapshot);
                {
                    let Ok(mut g) = state.write() else {
                        return Ok(snap);
                    };
                    if !is_alive() {
                        tracing::debug!(category = %category, "cycle finished after stop, discarded");
                        return Ok(snap);
                    }
                    g.snapshot = Some(snap.clone());
                    g.last_error = None;
                }
                self.stats.set_tokens(category, snap.tokens.len() as u64);
                tracing::info!(
                    category = %category,
                    tokens = snap.stats.count,
                    total_market_cap = %snap.stats.total_market_cap,
                    dominance_pct = %snap.stats.dominance_pct,
                    failed_sources = out.failures.len(),
                    "snapshot ready"
                );
                self.emit(MarketEvent::SnapshotReady { category });
                Ok(snap)
            }
            Err(e) => {
                self.stats.inc_cycle_failed();
                if let CycleError::AllSourcesFailed { failures, .. } = &e {
                    self.stats.add_source_failures(failures.len() as u64);
                }
                let reason = e.to_string();
                {
                    let Ok(mut g) = state.write() else {
                        return Err(e);
                    };
                    if !is_alive() {
                        return Err(e);
                    }
                    // Previous snapshot is kept as is.
                    g.last_error = Some(reason.clone());
                }
                tracing::warn!(category = %category, err = %reason, "all sources failed, keeping previous snapshot");
                self.emit(MarketEvent::CycleFailed { category, reason });
                Err(e)
            }
        }
    }

    pub async fn add_override(&self, draft: OverrideDraft) -> Result<OverrideRecord, OverrideError> {
        let rec = self.overrides.append(draft).await?;
        self.stats.set_overrides(self.overrides.current().len() as u64);
        self.emit(MarketEvent::OverridesChanged);
        Ok(rec)
    }

    pub async fn remove_override(&self, id: &str) -> Result<bool, OverrideError> {
        let removed = self.overrides.remove(id).await?;
        if removed {
            self.stats.set_overrides(self.overrides.current().len() as u64);
            self.emit(MarketEvent::OverridesChanged);
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetcher::tests::FakeSource;
    use crate::fetcher::Fetcher;
    use crate::overrides::tests::{draft, MemoryBackend};
    use crate::source::TokenSource;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    pub fn market_with(sources: Vec<Arc<FakeSource>>, category: Category) -> Market {
        let sources: Vec<Arc<dyn TokenSource>> = sources.into_iter().map(|s| s as Arc<dyn TokenSource>).collect();
        let pipeline = CategoryPipeline::new(category, sources, Fetcher::new(1, Duration::ZERO), 100);
        let store = Arc::new(OverrideStore::new(Arc::new(MemoryBackend::default())));
        Market::new(vec![pipeline], store, Stats::new(0))
    }

    #[tokio::test]
    async fn all_failed_keeps_previous_snapshot_and_flags_error() {
        let src = Arc::new(FakeSource {
            fail_first: 1,
            ..FakeSource::ok("s", json!([{"symbol": "BTC", "current_price": 10}]))
        });
        let m = market_with(vec![src.clone()], Category::Global);
        let mut rx = m.subscribe();

        // Tick 1 fails with nothing to keep.
        assert!(m.refresh(Category::Global).await.is_err());
        assert!(m.snapshot(Category::Global).is_none());
        assert!(m.view(Category::Global).has_error());
        assert!(matches!(rx.recv().await.unwrap(), MarketEvent::CycleFailed { .. }));

        let ok = m.refresh(Category::Global).await.unwrap();
        assert!(!m.view(Category::Global).has_error());
        assert_eq!(rx.recv().await.unwrap(), MarketEvent::SnapshotReady { category: Category::Global });

        let failing = market_with(vec![Arc::new(FakeSource::failing("x"))], Category::Global);
        failing.state[&Category::Global].write().unwrap().snapshot = Some(ok.clone());
        assert!(failing.refresh(Category::Global).await.is_err());
        assert_eq!(failing.snapshot(Category::Global).unwrap(), ok);
        assert!(failing.last_error(Category::Global).is_some());
    }

    #[tokio::test]
    async fn direction_tracks_previous_tick() {
        let m = market_with(
            vec![Arc::new(FakeSource::ok("s", json!([{"symbol": "SUI", "current_price": 10}])))],
            Category::Ecosystem,
        );
        m.refresh(Category::Ecosystem).await.unwrap();
        let first = m.snapshot(Category::Ecosystem).unwrap();
        assert_eq!(first.tokens[0].price_usd, dec!(10));

        let m2 = market_with(
            vec![Arc::new(FakeSource::ok("s", json!([{"symbol": "SUI", "current_price": 12}])))],
            Category::Ecosystem,
        );
        m2.state[&Category::Ecosystem].write().unwrap().snapshot = Some(first);
        let second = m2.refresh(Category::Ecosystem).await.unwrap();
        assert_eq!(second.tokens[0].price_direction, crate::types::PriceDirection::Up);
    }

    #[tokio::test]
    async fn overrides_show_up_on_next_read() {
        let m = market_with(
            vec![Arc::new(FakeSource::ok("s", json!([{"symbol": "SUI", "current_price": 1}])))],
            Category::Ecosystem,
        );
        m.refresh(Category::Ecosystem).await.unwrap();
        let mut rx = m.subscribe();

        let rec = m.add_override(draft("SUI", Category::Ecosystem)).await.unwrap();
        let rows: Vec<String> = m.view(Category::Ecosystem).rows().iter().map(|t| t.source_origin.clone()).collect();
        assert_eq!(rows, vec!["s".to_string(), "admin".to_string()]);
        assert!(m.view(Category::Global).overrides.is_empty());
        assert_eq!(rx.recv().await.unwrap(), MarketEvent::OverridesChanged);

        assert!(m.remove_override(&rec.token.id).await.unwrap());
        assert_eq!(m.view(Category::Ecosystem).rows().len(), 1);
    }

    #[tokio::test]
    async fn stopped_cycle_commits_nothing() {
        let m = market_with(
            vec![Arc::new(FakeSource::ok("s", json!([{"symbol": "SUI", "current_price": 1}])))],
            Category::Ecosystem,
        );
        let alive = AtomicBool::new(false);
        assert!(m.cycle(Category::Ecosystem, Some(&alive)).await.is_ok());
        assert!(m.snapshot(Category::Ecosystem).is_none());
    }

    #[tokio::test]
    async fn unconfigured_category_is_reported_as_such() {
        let m = market_with(
            vec![Arc::new(FakeSource::ok("s", json!([{"symbol": "SUI", "current_price": 1}])))],
            Category::Ecosystem,
        );
        let err = m.refresh(Category::Global).await.unwrap_err();
        assert!(matches!(err, CycleError::NoPipeline(Category::Global)));
        assert_eq!(err.to_string(), "no pipeline configured for global");
        assert!(!m.view(Category::Global).has_error());
        assert_eq!(m.stats().snapshot(0).cycles, 0);
    }
}
