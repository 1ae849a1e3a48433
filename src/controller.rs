use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::market::Market;
use crate::types::Category;

/// Start/stop handle for the per-category polling loops.
pub struct PollingHandle {
    alive: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    triggers: HashMap<Category, Arc<Notify>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollingHandle {
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Ask a category's loop to run a cycle now instead of waiting for the next tick.
    pub fn refresh(&self, category: Category) {
        if let Some(n) = self.triggers.get(&category) {
            n.notify_one();
        }
    }

    /// Stop ticking and drop in-flight cycles. Nothing is committed after this returns.
    pub fn stop(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        for t in &self.tasks {
            t.abort();
        }
        tracing::info!("polling stopped");
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run one cycle per category immediately, then one every `every`.
pub fn start(market: Arc<Market>, categories: &[Category], every: Duration) -> PollingHandle {
    let alive = Arc::new(AtomicBool::new(true));
    let (shutdown, _) = watch::channel(false);
    let mut triggers = HashMap::new();
    let mut tasks = Vec::with_capacity(categories.len());

    for &category in categories {
        let trigger = Arc::new(Notify::new());
        triggers.insert(category, trigger.clone());
        tasks.push(tokio::spawn(poll_loop(
            market.clone(),
            category,
            every,
            alive.clone(),
            shutdown.subscribe(),
            trigger,
        )));
    }

    tracing::info!(categories = categories.len(), every_ms = every.as_millis() as u64, "polling started");
    PollingHandle {
        alive,
        shutdown,
        triggers,
        tasks,
    }
}

async fn poll_loop(
    market: Arc<Market>,
    category: Category,
    every: Duration,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    trigger: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    // A slow cycle delays the next one rather than stacking them up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        // Failures are logged and surfaced through the market's error flag.
        let _ = market.cycle(category, Some(&alive)).await;
    }
    tracing::debug!(category = %category, "poll loop exited");
}
