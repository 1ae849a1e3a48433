use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::Category;

#[derive(Default)]
pub struct Stats {
    start_ms: AtomicU64,
    last_log_ms: AtomicU64,

    cycles: AtomicU64,
    cycles_failed: AtomicU64,
    source_failures: AtomicU64,

    global_tokens: AtomicU64,
    ecosystem_tokens: AtomicU64,
    overrides: AtomicU64,
}

impl Stats {
    pub fn new(now_ms: u64) -> Arc<Self> {
        let s = Arc::new(Self::default());
        s.start_ms.store(now_ms, Ordering::Relaxed);
        s.last_log_ms.store(now_ms, Ordering::Relaxed);
        s
    }

    pub fn inc_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_source_failures(&self, n: u64) {
        self.source_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_tokens(&self, category: Category, n: u64) {
        match category {
            Category::Global => self.global_tokens.store(n, Ordering::Relaxed),
            Category::Ecosystem => self.ecosystem_tokens.store(n, Ordering::Relaxed),
        }
    }

    pub fn set_overrides(&self, n: u64) {
        self.overrides.store(n, Ordering::Relaxed);
    }

    pub fn should_log(&self, now_ms: u64, every_sec: u64) -> bool {
        if every_sec == 0 { return false; }
        let last = self.last_log_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last) >= every_sec.saturating_mul(1000)
    }

    pub fn mark_logged(&self, now_ms: u64) {
        self.last_log_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let start = self.start_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            now_ms,
            up_sec: now_ms.saturating_sub(start) / 1000,
            cycles: self.cycles.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            global_tokens: self.global_tokens.load(Ordering::Relaxed),
            ecosystem_tokens: self.ecosystem_tokens.load(Ordering::Relaxed),
            overrides: self.overrides.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub now_ms: u64,
    pub up_sec: u64,
    pub cycles: u64,
    pub cycles_failed: u64,
    pub source_failures: u64,
    pub global_tokens: u64,
    pub ecosystem_tokens: u64,
    pub overrides: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_period_and_counters() {
        let s = Stats::new(1_000);
        assert!(!s.should_log(30_000, 60));
        assert!(s.should_log(61_000, 60));
        assert!(!s.should_log(61_000, 0));

        s.inc_cycle();
        s.inc_cycle();
        s.inc_cycle_failed();
        s.add_source_failures(3);
        s.set_tokens(Category::Ecosystem, 42);
        s.mark_logged(61_000);

        let snap = s.snapshot(61_000);
        assert_eq!(snap.up_sec, 60);
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.cycles_failed, 1);
        assert_eq!(snap.source_failures, 3);
        assert_eq!(snap.ecosystem_tokens, 42);
        assert!(!s.should_log(62_000, 60));
    }
}
