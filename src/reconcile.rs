use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{Category, MarketSnapshot, MarketStats, PriceDirection, TokenRecord};

/// Normalized records from one successful source.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub records: Vec<TokenRecord>,
}

/// Build a snapshot from per-source batches given in priority order.
///
/// Pure over its inputs: same batches, previous snapshot and timestamp give the same result.
pub fn reconcile(
    category: Category,
    batches: &[SourceBatch],
    previous: Option<&MarketSnapshot>,
    max_tokens: usize,
    ts_ms: i64,
) -> MarketSnapshot {
    let mut seen: HashSet<String> = HashSet::new();
    let mut tokens: Vec<TokenRecord> = Vec::new();

    // First occurrence by priority wins; later duplicates are dropped whole.
    for b in batches {
        let mut duplicates = 0usize;
        for r in &b.records {
            if tokens.len() >= max_tokens {
                break;
            }
            if seen.insert(r.dedup_key()) {
                tokens.push(r.clone());
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            tracing::debug!(category = %category, source = %b.source, duplicates, "lower-priority duplicates dropped");
        }
    }

    let prior: HashMap<&str, Decimal> = previous
        .map(|p| p.tokens.iter().map(|t| (t.id.as_str(), t.price_usd)).collect())
        .unwrap_or_default();

    for t in tokens.iter_mut() {
        t.category = category;
        t.symbol = t.dedup_key();
        t.price_direction = match prior.get(t.id.as_str()) {
            Some(prev) => PriceDirection::between(*prev, t.price_usd),
            None => PriceDirection::from_change(t.change_24h_pct),
        };
    }

    assign_ranks(&mut tokens);
    let stats = compute_stats(&tokens);

    MarketSnapshot {
        category,
        ts_ms,
        tokens,
        stats,
    }
}

/// Rank by descending market cap without reordering the list. Ties keep insertion order.
pub fn assign_ranks(tokens: &mut [TokenRecord]) {
    let mut order: Vec<usize> = (0..tokens.len()).collect();
    order.sort_by(|a, b| tokens[*b].market_cap.cmp(&tokens[*a].market_cap));
    for (rank, idx) in order.into_iter().enumerate() {
        tokens[idx].rank = rank as u32 + 1;
    }
}

pub fn compute_stats(tokens: &[TokenRecord]) -> MarketStats {
    let total_market_cap = saturating_total(tokens.iter().map(|t| t.market_cap));
    let total_volume_24h = saturating_total(tokens.iter().map(|t| t.volume_24h));
    let largest = tokens.iter().map(|t| t.market_cap).max().unwrap_or(Decimal::ZERO);

    let dominance_pct = if total_market_cap > Decimal::ZERO {
        (largest / total_market_cap * dec!(100)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    MarketStats {
        total_market_cap,
        total_volume_24h,
        dominance_pct,
        count: tokens.len(),
    }
}

// Totals pin at Decimal::MAX instead of overflowing.
fn saturating_total(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, |acc, v| acc.checked_add(v).unwrap_or(Decimal::MAX))
}
