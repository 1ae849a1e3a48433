use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Global,
    // Stored rows written by the dashboard used "sui" for the ecosystem list.
    #[serde(alias = "sui")]
    Ecosystem,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Global, Category::Ecosystem];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Global => "global",
            Category::Ecosystem => "ecosystem",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    #[default]
    Same,
}

impl PriceDirection {
    /// Direction implied by a signed 24h change, used when there is no prior price.
    pub fn from_change(change_pct: Decimal) -> Self {
        if change_pct > Decimal::ZERO {
            PriceDirection::Up
        } else if change_pct < Decimal::ZERO {
            PriceDirection::Down
        } else {
            PriceDirection::Same
        }
    }

    pub fn between(previous: Decimal, current: Decimal) -> Self {
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => PriceDirection::Up,
            std::cmp::Ordering::Less => PriceDirection::Down,
            std::cmp::Ordering::Equal => PriceDirection::Same,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub price_usd: Decimal,
    #[serde(default)]
    pub volume_24h: Decimal,
    #[serde(default)]
    pub market_cap: Decimal,
    #[serde(default, alias = "change_24h")]
    pub change_24h_pct: Decimal,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub rank: u32,
    #[serde(default, alias = "priceChange")]
    pub price_direction: PriceDirection,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub source_origin: String,
}

impl TokenRecord {
    pub fn new(symbol: &str, category: Category, source: &str) -> Self {
        let symbol = symbol.trim().to_uppercase();
        Self {
            id: symbol.clone(),
            name: String::new(),
            symbol,
            price_usd: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            change_24h_pct: Decimal::ZERO,
            image_url: None,
            rank: 0,
            price_direction: PriceDirection::Same,
            category,
            source_origin: source.to_string(),
        }
    }

    pub fn dedup_key(&self) -> String {
        self.symbol.trim().to_uppercase()
    }
}

/// A manually curated row injected by the admin pathway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    #[serde(flatten)]
    pub token: TokenRecord,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_true", alias = "isAdminToken")]
    pub is_override: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub total_market_cap: Decimal,
    pub total_volume_24h: Decimal,
    /// Largest single market cap as a percentage of the total, 2 decimal places.
    pub dominance_pct: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub category: Category,
    pub ts_ms: i64,
    /// Insertion order (source priority, then appearance). `rank` carries the cap ordering.
    pub tokens: Vec<TokenRecord>,
    pub stats: MarketStats,
}

impl MarketSnapshot {
    pub fn price_of(&self, id: &str) -> Option<Decimal> {
        self.tokens.iter().find(|t| t.id == id).map(|t| t.price_usd)
    }

    /// Tokens in rank order, for display.
    pub fn ranked(&self) -> Vec<&TokenRecord> {
        let mut out: Vec<&TokenRecord> = self.tokens.iter().collect();
        out.sort_by_key(|t| t.rank);
        out
    }
}

/// What a consumer reads for one category: the reconciled snapshot with overrides appended.
#[derive(Debug, Clone)]
pub struct CategoryView {
    pub category: Category,
    pub snapshot: Option<std::sync::Arc<MarketSnapshot>>,
    pub overrides: Vec<OverrideRecord>,
    pub last_error: Option<String>,
}

impl CategoryView {
    /// Fetched rows first, then override rows, never deduplicated against each other.
    pub fn rows(&self) -> Vec<&TokenRecord> {
        let fetched = self.snapshot.iter().flat_map(|s| s.tokens.iter());
        fetched.chain(self.overrides.iter().map(|o| &o.token)).collect()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    SnapshotReady { category: Category },
    CycleFailed { category: Category, reason: String },
    OverridesChanged,
}
