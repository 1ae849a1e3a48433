pub mod local;
pub mod remote;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OverrideError;
use crate::types::{Category, OverrideRecord, PriceDirection, TokenRecord};

pub use local::FileBackend;
pub use remote::RemoteBackend;

/// Where override rows live. Whole-list reads and writes, no locking.
#[async_trait]
pub trait OverrideBackend: Send + Sync {
    fn describe(&self) -> String;

    async fn read(&self) -> anyhow::Result<Vec<OverrideRecord>>;

    async fn write(&self, rows: &[OverrideRecord]) -> anyhow::Result<()>;
}

/// Decode stored rows, skipping any that do not parse.
pub(crate) fn parse_rows(v: Value) -> Vec<OverrideRecord> {
    let rows = match v {
        Value::Array(a) => a,
        Value::Object(mut m) => match m.remove("record") {
            Some(Value::Array(a)) => a,
            _ => vec![],
        },
        _ => vec![],
    };

    let total = rows.len();
    let out: Vec<OverrideRecord> = rows
        .into_iter()
        .filter_map(|r| serde_json::from_value::<OverrideRecord>(r).ok())
        .map(|mut r| {
            r.is_override = true;
            r
        })
        .collect();
    if out.len() < total {
        tracing::warn!(skipped = total - out.len(), "malformed override rows skipped");
    }
    out
}

/// What the admin pathway submits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideDraft {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub price_usd: Decimal,
    #[serde(default)]
    pub market_cap: Decimal,
    #[serde(default)]
    pub volume_24h: Decimal,
    #[serde(default)]
    pub change_24h_pct: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    pub owner: String,
    #[serde(default)]
    pub category: Category,
}

impl OverrideDraft {
    pub fn into_record(self, rank: u32) -> Result<OverrideRecord, OverrideError> {
        for (field, v) in [("name", &self.name), ("symbol", &self.symbol), ("owner", &self.owner)] {
            if v.trim().is_empty() {
                return Err(OverrideError::Invalid(format!("{} is required", field)));
            }
        }

        let mut token = TokenRecord::new(&self.symbol, self.category, "admin");
        token.id = format!("admin-{}", uuid::Uuid::new_v4());
        token.name = self.name.trim().to_string();
        token.price_usd = self.price_usd.max(Decimal::ZERO).round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
        token.market_cap = self.market_cap.max(Decimal::ZERO);
        token.volume_24h = self.volume_24h.max(Decimal::ZERO);
        token.change_24h_pct = self.change_24h_pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        token.image_url = self.image.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        token.rank = rank;
        token.price_direction = PriceDirection::Same;

        Ok(OverrideRecord {
            token,
            owner: self.owner.trim().to_string(),
            is_override: true,
        })
    }
}

#[derive(Debug, Default)]
struct Cached {
    rows: Vec<OverrideRecord>,
    // Bumped by every successful save; a reload started before a save must not clobber it.
    generation: u64,
}

/// Adapter over a backend with an in-memory copy that reads see immediately.
pub struct OverrideStore {
    backend: Arc<dyn OverrideBackend>,
    cached: RwLock<Cached>,
}

impl OverrideStore {
    pub fn new(backend: Arc<dyn OverrideBackend>) -> Self {
        Self {
            backend,
            cached: RwLock::new(Cached::default()),
        }
    }

    fn generation(&self) -> u64 {
        self.cached.read().map(|g| g.generation).unwrap_or_default()
    }

    /// Reload from the backend. An unreachable store yields no overrides, never an error.
    pub async fn load(&self) -> Vec<OverrideRecord> {
        let started = self.generation();
        let rows = match self.backend.read().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(store = %self.backend.describe(), err = %format!("{:#}", e), "override store unreachable, using none");
                vec![]
            }
        };

        let Ok(mut g) = self.cached.write() else {
            return rows;
        };
        if g.generation != started {
            tracing::debug!(store = %self.backend.describe(), "override list changed during reload, keeping newer copy");
            return g.rows.clone();
        }
        g.rows = rows.clone();
        rows
    }

    pub async fn save(&self, rows: Vec<OverrideRecord>) -> Result<(), OverrideError> {
        self.backend.write(&rows).await?;
        if let Ok(mut g) = self.cached.write() {
            g.rows = rows;
            g.generation += 1;
        }
        Ok(())
    }

    pub async fn append(&self, draft: OverrideDraft) -> Result<OverrideRecord, OverrideError> {
        let mut rows = self.base_rows().await?;
        let rec = draft.into_record(rows.len() as u32 + 1)?;
        rows.push(rec.clone());
        self.save(rows).await?;
        tracing::info!(id = %rec.token.id, symbol = %rec.token.symbol, category = %rec.token.category, owner = %rec.owner, "override added");
        Ok(rec)
    }

    /// Returns whether a row with that id existed.
    pub async fn remove(&self, id: &str) -> Result<bool, OverrideError> {
        let mut rows = self.base_rows().await?;
        let before = rows.len();
        rows.retain(|r| r.token.id != id);
        if rows.len() == before {
            return Ok(false);
        }
        self.save(rows).await?;
        tracing::info!(id = id, "override removed");
        Ok(true)
    }

    pub fn current(&self) -> Vec<OverrideRecord> {
        self.cached.read().map(|g| g.rows.clone()).unwrap_or_default()
    }

    pub fn for_category(&self, category: Category) -> Vec<OverrideRecord> {
        self.current()
            .into_iter()
            .filter(|r| r.token.category == category)
            .collect()
    }

    // Writes replace the whole list, so an edit is only made on a list just read from the store.
    async fn base_rows(&self) -> Result<Vec<OverrideRecord>, OverrideError> {
        self.backend.read().await.map_err(|e| {
            tracing::warn!(store = %self.backend.describe(), err = %format!("{:#}", e), "override read failed, edit refused");
            OverrideError::Store(e.context("read before write"))
        })
    }
}
