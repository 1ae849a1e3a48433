pub mod catalog;
pub mod http;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::normalize::SourceSchema;
use crate::types::Category;

/// Abstraction for market data sources (CoinGecko, CoinPaprika, SuiVision, etc.)
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Upper bound for a single attempt.
    fn timeout(&self) -> Duration;

    fn schema(&self) -> &SourceSchema;

    /// Fetch the raw JSON body. Shape is not checked here.
    async fn fetch_payload(&self) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Declarative description of one source. Priority is list order within a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub category: Category,
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// JSON body for POST / JSON-RPC style sources.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub schema: SourceSchema,
}

pub use http::HttpSource;
