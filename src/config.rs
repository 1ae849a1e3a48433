use serde::Deserialize;

use crate::lookup::LookupConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideBackendKind {
    File,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub poll_ms: u64,

    // Per-source fetch policy
    pub source_timeout_ms: u64,
    pub source_attempts: u32,
    pub source_retry_delay_ms: u64,
    pub sources_file: Option<String>,

    pub global_max_tokens: usize,
    pub ecosystem_max_tokens: usize,

    // Overrides
    pub override_backend: OverrideBackendKind,
    pub override_file: String,
    pub override_url: Option<String>,
    pub override_api_key: Option<String>,
    pub override_key_header: String,

    // Stats
    pub stats_log_sec: u64,
    pub stats_jsonl_path: Option<String>,

    // Admin token verification
    pub lookup_rpc_url: String,
    pub lookup_ecosystem_url: String,
    pub lookup_coingecko_url: String,
    pub lookup_binance_url: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::build(config::Environment::default())
    }

    fn build(env: config::Environment) -> anyhow::Result<Self> {
        let c = config::Config::builder()
            .set_default("poll_ms", 30_000)?
            .set_default("source_timeout_ms", 8_000)?
            .set_default("source_attempts", 3)?
            .set_default("source_retry_delay_ms", 750)?
            .set_default("global_max_tokens", 2_000)?
            .set_default("ecosystem_max_tokens", 100)?
            .set_default("override_backend", "file")?
            .set_default("override_file", "admin_tokens.json")?
            .set_default("override_key_header", "X-Master-Key")?
            .set_default("stats_log_sec", 60)?
            .set_default("lookup_rpc_url", "https://fullnode.mainnet.sui.io:443")?
            .set_default("lookup_ecosystem_url", "https://api.suivision.xyz/v1/market/coins")?
            .set_default("lookup_coingecko_url", "https://api.coingecko.com/api/v3")?
            .set_default("lookup_binance_url", "https://api.binance.com")?
            .add_source(env)
            .build()?;
        Ok(c.try_deserialize()?)
    }

    pub fn max_tokens(&self, category: crate::types::Category) -> usize {
        match category {
            crate::types::Category::Global => self.global_max_tokens,
            crate::types::Category::Ecosystem => self.ecosystem_max_tokens,
        }
    }

    pub fn lookup(&self) -> LookupConfig {
        LookupConfig {
            rpc_url: self.lookup_rpc_url.clone(),
            ecosystem_url: self.lookup_ecosystem_url.clone(),
            coingecko_url: self.lookup_coingecko_url.clone(),
            binance_url: self.lookup_binance_url.clone(),
            timeout_ms: self.source_timeout_ms,
        }
    }
}
