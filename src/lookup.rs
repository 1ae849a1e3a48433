use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::normalize::{as_decimal, as_text, lookup};
use crate::overrides::OverrideDraft;
use crate::types::Category;

#[derive(Debug, Clone, Deserialize)]
pub struct LookupConfig {
    pub rpc_url: String,
    pub ecosystem_url: String,
    pub coingecko_url: String,
    pub binance_url: String,
    pub timeout_ms: u64,
}

/// Market fields found by one step of the chain. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq)]
struct Quote {
    name: Option<String>,
    symbol: Option<String>,
    price: Option<Decimal>,
    market_cap: Option<Decimal>,
    volume: Option<Decimal>,
    change: Option<Decimal>,
    image: Option<String>,
}

impl Quote {
    fn has_price(&self) -> bool {
        self.price.map(|p| p > Decimal::ZERO).unwrap_or(false)
    }

    fn apply(self, d: &mut OverrideDraft) {
        if let Some(v) = self.name {
            d.name = v;
        }
        if let Some(v) = self.symbol {
            d.symbol = v.to_uppercase();
        }
        if let Some(v) = self.price {
            d.price_usd = v;
        }
        if let Some(v) = self.market_cap {
            d.market_cap = v;
        }
        if let Some(v) = self.volume {
            d.volume_24h = v;
        }
        if let Some(v) = self.change {
            d.change_24h_pct = v;
        }
        if self.image.is_some() {
            d.image = self.image;
        }
    }
}

fn dec_at(v: &Value, path: &str) -> Option<Decimal> {
    lookup(v, path).and_then(as_decimal)
}

fn text_at(v: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| lookup(v, p).and_then(as_text))
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    /// Which step supplied the price, `None` if nothing did.
    pub verified_via: Option<String>,
    pub draft: OverrideDraft,
}

/// Fills an admin draft from public market APIs before it is stored.
pub struct TokenLookup {
    cfg: LookupConfig,
    http: reqwest::Client,
}

impl TokenLookup {
    pub fn new(cfg: LookupConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms.max(1)))
            .build()
            .context("build reqwest client")?;
        Ok(Self { cfg, http })
    }

    /// Walk the chain; the first step that yields a price wins. Never fails.
    pub async fn verify(&self, mut draft: OverrideDraft, coin_type: Option<&str>) -> LookupResult {
        let on_chain = draft.category == Category::Ecosystem;
        let coin_type = coin_type.map(str::trim).filter(|c| on_chain && !c.is_empty());

        if let Some(ct) = coin_type {
            match self.coin_metadata(ct).await {
                Ok(q) => q.apply(&mut draft),
                Err(e) => tracing::debug!(coin_type = ct, err = %format!("{:#}", e), "coin metadata lookup failed"),
            }
        }

        if draft.symbol.trim().is_empty() {
            return LookupResult { verified_via: None, draft };
        }
        let symbol = draft.symbol.trim().to_string();

        // Only Sui tokens are looked up on-chain and in the ecosystem list.
        let steps: &[&str] = if on_chain {
            &["ecosystem", "coingecko", "binance"]
        } else {
            &["coingecko", "binance"]
        };
        for &step in steps {
            let res = match step {
                "ecosystem" => self.from_ecosystem_list(&symbol, coin_type).await,
                "coingecko" => self.from_coingecko(&symbol).await,
                _ => self.from_binance(&symbol).await,
            };
            match res {
                Ok(Some(q)) if q.has_price() => {
                    q.apply(&mut draft);
                    tracing::info!(symbol = %symbol, via = step, "token verified");
                    return LookupResult {
                        verified_via: Some(step.to_string()),
                        draft,
                    };
                }
                Ok(_) => tracing::debug!(symbol = %symbol, step = step, "no price from step"),
                Err(e) => tracing::debug!(symbol = %symbol, step = step, err = %format!("{:#}", e), "lookup step failed"),
            }
        }

        tracing::info!(symbol = %symbol, "token not verified, keeping manual values");
        LookupResult { verified_via: None, draft }
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} non-200", url))?
            .json()
            .await
            .with_context(|| format!("decode {} json failed", url))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let v: Value = self
            .http
            .post(&self.cfg.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .error_for_status()
            .with_context(|| format!("{} non-200", method))?
            .json()
            .await
            .with_context(|| format!("decode {} json failed", method))?;
        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            anyhow::bail!("{} rpc error: {}", method, err);
        }
        match v.get("result") {
            Some(r) if !r.is_null() => Ok(r.clone()),
            _ => anyhow::bail!("{} returned no result", method),
        }
    }

    async fn coin_metadata(&self, coin_type: &str) -> Result<Quote> {
        let meta = match self.rpc("suix_getCoinMetadata", json!([coin_type])).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(err = %format!("{:#}", e), "suix_getCoinMetadata failed, trying sui_getCoinMetadata");
                self.rpc("sui_getCoinMetadata", json!([coin_type])).await?
            }
        };
        Ok(Quote {
            name: text_at(&meta, &["name"]),
            symbol: text_at(&meta, &["symbol"]),
            image: text_at(&meta, &["iconUrl"]),
            ..Quote::default()
        })
    }

    async fn from_ecosystem_list(&self, symbol: &str, coin_type: Option<&str>) -> Result<Option<Quote>> {
        let v = self.get_json(&self.cfg.ecosystem_url, &[]).await?;
        let coins = lookup(&v, "data").and_then(Value::as_array).context("coin list has no data array")?;
        let hit = coins.iter().find(|c| {
            let sym_match = text_at(c, &["symbol"]).map(|s| s.eq_ignore_ascii_case(symbol)).unwrap_or(false);
            let type_match = coin_type
                .zip(text_at(c, &["coin_type", "coinType"]))
                .map(|(a, b)| a == b)
                .unwrap_or(false);
            sym_match || type_match
        });
        Ok(hit.map(|c| Quote {
            name: text_at(c, &["name"]),
            symbol: text_at(c, &["symbol"]),
            price: dec_at(c, "price_usd"),
            market_cap: dec_at(c, "market_cap"),
            volume: dec_at(c, "volume_24h"),
            change: dec_at(c, "price_change_24h"),
            image: text_at(c, &["icon_url", "logo"]),
        }))
    }

    async fn from_coingecko(&self, symbol: &str) -> Result<Option<Quote>> {
        let base = self.cfg.coingecko_url.trim_end_matches('/');
        let search = self
            .get_json(&format!("{}/search", base), &[("query", symbol.to_lowercase().as_str())])
            .await?;
        let id = lookup(&search, "coins")
            .and_then(Value::as_array)
            .and_then(|coins| {
                coins
                    .iter()
                    .find(|c| text_at(c, &["symbol"]).map(|s| s.eq_ignore_ascii_case(symbol)).unwrap_or(false))
            })
            .and_then(|c| text_at(c, &["id"]));
        let Some(id) = id else {
            return Ok(None);
        };

        let mut url = reqwest::Url::parse(&format!("{}/coins/", base)).with_context(|| format!("bad coingecko url {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("coingecko url {} cannot take a path", base))?
            .pop_if_empty()
            .push(&id);
        let coin = self.get_json(url.as_str(), &[]).await?;
        Ok(Some(Quote {
            name: text_at(&coin, &["name"]),
            symbol: text_at(&coin, &["symbol"]),
            price: dec_at(&coin, "market_data.current_price.usd"),
            market_cap: dec_at(&coin, "market_data.market_cap.usd"),
            volume: dec_at(&coin, "market_data.total_volume.usd"),
            change: dec_at(&coin, "market_data.price_change_percentage_24h"),
            image: text_at(&coin, &["image.large", "image.small"]),
        }))
    }

    async fn from_binance(&self, symbol: &str) -> Result<Option<Quote>> {
        let url = format!("{}/api/v3/ticker/24hr", self.cfg.binance_url.trim_end_matches('/'));
        let pair = format!("{}USDT", symbol.to_uppercase());
        let t = self.get_json(&url, &[("symbol", pair.as_str())]).await?;
        Ok(Some(Quote {
            price: dec_at(&t, "lastPrice"),
            volume: dec_at(&t, "quoteVolume"),
            change: dec_at(&t, "priceChangePercent"),
            ..Quote::default()
        }))
    }
}
