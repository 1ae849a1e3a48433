use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{HttpMethod, SourceDef};
use crate::normalize::{FieldMap, SourceSchema};
use crate::types::Category;

const COINGECKO: &str = "https://api.coingecko.com/api/v3";

fn p(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|s| s.to_string()).collect()
}

fn get(name: &str, category: Category, endpoint: String, schema: SourceSchema) -> SourceDef {
    SourceDef {
        name: name.to_string(),
        category,
        endpoint,
        method: HttpMethod::Get,
        body: None,
        headers: HashMap::new(),
        timeout_ms: None,
        schema,
    }
}

fn coingecko_markets() -> SourceSchema {
    SourceSchema {
        records_path: None,
        fields: FieldMap {
            id: p(&["id"]),
            name: p(&["name"]),
            symbol: p(&["symbol"]),
            price: p(&["current_price"]),
            volume: p(&["total_volume"]),
            market_cap: p(&["market_cap"]),
            change: p(&["price_change_percentage_24h", "price_change_percentage_24h_in_currency"]),
            image: p(&["image", "thumb"]),
        },
    }
}

/// Built-in sources, highest priority first within each category.
pub fn default_sources() -> Vec<SourceDef> {
    vec![
        get(
            "coingecko",
            Category::Global,
            format!(
                "{}/coins/markets?vs_currency=usd&order=market_cap_desc&per_page=250&page=1&price_change_percentage=24h",
                COINGECKO
            ),
            coingecko_markets(),
        ),
        get(
            "coinpaprika",
            Category::Global,
            "https://api.coinpaprika.com/v1/tickers".to_string(),
            SourceSchema {
                records_path: None,
                fields: FieldMap {
                    id: p(&["id"]),
                    name: p(&["name"]),
                    symbol: p(&["symbol"]),
                    price: p(&["quotes.USD.price"]),
                    volume: p(&["quotes.USD.volume_24h"]),
                    market_cap: p(&["quotes.USD.market_cap"]),
                    change: p(&["quotes.USD.percent_change_24h"]),
                    image: vec![],
                },
            },
        ),
        get(
            "coincap",
            Category::Global,
            "https://api.coincap.io/v2/assets?limit=2000".to_string(),
            SourceSchema {
                records_path: Some("data".to_string()),
                fields: FieldMap {
                    id: p(&["id"]),
                    name: p(&["name"]),
                    symbol: p(&["symbol"]),
                    price: p(&["priceUsd"]),
                    volume: p(&["volumeUsd24Hr"]),
                    market_cap: p(&["marketCapUsd"]),
                    change: p(&["changePercent24Hr"]),
                    image: vec![],
                },
            },
        ),
        get(
            "suivision",
            Category::Ecosystem,
            "https://api.suivision.xyz/v1/market/coins".to_string(),
            SourceSchema {
                records_path: Some("data".to_string()),
                fields: FieldMap {
                    id: p(&["coin_type", "coinType", "id"]),
                    name: p(&["name"]),
                    symbol: p(&["symbol"]),
                    price: p(&["price_usd", "price"]),
                    volume: p(&["volume_24h", "volume"]),
                    market_cap: p(&["market_cap", "marketCap"]),
                    change: p(&["price_change_24h", "change_24h"]),
                    image: p(&["icon_url", "iconUrl", "logo"]),
                },
            },
        ),
        get(
            "coingecko-sui",
            Category::Ecosystem,
            format!(
                "{}/coins/markets?vs_currency=usd&category=sui-ecosystem&order=market_cap_desc&per_page=100&page=1",
                COINGECKO
            ),
            coingecko_markets(),
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceDef>,
}

/// Load sources from a config file (`sources = [...]`), or fall back to the built-in list.
pub fn load_sources(path: Option<&str>) -> Result<Vec<SourceDef>> {
    let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(default_sources());
    };
    let f: SourcesFile = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()
        .with_context(|| format!("read sources file {}", path))?
        .try_deserialize()
        .with_context(|| format!("decode sources file {}", path))?;
    tracing::info!(path = path, count = f.sources.len(), "sources loaded from file");
    Ok(f.sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_catalog_covers_both_categories() {
        let s = default_sources();
        assert!(s.iter().any(|d| d.category == Category::Global));
        assert!(s.iter().any(|d| d.category == Category::Ecosystem));
        for d in &s {
            assert!(!d.schema.fields.symbol.is_empty(), "{} has no symbol mapping", d.name);
        }
    }

    #[test]
    fn sources_file_replaces_catalog() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            f,
            r#"{{"sources": [{{
                "name": "local",
                "category": "ecosystem",
                "endpoint": "http://127.0.0.1:9/coins",
                "timeout_ms": 1500,
                "schema": {{"records_path": "data", "fields": {{"symbol": ["sym"], "price": ["px"]}}}}
            }}]}}"#
        )
        .unwrap();

        let path = f.path().to_str().unwrap().to_string();
        let s = load_sources(Some(&path)).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].category, Category::Ecosystem);
        assert_eq!(s[0].method, HttpMethod::Get);
        assert_eq!(s[0].timeout_ms, Some(1500));
        assert_eq!(s[0].schema.fields.price, vec!["px".to_string()]);
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(load_sources(None).unwrap().len(), default_sources().len());
        assert_eq!(load_sources(Some("  ")).unwrap().len(), default_sources().len());
    }
}
