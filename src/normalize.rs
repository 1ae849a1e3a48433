use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::types::{Category, TokenRecord};

/// Ordered candidate key paths per canonical field. The first present, usable value wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default)]
    pub id: Vec<String>,
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub symbol: Vec<String>,
    #[serde(default)]
    pub price: Vec<String>,
    #[serde(default)]
    pub volume: Vec<String>,
    #[serde(default)]
    pub market_cap: Vec<String>,
    #[serde(default)]
    pub change: Vec<String>,
    #[serde(default)]
    pub image: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSchema {
    /// Dotted path to the record array; the payload root when absent.
    #[serde(default)]
    pub records_path: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Follow a dotted key path. Numeric segments index into arrays.
pub fn lookup<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = v;
    for seg in path.split('.').filter(|s| !s.is_empty()) {
        cur = match cur {
            Value::Object(m) => m.get(seg)?,
            Value::Array(a) => a.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
        .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).and_then(Decimal::from_f64))
}

pub(crate) fn as_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

pub(crate) fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_decimal(rec: &Value, paths: &[String]) -> Option<Decimal> {
    paths.iter().find_map(|p| lookup(rec, p).and_then(as_decimal))
}

fn first_text(rec: &Value, paths: &[String]) -> Option<String> {
    paths.iter().find_map(|p| lookup(rec, p).and_then(as_text))
}

fn non_negative(d: Option<Decimal>) -> Decimal {
    d.unwrap_or(Decimal::ZERO).max(Decimal::ZERO)
}

/// Map one raw record. `None` when it carries no usable symbol.
pub fn normalize_record(
    source: &str,
    category: Category,
    fields: &FieldMap,
    rec: &Value,
) -> Option<TokenRecord> {
    let symbol = first_text(rec, &fields.symbol)?;
    let mut t = TokenRecord::new(&symbol, category, source);
    if t.symbol.is_empty() {
        return None;
    }
    if let Some(id) = first_text(rec, &fields.id) {
        t.id = id;
    }
    t.name = first_text(rec, &fields.name).unwrap_or_default();
    t.price_usd = non_negative(first_decimal(rec, &fields.price));
    t.volume_24h = non_negative(first_decimal(rec, &fields.volume));
    t.market_cap = non_negative(first_decimal(rec, &fields.market_cap));
    t.change_24h_pct = first_decimal(rec, &fields.change).unwrap_or(Decimal::ZERO);
    t.image_url = first_text(rec, &fields.image);
    t.price_direction = crate::types::PriceDirection::from_change(t.change_24h_pct);
    Some(t)
}

/// Map a whole source payload. Only a missing or non-array record list is an error;
/// individual malformed fields fall back to their defaults.
pub fn normalize(
    source: &str,
    category: Category,
    schema: &SourceSchema,
    payload: &Value,
) -> Result<Vec<TokenRecord>, FetchError> {
    let path = schema.records_path.as_deref().unwrap_or("");
    let records = lookup(payload, path)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::Shape(if path.is_empty() {
                "payload is not an array".to_string()
            } else {
                format!("no record array at '{}'", path)
            })
        })?;

    let out: Vec<TokenRecord> = records
        .iter()
        .filter_map(|r| normalize_record(source, category, &schema.fields, r))
        .collect();

    if out.len() < records.len() {
        tracing::debug!(
            source = source,
            dropped = records.len() - out.len(),
            "records without a symbol dropped"
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    fn paprika_like() -> SourceSchema {
        SourceSchema {
            records_path: None,
            fields: FieldMap {
                id: paths(&["id"]),
                name: paths(&["name"]),
                symbol: paths(&["symbol"]),
                price: paths(&["quotes.USD.price", "price"]),
                volume: paths(&["quotes.USD.volume_24h"]),
                market_cap: paths(&["quotes.USD.market_cap"]),
                change: paths(&["quotes.USD.percent_change_24h"]),
                image: paths(&["logo"]),
            },
        }
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let v = json!({"a": {"b": [{"c": 5}]}});
        assert_eq!(lookup(&v, "a.b.0.c"), Some(&json!(5)));
        assert_eq!(lookup(&v, "a.b.1.c"), None);
        assert_eq!(lookup(&v, "a.x"), None);
        assert_eq!(lookup(&v, ""), Some(&v));
    }

    #[test]
    fn parses_numbers_strings_and_scientific() {
        assert_eq!(parse_decimal("12.5"), Some(dec!(12.5)));
        assert_eq!(parse_decimal(" 3 "), Some(dec!(3)));
        assert_eq!(parse_decimal("1e-7"), Some(dec!(0.0000001)));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn nested_keys_and_fallback_chain() {
        let payload = json!([
            {"id": "btc-bitcoin", "name": "Bitcoin", "symbol": "btc",
             "quotes": {"USD": {"price": 50000.5, "volume_24h": "1000", "market_cap": 900, "percent_change_24h": -2.5}}},
            {"id": "x", "name": "X", "symbol": "x", "price": "7"}
        ]);
        let out = normalize("paprika", Category::Global, &paprika_like(), &payload).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].symbol, "BTC");
        assert_eq!(out[0].id, "btc-bitcoin");
        assert_eq!(out[0].price_usd, dec!(50000.5));
        assert_eq!(out[0].volume_24h, dec!(1000));
        assert_eq!(out[0].change_24h_pct, dec!(-2.5));
        assert_eq!(out[1].price_usd, dec!(7));
        assert_eq!(out[1].market_cap, Decimal::ZERO);
    }

    #[test]
    fn malformed_fields_default_instead_of_failing() {
        let payload = json!([
            {"symbol": "abc", "quotes": {"USD": {"price": "n/a", "market_cap": -10, "volume_24h": null}}},
            {"symbol": "  "},
            {"name": "no symbol"},
            7,
            {"symbol": 42, "price": true}
        ]);
        let out = normalize("s", Category::Ecosystem, &paprika_like(), &payload).unwrap();
        assert_eq!(out.len(), 2);
        for t in &out {
            assert!(t.price_usd >= Decimal::ZERO);
            assert!(t.market_cap >= Decimal::ZERO);
            assert!(t.volume_24h >= Decimal::ZERO);
        }
        assert_eq!(out[0].id, "ABC");
        assert_eq!(out[0].image_url, None);
        assert_eq!(out[1].symbol, "42");
    }

    #[test]
    fn non_array_payload_is_a_shape_error() {
        let schema = SourceSchema {
            records_path: Some("data".into()),
            fields: FieldMap::default(),
        };
        let err = normalize("s", Category::Global, &schema, &json!({"data": {"oops": 1}})).unwrap_err();
        assert!(matches!(err, FetchError::Shape(_)));
        let err = normalize("s", Category::Global, &paprika_like(), &json!({"error": "rate limited"})).unwrap_err();
        assert!(matches!(err, FetchError::Shape(_)));
    }
}
