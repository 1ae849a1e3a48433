use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};

use super::{HttpMethod, SourceDef, TokenSource};
use crate::normalize::SourceSchema;
use crate::types::Category;

/// `TokenSource` backed by a plain JSON HTTP endpoint.
pub struct HttpSource {
    def: SourceDef,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpSource {
    pub fn new(def: SourceDef, http: reqwest::Client, default_timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(def.timeout_ms.unwrap_or(default_timeout_ms).max(1));
        Self { def, timeout, http }
    }

    pub fn from_defs(defs: Vec<SourceDef>, default_timeout_ms: u64) -> Result<Vec<Self>> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .user_agent(concat!("suimarketcap/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .context("build reqwest client")?;

        Ok(defs
            .into_iter()
            .map(|d| Self::new(d, http.clone(), default_timeout_ms))
            .collect())
    }
}

#[async_trait]
impl TokenSource for HttpSource {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn category(&self) -> Category {
        self.def.category
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn schema(&self) -> &SourceSchema {
        &self.def.schema
    }

    async fn fetch_payload(&self) -> Result<serde_json::Value> {
        let mut req = match self.def.method {
            HttpMethod::Get => self.http.get(&self.def.endpoint),
            HttpMethod::Post => self
                .http
                .post(&self.def.endpoint)
                .json(self.def.body.as_ref().unwrap_or(&serde_json::Value::Null)),
        };
        for (k, v) in &self.def.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .with_context(|| format!("bad header name {}", k))?;
            let value = HeaderValue::from_str(v).with_context(|| format!("bad header value for {}", k))?;
            req = req.header(name, value);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.def.name))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("read {} body failed", self.def.name))?;
        if !status.is_success() {
            let snippet: String = body.chars().take(256).collect();
            anyhow::bail!("{} non-200: status={} body_snippet={}", self.def.name, status, snippet);
        }

        let v: serde_json::Value = serde_json::from_str(&body)
            .with_context(|| format!("decode {} json failed", self.def.name))?;

        // JSON-RPC sources wrap the useful part in `result` and report failures in `error`.
        if self.def.method == HttpMethod::Post {
            if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
                anyhow::bail!("{} rpc error: {}", self.def.name, err);
            }
        }
        Ok(v)
    }
}
