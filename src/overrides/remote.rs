use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{parse_rows, OverrideBackend};
use crate::types::OverrideRecord;

#[derive(Serialize)]
struct PutBody<'a> {
    record: &'a [OverrideRecord],
}

/// Shared key-value store: `GET url` returns `{record: [...]}`, `PUT url` replaces the whole list.
pub struct RemoteBackend {
    url: String,
    api_key: Option<String>,
    key_header: String,
    http: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(url: String, api_key: Option<String>, key_header: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            url,
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
            key_header,
            http,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => req.header(self.key_header.as_str(), k.as_str()),
            None => req,
        }
    }
}

#[async_trait]
impl OverrideBackend for RemoteBackend {
    fn describe(&self) -> String {
        format!("remote:{}", self.url)
    }

    async fn read(&self) -> Result<Vec<OverrideRecord>> {
        let v: serde_json::Value = self
            .authed(self.http.get(&self.url))
            .send()
            .await
            .context("GET override store failed")?
            .error_for_status()
            .context("GET override store non-200")?
            .json()
            .await
            .context("decode override store json failed")?;
        Ok(parse_rows(v))
    }

    async fn write(&self, rows: &[OverrideRecord]) -> Result<()> {
        self.authed(self.http.put(&self.url))
            .json(&PutBody { record: rows })
            .send()
            .await
            .context("PUT override store failed")?
            .error_for_status()
            .context("PUT override store non-200")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::tests::draft;
    use crate::overrides::OverrideStore;
    use crate::types::Category;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Bin = Arc<Mutex<serde_json::Value>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("x-master-key").and_then(|v| v.to_str().ok()) == Some("secret")
    }

    async fn get_bin(State(bin): State<Bin>, headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let v = bin.lock().unwrap().clone();
        Ok(Json(v))
    }

    async fn put_bin(State(bin): State<Bin>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> StatusCode {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED;
        }
        *bin.lock().unwrap() = serde_json::json!({"record": body["record"].clone(), "metadata": {}});
        StatusCode::OK
    }

    async fn serve(bin: Bin) -> String {
        let app = Router::new().route("/b/1", get(get_bin).put(put_bin)).with_state(bin);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/b/1", addr)
    }

    fn backend(url: String, key: &str) -> RemoteBackend {
        RemoteBackend::new(url, Some(key.to_string()), "X-Master-Key".to_string(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_whole_list() {
        let bin: Bin = Arc::new(Mutex::new(serde_json::json!({"record": []})));
        let url = serve(bin.clone()).await;

        let store = OverrideStore::new(Arc::new(backend(url.clone(), "secret")));
        let rec = store.append(draft("rem", Category::Ecosystem)).await.unwrap();
        assert_eq!(bin.lock().unwrap()["record"].as_array().unwrap().len(), 1);

        // A second client sees the same list.
        let other = OverrideStore::new(Arc::new(backend(url, "secret")));
        let rows = other.load().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token.id, rec.token.id);
    }

    #[tokio::test]
    async fn auth_failure_degrades_to_no_overrides() {
        let bin: Bin = Arc::new(Mutex::new(serde_json::json!({"record": [{"id": "a", "symbol": "A"}]})));
        let url = serve(bin).await;

        let wrong = backend(url.clone(), "wrong");
        assert!(wrong.read().await.is_err());
        assert!(OverrideStore::new(Arc::new(wrong)).load().await.is_empty());
        assert_eq!(backend(url, "secret").read().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_host_degrades_to_no_overrides() {
        let b = RemoteBackend::new(
            "http://127.0.0.1:9/b/1".to_string(),
            None,
            "X-Master-Key".to_string(),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(OverrideStore::new(Arc::new(b)).load().await.is_empty());
    }
}
