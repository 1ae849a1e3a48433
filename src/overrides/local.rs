use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{parse_rows, OverrideBackend};
use crate::types::OverrideRecord;

/// Overrides kept in a JSON file on this device.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OverrideBackend for FileBackend {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn read(&self) -> Result<Vec<OverrideRecord>> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
        };
        if body.trim().is_empty() {
            return Ok(vec![]);
        }
        let v: serde_json::Value = serde_json::from_str(&body)
            .with_context(|| format!("decode {} json failed", self.path.display()))?;
        Ok(parse_rows(v))
    }

    async fn write(&self, rows: &[OverrideRecord]) -> Result<()> {
        let body = serde_json::to_vec_pretty(rows).context("encode overrides")?;
        // Write then rename so readers never see a half-written list.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}
