use thiserror::Error;

use crate::types::Category;

/// Why one source produced nothing usable this tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub error: FetchError,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CycleError {
    #[error("all {} sources failed for {category}", .failures.len())]
    AllSourcesFailed {
        category: Category,
        failures: Vec<SourceFailure>,
    },
    #[error("no pipeline configured for {0}")]
    NoPipeline(Category),
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid override: {0}")]
    Invalid(String),
    #[error("override store: {0:#}")]
    Store(#[from] anyhow::Error),
}
