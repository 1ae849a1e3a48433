use std::sync::Arc;

use crate::error::{CycleError, FetchError, SourceFailure};
use crate::fetcher::Fetcher;
use crate::normalize::normalize;
use crate::reconcile::{reconcile, SourceBatch};
use crate::source::TokenSource;
use crate::types::{Category, MarketSnapshot};

#[derive(Debug)]
pub struct CycleOutput {
    pub snapshot: MarketSnapshot,
    /// Sources that failed this tick even though the cycle as a whole succeeded.
    pub failures: Vec<SourceFailure>,
}

/// One category's fetch, normalize and reconcile chain.
pub struct CategoryPipeline {
    category: Category,
    sources: Vec<Arc<dyn TokenSource>>,
    fetcher: Fetcher,
    max_tokens: usize,
}

impl CategoryPipeline {
    pub fn new(
        category: Category,
        sources: Vec<Arc<dyn TokenSource>>,
        fetcher: Fetcher,
        max_tokens: usize,
    ) -> Self {
        Self {
            category,
            sources,
            fetcher,
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, previous: Option<&MarketSnapshot>) -> Result<CycleOutput, CycleError> {
        let report = self.fetcher.fetch_all(&self.sources).await;
        if report.all_failed() {
            return Err(CycleError::AllSourcesFailed {
                category: self.category,
                failures: report.failures(),
            });
        }

        let mut batches: Vec<SourceBatch> = Vec::with_capacity(self.sources.len());
        let mut failures: Vec<SourceFailure> = vec![];

        // Outcomes come back in source order, so batches stay in priority order.
        for (source, outcome) in self.sources.iter().zip(report.outcomes) {
            let normalized = outcome
                .result
                .and_then(|payload| normalize(source.name(), self.category, source.schema(), &payload));
            match normalized {
                Ok(records) => {
                    tracing::debug!(category = %self.category, source = source.name(), records = records.len(), "source normalized");
                    batches.push(SourceBatch {
                        source: outcome.source,
                        records,
                    });
                }
                Err(error) => {
                    if matches!(error, FetchError::Shape(_)) {
                        tracing::warn!(category = %self.category, source = source.name(), err = %error, "source payload rejected");
                    }
                    failures.push(SourceFailure {
                        source: outcome.source,
                        error,
                    });
                }
            }
        }

        if batches.is_empty() {
            return Err(CycleError::AllSourcesFailed {
                category: self.category,
                failures,
            });
        }

        let snapshot = reconcile(
            self.category,
            &batches,
            previous,
            self.max_tokens,
            chrono::Utc::now().timestamp_millis(),
        );
        Ok(CycleOutput { snapshot, failures })
    }
}
