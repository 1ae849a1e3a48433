use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::error::{FetchError, SourceFailure};
use crate::source::TokenSource;

#[derive(Debug)]
pub struct SourceOutcome {
    pub source: String,
    pub result: Result<Value, FetchError>,
}

/// Every source's outcome, in the priority order the sources were given.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl FetchReport {
    pub fn all_failed(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_err())
    }

    pub fn failures(&self) -> Vec<SourceFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| {
                o.result.as_ref().err().map(|e| SourceFailure {
                    source: o.source.clone(),
                    error: e.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    attempts: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(attempts: u32, retry_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Fire every source at once and wait for all of them; one failure never cancels another.
    pub async fn fetch_all(&self, sources: &[Arc<dyn TokenSource>]) -> FetchReport {
        let futs = sources.iter().map(move |s| {
            let s = s.clone();
            async move {
                let result = self.fetch_one(s.as_ref()).await;
                SourceOutcome {
                    source: s.name().to_string(),
                    result,
                }
            }
        });

        FetchReport {
            outcomes: join_all(futs).await,
        }
    }

    async fn fetch_one(&self, source: &dyn TokenSource) -> Result<Value, FetchError> {
        let timeout = source.timeout();
        let mut last_err = FetchError::Request("no attempt made".to_string());

        for attempt in 1..=self.attempts {
            tracing::debug!(source = source.name(), attempt, "fetching");
            // Dropping the future on timeout cancels the in-flight request.
            last_err = match tokio::time::timeout(timeout, source.fetch_payload()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => FetchError::Request(format!("{:#}", e)),
                Err(_) => FetchError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                },
            };

            if attempt < self.attempts {
                tracing::debug!(source = source.name(), attempt, err = %last_err, "retrying");
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::warn!(source = source.name(), attempts = self.attempts, err = %last_err, "source failed this tick");
        Err(last_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalize::SourceSchema;
    use crate::types::Category;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory source: fails the first `fail_first` calls, sleeps `delay` per call.
    pub struct FakeSource {
        pub name: String,
        pub category: Category,
        pub payload: Value,
        pub fail_first: u32,
        pub delay: Duration,
        pub timeout: Duration,
        pub schema: SourceSchema,
        pub calls: AtomicU32,
    }

    impl FakeSource {
        pub fn ok(name: &str, payload: Value) -> Self {
            Self {
                name: name.to_string(),
                category: Category::Global,
                payload,
                fail_first: 0,
                delay: Duration::ZERO,
                timeout: Duration::from_secs(5),
                schema: crate::source::catalog::default_sources()[0].schema.clone(),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                fail_first: u32::MAX,
                ..Self::ok(name, Value::Null)
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for FakeSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn category(&self) -> Category {
            self.category
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn schema(&self) -> &SourceSchema {
            &self.schema
        }

        async fn fetch_payload(&self) -> anyhow::Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.fail_first {
                anyhow::bail!("{} unavailable", self.name);
            }
            Ok(self.payload.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_cancel_others() {
        let good = Arc::new(FakeSource::ok("good", serde_json::json!([])));
        let bad = Arc::new(FakeSource::failing("bad"));
        let sources: Vec<Arc<dyn TokenSource>> = vec![bad.clone(), good.clone()];

        let report = Fetcher::new(3, Duration::from_millis(100)).fetch_all(&sources).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].source, "bad");
        assert!(report.outcomes[0].result.is_err());
        assert!(report.outcomes[1].result.is_ok());
        assert!(!report.all_failed());
        assert_eq!(bad.calls(), 3);
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let flaky = Arc::new(FakeSource {
            fail_first: 2,
            ..FakeSource::ok("flaky", serde_json::json!([1]))
        });
        let sources: Vec<Arc<dyn TokenSource>> = vec![flaky.clone()];

        let report = Fetcher::new(3, Duration::from_millis(50)).fetch_all(&sources).await;
        assert_eq!(report.outcomes[0].result.as_ref().unwrap(), &serde_json::json!([1]));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_per_attempt() {
        let slow = Arc::new(FakeSource {
            delay: Duration::from_secs(10),
            timeout: Duration::from_millis(200),
            ..FakeSource::ok("slow", serde_json::json!([]))
        });
        let sources: Vec<Arc<dyn TokenSource>> = vec![slow.clone()];

        let report = Fetcher::new(2, Duration::from_millis(10)).fetch_all(&sources).await;
        assert_eq!(
            report.outcomes[0].result.as_ref().unwrap_err(),
            &FetchError::Timeout { after_ms: 200 }
        );
        assert_eq!(slow.calls(), 2);
        assert!(report.all_failed());
        assert_eq!(report.failures().len(), 1);
    }
}
