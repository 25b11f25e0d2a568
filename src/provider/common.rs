//! # Common Provider Utilities
//!
//! Span and metric bookkeeping shared by provider implementations.

use crate::observability::metrics;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{Instrument, Span};

/// Records the outcome of one provider call on its span and in metrics
#[derive(Debug)]
pub struct OperationTracker {
    provider: &'static str,
    operation: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTracker {
    #[must_use]
    pub fn new(provider: &'static str, operation: &'static str, span: Span) -> Self {
        Self {
            provider,
            operation,
            start: Instant::now(),
            span,
        }
    }

    pub fn record_success(&self) {
        let duration = self.start.elapsed();
        self.span.record("operation.success", true);
        self.span.record("operation.duration_ms", duration_ms(duration));
        metrics::record_provider_operation(self.provider, self.operation, duration.as_secs_f64());
    }

    /// Success with an extra outcome label on the span, e.g. `found`/`not_found`
    pub fn record_outcome(&self, outcome: &str) {
        self.span.record("operation.outcome", outcome);
        self.record_success();
    }

    pub fn record_error(&self, error_message: &str) {
        let duration = self.start.elapsed();
        self.span.record("operation.success", false);
        self.span.record("error.message", error_message);
        self.span.record("operation.duration_ms", duration_ms(duration));
        metrics::increment_provider_operation_errors(self.provider, self.operation);
    }
}

/// Run `future` inside `span`, recording success or failure of the provider call.
///
/// `span` must declare `operation.success`, `operation.duration_ms` and `error.message`.
pub async fn track<T, F>(
    provider: &'static str,
    operation: &'static str,
    span: Span,
    future: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let tracker = OperationTracker::new(provider, operation, span.clone());
    let result = future.instrument(span).await;
    match &result {
        Ok(_) => tracker.record_success(),
        Err(e) => tracker.record_error(&format!("{e:#}")),
    }
    result
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_records_without_subscriber() {
        let span = tracing::info_span!(
            "test.operation",
            operation.success = tracing::field::Empty,
            operation.outcome = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        let tracker = OperationTracker::new("test", "lookup", span);
        tracker.record_outcome("found");
        tracker.record_error("boom");
    }
}
