//! # Metrics
//!
//! Prometheus metrics for deployment runs.
//!
//! Each run is a short-lived batch, so nothing is scraped: the registry is written
//! once at exit in text format to `METRICS_TEXTFILE` for the node-exporter textfile
//! collector.
//!
//! ## Metrics Exposed
//!
//! - `deploy_reconciler_reconciliations_total{strategy}` - Reconciliations by chosen strategy
//! - `deploy_reconciler_reconciliation_errors_total{kind}` - Reconciliations ending in an error
//! - `deploy_reconciler_reconciliation_duration_seconds` - Duration of reconciliations
//! - `deploy_reconciler_image_resolutions_total{source}` - Image resolutions by winning source
//! - `deploy_reconciler_registry_bindings_total{outcome}` - Binder outcomes
//! - `deploy_reconciler_permission_grants_total{outcome}` - Pull-permission grant outcomes
//! - `deploy_reconciler_propagation_wait_seconds` - Time spent waiting for grant propagation
//! - `deploy_reconciler_imports_total{outcome}` - Promotion imports
//! - `deploy_reconciler_metadata_writes_total{outcome}` - Metadata recorder outcomes
//! - `deploy_reconciler_provider_operations_total{provider,operation}` - Registry/platform calls
//! - `deploy_reconciler_provider_operation_duration_seconds{provider,operation}` - Call duration
//! - `deploy_reconciler_provider_operation_errors_total{provider,operation}` - Failed calls

use anyhow::{Context, Result};
use prometheus::{Encoder, Histogram, HistogramVec, IntCounterVec, Registry, TextEncoder};
use std::path::Path;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_reconciliations_total",
            "Total number of reconciliations by strategy",
        ),
        &["strategy"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_reconciliation_errors_total",
            "Total number of reconciliation errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "deploy_reconciler_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static IMAGE_RESOLUTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_image_resolutions_total",
            "Total number of image resolutions by source",
        ),
        &["source"],
    )
    .expect("Failed to create IMAGE_RESOLUTIONS_TOTAL metric - this should never happen")
});

static REGISTRY_BINDINGS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_registry_bindings_total",
            "Total number of registry binding checks by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create REGISTRY_BINDINGS_TOTAL metric - this should never happen")
});

static PERMISSION_GRANTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_permission_grants_total",
            "Total number of pull-permission grants by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create PERMISSION_GRANTS_TOTAL metric - this should never happen")
});

static PROPAGATION_WAIT: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "deploy_reconciler_propagation_wait_seconds",
            "Time spent waiting for permission grants to propagate",
        )
        .buckets(vec![1.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create PROPAGATION_WAIT metric - this should never happen")
});

static IMPORTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_imports_total",
            "Total number of promotion imports by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create IMPORTS_TOTAL metric - this should never happen")
});

static METADATA_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_metadata_writes_total",
            "Total number of deployment metadata writes by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create METADATA_WRITES_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_provider_operations_total",
            "Total number of registry and platform operations",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "deploy_reconciler_provider_operation_duration_seconds",
            "Duration of registry and platform operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

static PROVIDER_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "deploy_reconciler_provider_operation_errors_total",
            "Total number of failed registry and platform operations",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(IMAGE_RESOLUTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REGISTRY_BINDINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERMISSION_GRANTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROPAGATION_WAIT.clone()))?;
    REGISTRY.register(Box::new(IMPORTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(METADATA_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Render the registry in Prometheus text format
///
/// # Errors
/// Returns an error if encoding fails
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// Write the registry to `path` for the textfile collector
///
/// Written to a sibling temp file and renamed so the collector never reads a
/// partial file.
///
/// # Errors
/// Returns an error if rendering or writing fails
pub fn write_textfile(path: &Path) -> Result<()> {
    let rendered = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, rendered)
        .with_context(|| format!("Failed to write metrics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}

pub fn increment_reconciliations(strategy: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[strategy]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_image_resolutions(source: &str) {
    IMAGE_RESOLUTIONS_TOTAL.with_label_values(&[source]).inc();
}

pub fn increment_registry_bindings(outcome: &str) {
    REGISTRY_BINDINGS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_permission_grants(outcome: &str) {
    PERMISSION_GRANTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_propagation_wait(duration: f64) {
    PROPAGATION_WAIT.observe(duration);
}

pub fn increment_imports(outcome: &str) {
    IMPORTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_metadata_writes(outcome: &str) {
    METADATA_WRITES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_provider_operation(provider: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[provider, operation])
        .observe(duration);
}

pub fn increment_provider_operation_errors(provider: &str, operation: &str) {
    PROVIDER_OPERATION_ERRORS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_and_write_textfile() {
        // Only place in the test binary that registers, so this must succeed
        assert!(register_metrics().is_ok());

        increment_reconciliations("revision_copy");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.prom");
        write_textfile(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("deploy_reconciler_reconciliations_total"));
        assert!(written.contains("strategy=\"revision_copy\""));
        assert!(!dir.path().join("deploy.prom.tmp").exists());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["update"]).get();
        increment_reconciliations("update");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["update"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_permission_grants() {
        let before = PERMISSION_GRANTS_TOTAL
            .with_label_values(&["already_satisfied"])
            .get();
        increment_permission_grants("already_satisfied");
        let after = PERMISSION_GRANTS_TOTAL
            .with_label_values(&["already_satisfied"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_record_provider_operation() {
        let before = PROVIDER_OPERATIONS_TOTAL
            .with_label_values(&["azure", "update_image"])
            .get();
        record_provider_operation("azure", "update_image", 0.4);
        let after = PROVIDER_OPERATIONS_TOTAL
            .with_label_values(&["azure", "update_image"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_provider_operation_errors() {
        let before = PROVIDER_OPERATION_ERRORS_TOTAL
            .with_label_values(&["acr", "latest_digest"])
            .get();
        increment_provider_operation_errors("acr", "latest_digest");
        let after = PROVIDER_OPERATION_ERRORS_TOTAL
            .with_label_values(&["acr", "latest_digest"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_propagation_wait() {
        observe_propagation_wait(15.0);
        // Just verify it doesn't panic
    }
}
