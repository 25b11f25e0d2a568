//! # Errors
//!
//! Typed failures surfaced to callers of the reconciliation engine.
//!
//! Internal remediations never appear here: a missing deployment target is a
//! [`crate::controller::reconciler::ReconcileOutcome::TargetAbsent`] signal, a stale
//! deployed reference is recovered through revision copy, and an already-present
//! binding or grant is an `Ok` outcome. What remains is what a caller must act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// Granting pull permission or setting the registry binding failed outright
    /// (as opposed to "already present").
    #[error(
        "registry binding failed for {service} in {environment} (registry {registry}): {source:#}"
    )]
    BindingGrantFailure {
        service: String,
        environment: String,
        registry: String,
        #[source]
        source: anyhow::Error,
    },

    /// Copying an artifact into the target environment's registry failed.
    /// Promotion aborts before any deployment call.
    #[error(
        "import of {reference} into {registry} failed for {service} in {environment}: {source:#}"
    )]
    ImportFailure {
        service: String,
        environment: String,
        registry: String,
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    /// The reference we were asked to deploy is not present in its registry.
    #[error("{reference} is not resolvable for {service} in {environment}: {reason}")]
    DesiredImageUnresolvable {
        service: String,
        environment: String,
        reference: String,
        reason: String,
    },

    /// A registry query (existence, manifest, listing) failed.
    #[error("registry {registry} query failed: {source:#}")]
    Registry {
        registry: String,
        #[source]
        source: anyhow::Error,
    },

    /// A deployment platform read failed.
    #[error("deployment platform call failed for {service} in {environment}: {source:#}")]
    Platform {
        service: String,
        environment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
}

impl DeployError {
    /// Whether re-running the same invocation may succeed without operator action.
    ///
    /// Every step is idempotent, so transient registry/platform failures are retryable;
    /// configuration and reference problems are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployError::Registry { .. }
                | DeployError::Platform { .. }
                | DeployError::BindingGrantFailure { .. }
                | DeployError::ImportFailure { .. }
        )
    }
}
