//! # Promotion Importer
//!
//! Makes an artifact from an upstream environment available in a target
//! environment's registry, by digest, so content identity is unbroken across
//! environments. Deploying the imported reference is left to the reconciler.

use super::reconciler::{validate_reference, ReferenceValidity};
use crate::constants::IMPORT_TAG_FORMAT;
use crate::error::DeployError;
use crate::model::{ImageReference, ServiceTarget};
use crate::observability::metrics;
use crate::provider::{ContainerRegistry, ImportSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ImportOutcome {
    /// Copied in this run and tagged with `tag`
    Imported { tag: String },
    /// The target registry already had the digest
    AlreadyPresent,
}

pub struct PromotionImporter<'a> {
    registry: &'a dyn ContainerRegistry,
}

impl std::fmt::Debug for PromotionImporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionImporter")
            .field("registry", &self.registry.domain())
            .finish()
    }
}

impl<'a> PromotionImporter<'a> {
    #[must_use]
    pub fn new(registry: &'a dyn ContainerRegistry) -> Self {
        Self { registry }
    }

    /// Import `source` into `target`'s repository and return the local reference.
    ///
    /// The import is skipped when the digest is already present. `now` supplies the
    /// human-readable tag applied to a fresh import.
    ///
    /// # Errors
    /// - [`DeployError::InvalidReference`] when the source is not digest-pinned
    /// - [`DeployError::Registry`] when the presence check fails
    /// - [`DeployError::ImportFailure`] when the copy fails
    pub async fn import(
        &self,
        target: &ServiceTarget,
        source: &ImportSource,
        now: DateTime<Utc>,
    ) -> Result<(ImageReference, ImportOutcome), DeployError> {
        if !source.reference.is_digest_pinned() {
            return Err(DeployError::InvalidReference {
                reference: source.reference.to_string(),
                reason: "promotion requires a digest-pinned source".to_string(),
            });
        }

        let span = info_span!(
            "promotion.import",
            service.key = %target.service_key,
            environment = %target.environment,
            source = %source.reference,
            import.outcome = tracing::field::Empty
        );
        let span_clone = span.clone();

        async move {
            let local = source
                .reference
                .relocated(&target.registry_domain, &target.registry_repository);

            let present = validate_reference(self.registry, &local)
                .await
                .map_err(|e| DeployError::Registry {
                    registry: self.registry.domain().to_string(),
                    source: e,
                })?;
            if present == ReferenceValidity::Resolvable {
                info!("{} already present; skipping import", local);
                span_clone.record("import.outcome", "already_present");
                metrics::increment_imports("already_present");
                return Ok((local, ImportOutcome::AlreadyPresent));
            }

            let tag = now.format(IMPORT_TAG_FORMAT).to_string();
            info!(
                "Importing {} into {}/{} (tag {})",
                source.reference, target.registry_domain, target.registry_repository, tag
            );

            if let Err(e) = self
                .registry
                .import_image(source, &target.registry_repository, std::slice::from_ref(&tag))
                .await
            {
                span_clone.record("import.outcome", "failed");
                metrics::increment_imports("failed");
                return Err(DeployError::ImportFailure {
                    service: target.service_key.clone(),
                    environment: target.environment.clone(),
                    registry: target.registry_domain.clone(),
                    reference: source.reference.to_string(),
                    source: e,
                });
            }

            span_clone.record("import.outcome", "imported");
            metrics::increment_imports("imported");
            Ok((local, ImportOutcome::Imported { tag }))
        }
        .instrument(span)
        .await
    }
}
