//! # Deployment Reconciler
//!
//! Brings a live deployment target in line with a resolved image, choosing the
//! cheapest safe strategy.
//!
//! ## Flow
//!
//! 1. A target that does not exist yields [`ReconcileOutcome::TargetAbsent`]; creating
//!    it belongs to infrastructure provisioning.
//! 2. If the desired image lives in the target's registry, the [`RegistryBinder`] runs.
//! 3. The currently deployed reference is validated top-down (repository, then
//!    artifact), then the desired one.
//! 4. Deployed reference still resolvable: direct in-place update. The platform
//!    re-validates every image in the template, including the one being replaced.
//! 5. Deployed reference gone: copy the newest revision with the desired image.
//!    Revision copy validates only the new image.
//! 6. No revision to copy from: direct update anyway.
//!
//! A platform rejection of the update itself is reported as
//! [`ReconcileOutcome::FastPathFailed`] so the caller can fall back to full
//! provisioning.

use super::binder::{BindingOutcome, RegistryBinder};
use super::resolver::ResolvedImage;
use crate::error::DeployError;
use crate::model::{DeploymentState, ImageReference, Revision, ServiceTarget};
use crate::observability::metrics;
use crate::provider::{ContainerRegistry, DeploymentPlatform};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Outcome of the top-down resolvability check of one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceValidity {
    Resolvable,
    /// The repository itself is gone
    RepositoryMissing,
    /// The repository exists but not this digest/tag
    ArtifactMissing,
    /// Hosted outside the environment's registry; not checked and assumed pullable
    External,
}

impl ReferenceValidity {
    #[must_use]
    pub fn is_resolvable(self) -> bool {
        matches!(self, Self::Resolvable | Self::External)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolvable => "resolvable",
            Self::RepositoryMissing => "repository_missing",
            Self::ArtifactMissing => "artifact_missing",
            Self::External => "external",
        }
    }
}

/// Check whether `registry` can currently produce a manifest for `reference`.
///
/// The repository is checked before the artifact so a deleted repository is never
/// reported as a missing digest.
///
/// # Errors
/// Returns an error if a registry query fails
pub async fn validate_reference(
    registry: &dyn ContainerRegistry,
    reference: &ImageReference,
) -> Result<ReferenceValidity> {
    if !reference.is_hosted_by(registry.domain()) {
        return Ok(ReferenceValidity::External);
    }
    if !registry.repository_exists(&reference.repository).await? {
        return Ok(ReferenceValidity::RepositoryMissing);
    }
    if !registry
        .manifest_exists(&reference.repository, reference.manifest_reference())
        .await?
    {
        return Ok(ReferenceValidity::ArtifactMissing);
    }
    Ok(ReferenceValidity::Resolvable)
}

/// Update strategy attempted for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateStrategy {
    DirectUpdate,
    RevisionCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ReconcileOutcome {
    /// The deployment target does not exist; full provisioning is needed
    TargetAbsent,
    /// Already running the desired image
    NoChange,
    /// Updated in place
    Updated,
    /// New revision copied from `from_revision` with the desired image
    RevisionCopied { from_revision: String },
    /// The platform rejected the update; full provisioning is needed
    FastPathFailed {
        attempted: UpdateStrategy,
        reason: String,
    },
}

impl ReconcileOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetAbsent => "target_absent",
            Self::NoChange => "no_change",
            Self::Updated => "update",
            Self::RevisionCopied { .. } => "revision_copy",
            Self::FastPathFailed { .. } => "fast_path_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Reference this run deployed (or would have deployed)
    pub desired: ImageReference,
    /// Reference running before this run
    pub previous: Option<ImageReference>,
    pub previous_validity: Option<ReferenceValidity>,
    /// `None` when the desired image needs no registry access or the target is absent
    pub binding: Option<BindingOutcome>,
    pub outcome: ReconcileOutcome,
    /// Target tags as read at the start of the run
    #[serde(skip)]
    pub live_tags: BTreeMap<String, String>,
}

impl ReconcileReport {
    /// `false` tells the caller to run full provisioning instead
    #[must_use]
    pub fn fast_path_succeeded(&self) -> bool {
        matches!(
            self.outcome,
            ReconcileOutcome::NoChange
                | ReconcileOutcome::Updated
                | ReconcileOutcome::RevisionCopied { .. }
        )
    }

    /// Whether the platform confirmed a change of image in this run
    #[must_use]
    pub fn applied_update(&self) -> bool {
        matches!(
            self.outcome,
            ReconcileOutcome::Updated | ReconcileOutcome::RevisionCopied { .. }
        )
    }
}

pub struct Reconciler<'a> {
    registry: &'a dyn ContainerRegistry,
    platform: &'a dyn DeploymentPlatform,
    binder: RegistryBinder<'a>,
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry.domain())
            .field("binder", &self.binder)
            .finish_non_exhaustive()
    }
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        registry: &'a dyn ContainerRegistry,
        platform: &'a dyn DeploymentPlatform,
        binder: RegistryBinder<'a>,
    ) -> Self {
        Self {
            registry,
            platform,
            binder,
        }
    }

    /// Reconcile `target` towards `resolved`.
    ///
    /// # Errors
    /// - [`DeployError::BindingGrantFailure`] when binding the registry fails
    /// - [`DeployError::DesiredImageUnresolvable`] when the desired image is not in its registry
    /// - [`DeployError::Registry`] / [`DeployError::Platform`] when a read fails
    pub async fn reconcile(
        &self,
        target: &ServiceTarget,
        resolved: &ResolvedImage,
    ) -> Result<ReconcileReport, DeployError> {
        let span = info_span!(
            "reconciler.reconcile",
            service.key = %target.service_key,
            environment = %target.environment,
            app.name = %target.app_name,
            image.desired = %resolved.reference,
            image.previous = tracing::field::Empty,
            previous.validity = tracing::field::Empty,
            reconcile.outcome = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty
        );
        let span_clone = span.clone();

        async move {
            let start = Instant::now();
            let result = self.reconcile_inner(target, resolved).await;

            span_clone.record(
                "operation.duration_ms",
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            );
            metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            match &result {
                Ok(report) => {
                    span_clone.record("reconcile.outcome", report.outcome.as_str());
                    if let Some(previous) = &report.previous {
                        span_clone.record("image.previous", previous.to_string());
                    }
                    if let Some(validity) = report.previous_validity {
                        span_clone.record("previous.validity", validity.as_str());
                    }
                    metrics::increment_reconciliations(report.outcome.as_str());
                }
                Err(e) => {
                    metrics::increment_reconciliation_errors(error_kind(e));
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconcile_inner(
        &self,
        target: &ServiceTarget,
        resolved: &ResolvedImage,
    ) -> Result<ReconcileReport, DeployError> {
        let desired = &resolved.reference;

        let Some(state) = self
            .platform
            .get_deployment(target)
            .await
            .map_err(|e| platform_error(target, e))?
        else {
            info!(
                "{} does not exist in {}; full provisioning required",
                target.app_name, target.environment
            );
            return Ok(ReconcileReport {
                desired: desired.clone(),
                previous: None,
                previous_validity: None,
                binding: None,
                outcome: ReconcileOutcome::TargetAbsent,
                live_tags: BTreeMap::new(),
            });
        };

        let binding = if resolved.requires_registry_access {
            Some(self.binder.ensure(target, &state).await?)
        } else {
            None
        };

        let previous = state.image.clone();
        let previous_validity = match &previous {
            Some(reference) => Some(
                validate_reference(self.registry, reference)
                    .await
                    .map_err(|e| self.registry_error(e))?,
            ),
            None => None,
        };

        let report = |outcome: ReconcileOutcome| ReconcileReport {
            desired: desired.clone(),
            previous: previous.clone(),
            previous_validity,
            binding,
            outcome,
            live_tags: state.tags.clone(),
        };

        if previous.as_ref() == Some(desired) {
            debug!("{} already runs {}", target.app_name, desired);
            return Ok(report(ReconcileOutcome::NoChange));
        }

        let desired_validity = validate_reference(self.registry, desired)
            .await
            .map_err(|e| self.registry_error(e))?;
        if !desired_validity.is_resolvable() {
            return Err(DeployError::DesiredImageUnresolvable {
                service: target.service_key.clone(),
                environment: target.environment.clone(),
                reference: desired.to_string(),
                reason: desired_validity.as_str().replace('_', " "),
            });
        }

        let previous_resolvable = previous_validity.is_some_and(ReferenceValidity::is_resolvable);
        if previous_resolvable {
            return Ok(report(self.direct_update(target, &state, desired).await));
        }

        warn!(
            "Deployed image {} of {} is no longer resolvable ({}); copying latest revision",
            previous
                .as_ref()
                .map_or_else(|| "<unrecognized>".to_string(), ToString::to_string),
            target.app_name,
            previous_validity.map_or("unparsable", ReferenceValidity::as_str)
        );

        let revisions = self
            .platform
            .list_revisions(target)
            .await
            .map_err(|e| platform_error(target, e))?;

        let Some(from_revision) = newest_revision(&revisions, state.latest_revision.as_deref())
        else {
            warn!(
                "{} has no revisions to copy; falling back to direct update",
                target.app_name
            );
            return Ok(report(self.direct_update(target, &state, desired).await));
        };

        let outcome = match self
            .platform
            .copy_revision(target, &from_revision, &state.container_name, desired)
            .await
        {
            Ok(()) => {
                info!(
                    "Copied revision {} of {} with {}",
                    from_revision, target.app_name, desired
                );
                ReconcileOutcome::RevisionCopied { from_revision }
            }
            Err(e) => {
                warn!("Revision copy of {} failed: {:#}", target.app_name, e);
                ReconcileOutcome::FastPathFailed {
                    attempted: UpdateStrategy::RevisionCopy,
                    reason: format!("{e:#}"),
                }
            }
        };
        Ok(report(outcome))
    }

    async fn direct_update(
        &self,
        target: &ServiceTarget,
        state: &DeploymentState,
        desired: &ImageReference,
    ) -> ReconcileOutcome {
        match self
            .platform
            .update_image(target, &state.container_name, desired)
            .await
        {
            Ok(()) => {
                info!("Updated {} to {}", target.app_name, desired);
                ReconcileOutcome::Updated
            }
            Err(e) => {
                warn!("Direct update of {} failed: {:#}", target.app_name, e);
                ReconcileOutcome::FastPathFailed {
                    attempted: UpdateStrategy::DirectUpdate,
                    reason: format!("{e:#}"),
                }
            }
        }
    }

    fn registry_error(&self, source: anyhow::Error) -> DeployError {
        DeployError::Registry {
            registry: self.registry.domain().to_string(),
            source,
        }
    }
}

/// Newest revision by creation time, falling back to the platform's latest revision name
fn newest_revision(revisions: &[Revision], latest_hint: Option<&str>) -> Option<String> {
    revisions
        .iter()
        .filter(|revision| revision.created.is_some())
        .max_by_key(|revision| revision.created)
        .or_else(|| {
            latest_hint.and_then(|hint| revisions.iter().find(|revision| revision.name == hint))
        })
        .or_else(|| revisions.iter().find(|revision| revision.active))
        .or_else(|| revisions.last())
        .map(|revision| revision.name.clone())
}

pub(crate) fn platform_error(target: &ServiceTarget, source: anyhow::Error) -> DeployError {
    DeployError::Platform {
        service: target.service_key.clone(),
        environment: target.environment.clone(),
        source,
    }
}

fn error_kind(error: &DeployError) -> &'static str {
    match error {
        DeployError::BindingGrantFailure { .. } => "binding_grant_failure",
        DeployError::ImportFailure { .. } => "import_failure",
        DeployError::DesiredImageUnresolvable { .. } => "desired_image_unresolvable",
        DeployError::Registry { .. } => "registry",
        DeployError::Platform { .. } => "platform",
        DeployError::Config(_) => "config",
        DeployError::InvalidReference { .. } => "invalid_reference",
    }
}
