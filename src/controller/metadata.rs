//! # Metadata Recorder
//!
//! Persists the identity of the last confirmed deployment as tags on the target
//! (`lastDigest`, and `lastCommit`, which is empty when the commit is unknown),
//! using a merge write that leaves unrelated tags alone.
//!
//! Registries are not a durable home for provenance: artifacts and their labels can
//! be deleted. [`read_provenance`] therefore tries the artifact's own label first and
//! falls back to these tags.

use crate::model::{DeploymentMetadata, ImageReference, ServiceTarget};
use crate::observability::metrics;
use crate::provider::{ContainerRegistry, DeploymentPlatform};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MetadataWrite {
    /// Tags were merged onto the target
    Written { metadata: DeploymentMetadata },
    /// The target already carried these values
    Unchanged,
    /// The deployed reference has no digest (e.g. the placeholder)
    Skipped,
    /// The merge write failed; the deployment itself stands
    Failed { reason: String },
}

impl MetadataWrite {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Where a commit identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvenanceSource {
    /// OCI revision label on the artifact
    ArtifactLabel,
    /// `lastCommit` tag recorded on the deployment target
    DeploymentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub commit: String,
    pub source: ProvenanceSource,
}

/// Commit that produced `reference`: the artifact's label, else `metadata`'s
/// `lastCommit` when it was recorded for the same digest.
pub async fn read_provenance(
    registry: &dyn ContainerRegistry,
    reference: &ImageReference,
    metadata: &DeploymentMetadata,
) -> Option<Provenance> {
    if let Some(digest) = &reference.digest {
        if reference.is_hosted_by(registry.domain()) {
            match registry.revision_label(&reference.repository, digest).await {
                Ok(Some(commit)) => {
                    return Some(Provenance {
                        commit,
                        source: ProvenanceSource::ArtifactLabel,
                    })
                }
                Ok(None) => debug!("{} carries no revision label", reference),
                Err(e) => debug!("Revision label lookup for {} failed: {:#}", reference, e),
            }
        }
    }

    if reference.digest.is_none() || metadata.last_digest != reference.digest {
        return None;
    }
    metadata.last_commit.clone().map(|commit| Provenance {
        commit,
        source: ProvenanceSource::DeploymentMetadata,
    })
}

pub struct MetadataRecorder<'a> {
    registry: &'a dyn ContainerRegistry,
    platform: &'a dyn DeploymentPlatform,
}

impl std::fmt::Debug for MetadataRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRecorder")
            .field("registry", &self.registry.domain())
            .finish_non_exhaustive()
    }
}

impl<'a> MetadataRecorder<'a> {
    #[must_use]
    pub fn new(registry: &'a dyn ContainerRegistry, platform: &'a dyn DeploymentPlatform) -> Self {
        Self { registry, platform }
    }

    /// Record `deployed` on `target` after a confirmed deployment.
    ///
    /// `live_tags` are the target's tags as read this run. `known_commit` skips the
    /// label lookup when the caller already resolved provenance.
    pub async fn record(
        &self,
        target: &ServiceTarget,
        deployed: &ImageReference,
        live_tags: &BTreeMap<String, String>,
        known_commit: Option<String>,
    ) -> MetadataWrite {
        let span = info_span!(
            "metadata.record",
            service.key = %target.service_key,
            environment = %target.environment,
            metadata.outcome = tracing::field::Empty
        );
        let span_clone = span.clone();

        async move {
            let outcome = self.record_inner(target, deployed, live_tags, known_commit).await;
            span_clone.record("metadata.outcome", outcome.as_str());
            metrics::increment_metadata_writes(outcome.as_str());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn record_inner(
        &self,
        target: &ServiceTarget,
        deployed: &ImageReference,
        live_tags: &BTreeMap<String, String>,
        known_commit: Option<String>,
    ) -> MetadataWrite {
        let Some(digest) = deployed.digest.clone() else {
            debug!("{} is not digest-pinned; nothing to record", deployed);
            return MetadataWrite::Skipped;
        };

        // A recorded commit is kept only for the digest it was recorded with
        let last_commit = match known_commit {
            Some(commit) => Some(commit),
            None => read_provenance(
                self.registry,
                deployed,
                &DeploymentMetadata::from_tags(live_tags),
            )
            .await
            .map(|provenance| provenance.commit),
        };

        let metadata = DeploymentMetadata {
            last_digest: Some(digest),
            last_commit,
        };

        if metadata.is_recorded_in(live_tags) {
            debug!("{} already records {}", target.app_name, deployed);
            return MetadataWrite::Unchanged;
        }

        match self.platform.merge_tags(target, &metadata.to_tags()).await {
            Ok(()) => {
                info!(
                    "Recorded lastDigest{} on {}",
                    if metadata.last_commit.is_some() {
                        " and lastCommit"
                    } else {
                        ""
                    },
                    target.app_name
                );
                MetadataWrite::Written { metadata }
            }
            Err(e) => {
                warn!("Failed to record metadata on {}: {:#}", target.app_name, e);
                MetadataWrite::Failed {
                    reason: format!("{e:#}"),
                }
            }
        }
    }
}
