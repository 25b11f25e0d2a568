//! # Provider Modules
//!
//! Interfaces to the collaborators the reconciliation engine drives, and their
//! Azure implementations.
//!
//! - [`ContainerRegistry`] for repository/manifest queries and cross-registry import
//! - [`DeploymentPlatform`] for reading and updating deployment targets
//! - [`ConfigStore`] for per-environment key/value configuration
//!
//! Implementations report failures as `anyhow` errors with context; the controller
//! layer maps them into [`crate::error::DeployError`] with service, environment and
//! registry attached.

use crate::model::{DeploymentState, ImageReference, Revision, ServiceTarget};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of a pull-permission grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GrantOutcome {
    /// A new grant was recorded and has yet to propagate
    Granted,
    /// The identity already held the permission
    AlreadySatisfied,
}

impl GrantOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::AlreadySatisfied => "already_satisfied",
        }
    }
}

/// Artifact to copy into a registry
#[derive(Debug, Clone)]
pub struct ImportSource {
    /// Digest-pinned reference in the source registry
    pub reference: ImageReference,
    /// Resource ID of the source registry, when it lives in the same cloud
    pub registry_resource_id: Option<String>,
}

/// Container registry of one environment
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Login server, e.g. `acmetest.azurecr.io`
    fn domain(&self) -> &str;

    async fn repository_exists(&self, repository: &str) -> Result<bool>;

    /// Whether the registry can produce a manifest for `reference` (digest or tag)
    async fn manifest_exists(&self, repository: &str, reference: &str) -> Result<bool>;

    /// Digest of the most recently pushed manifest; `None` for an empty or absent repository
    async fn latest_digest(&self, repository: &str) -> Result<Option<String>>;

    /// Copy `source` into `target_repository`, preserving its digest, and apply `tags`.
    /// Completes only once the artifact is present.
    async fn import_image(
        &self,
        source: &ImportSource,
        target_repository: &str,
        tags: &[String],
    ) -> Result<()>;

    /// Source commit recorded in the artifact's config labels, when present
    async fn revision_label(&self, repository: &str, digest: &str) -> Result<Option<String>>;
}

/// Hosting platform that runs deployment targets
#[async_trait]
pub trait DeploymentPlatform: Send + Sync {
    /// Live state of the target; `None` when the target does not exist
    async fn get_deployment(&self, target: &ServiceTarget) -> Result<Option<DeploymentState>>;

    /// Grant registry pull to `principal_id` on `registry_scope`. Granting an
    /// already-held permission is `AlreadySatisfied`, not an error.
    async fn grant_pull_permission(
        &self,
        principal_id: &str,
        registry_scope: &str,
    ) -> Result<GrantOutcome>;

    /// Whether a pull grant for `principal_id` on `registry_scope` is visible
    async fn pull_permission_effective(
        &self,
        principal_id: &str,
        registry_scope: &str,
    ) -> Result<bool>;

    /// Add `server` to the target's registry configuration, pulling as `identity`
    async fn set_registry_binding(
        &self,
        target: &ServiceTarget,
        server: &str,
        identity: &str,
    ) -> Result<()>;

    /// In-place image update. The platform validates every image in the template.
    async fn update_image(
        &self,
        target: &ServiceTarget,
        container_name: &str,
        image: &ImageReference,
    ) -> Result<()>;

    async fn list_revisions(&self, target: &ServiceTarget) -> Result<Vec<Revision>>;

    /// New revision from `from_revision` with `image`; only `image` is validated.
    async fn copy_revision(
        &self,
        target: &ServiceTarget,
        from_revision: &str,
        container_name: &str,
        image: &ImageReference,
    ) -> Result<()>;

    /// Merge `tags` into the target's tags, leaving other tags untouched
    async fn merge_tags(&self, target: &ServiceTarget, tags: &BTreeMap<String, String>)
        -> Result<()>;
}

/// Per-environment key/value configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

// Common utilities shared across providers
pub mod common;

// Provider implementations
pub mod azure;
