//! # Deployer
//!
//! Entry points wiring the components together for one service:
//!
//! - [`Deployer::deploy`]: resolve, reconcile, record metadata
//! - [`Deployer::promote`]: import from the previous environment, reconcile, record
//! - [`Deployer::status`]: read-only view of a target
//!
//! Runs are sequential. Callers serialize runs per (service, environment).

use super::binder::RegistryBinder;
use super::metadata::{read_provenance, MetadataRecorder, MetadataWrite, Provenance};
use super::promotion::{ImportOutcome, PromotionImporter};
use super::propagation::{self, PropagationPolicy};
use super::reconciler::{
    platform_error, validate_reference, ReconcileReport, Reconciler, ReferenceValidity,
};
use super::resolver::{ImageResolver, ResolutionSource, ResolvedImage};
use crate::config::{DeployerConfig, EnvironmentConfig};
use crate::error::DeployError;
use crate::model::{DeploymentMetadata, DeploymentState, ImageReference, ServiceTarget};
use crate::provider::{ConfigStore, ContainerRegistry, DeploymentPlatform, ImportSource};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One environment's configuration and collaborators
pub struct EnvironmentContext {
    pub config: EnvironmentConfig,
    pub registry: Arc<dyn ContainerRegistry>,
    pub platform: Arc<dyn DeploymentPlatform>,
    pub store: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for EnvironmentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentContext")
            .field("environment", &self.config.environment)
            .field("registry", &self.registry.domain())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub target: ServiceTarget,
    pub resolved: ResolvedImage,
    pub reconcile: ReconcileReport,
    /// `None` when the fast path did not succeed
    pub metadata: Option<MetadataWrite>,
}

impl DeployReport {
    #[must_use]
    pub fn fast_path_succeeded(&self) -> bool {
        self.reconcile.fast_path_succeeded()
    }
}

/// Commits bounding a promotion, for changelog tooling
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRange {
    /// Commit running in the target environment before the promotion
    pub from_commit: Option<Provenance>,
    /// Commit being promoted
    pub to_commit: Option<Provenance>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReport {
    pub target: ServiceTarget,
    pub source_environment: String,
    pub source: ImageReference,
    pub imported: ImageReference,
    pub import: ImportOutcome,
    pub reconcile: ReconcileReport,
    pub metadata: Option<MetadataWrite>,
    pub change_range: ChangeRange,
}

impl PromotionReport {
    #[must_use]
    pub fn fast_path_succeeded(&self) -> bool {
        self.reconcile.fast_path_succeeded()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub target: ServiceTarget,
    /// Value of `IMAGE_<SERVICE_KEY>` in the environment's store
    pub configured_image: Option<String>,
    /// `None` when the target does not exist
    pub deployment: Option<DeploymentState>,
    /// Registry bound with the environment's configured identity
    pub registry_binding_present: bool,
    pub deployed_validity: Option<ReferenceValidity>,
    pub metadata: DeploymentMetadata,
}

pub struct Deployer {
    policy: Arc<dyn PropagationPolicy>,
    placeholder: ImageReference,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("policy", &self.policy)
            .field("placeholder", &self.placeholder.to_string())
            .finish()
    }
}

impl Deployer {
    #[must_use]
    pub fn new(policy: Arc<dyn PropagationPolicy>, placeholder: ImageReference) -> Self {
        Self {
            policy,
            placeholder,
        }
    }

    /// # Errors
    /// Returns [`DeployError::InvalidReference`] when `PLACEHOLDER_IMAGE` does not parse
    pub fn from_config(config: &DeployerConfig) -> Result<Self, DeployError> {
        Ok(Self::new(
            propagation::from_config(config),
            ImageReference::parse(&config.placeholder_image)?,
        ))
    }

    /// Resolve and reconcile `service_key` in `env`, then record metadata.
    ///
    /// # Errors
    /// Propagates [`DeployError`] from target derivation and reconciliation.
    pub async fn deploy(
        &self,
        env: &EnvironmentContext,
        service_key: &str,
        explicit: Option<&ImageReference>,
    ) -> Result<DeployReport, DeployError> {
        let target = env.config.target(service_key)?;

        let resolved = ImageResolver::new(&*env.registry, &*env.store, &self.placeholder)
            .resolve(&target, explicit)
            .await;

        let reconcile = self.reconcile(env, &target, &resolved).await?;

        let metadata = if reconcile.fast_path_succeeded() {
            Some(
                MetadataRecorder::new(&*env.registry, &*env.platform)
                    .record(&target, &reconcile.desired, &reconcile.live_tags, None)
                    .await,
            )
        } else {
            None
        };

        Ok(DeployReport {
            target,
            resolved,
            reconcile,
            metadata,
        })
    }

    /// Promote `service_key` from `from` into `to`.
    ///
    /// The artifact currently deployed in `from` (or pinned in its store) is imported
    /// into `to`'s registry by digest, pinned in `to`'s store and reconciled.
    ///
    /// # Errors
    /// - [`DeployError::Config`] when `from` has no digest-pinned image for the service
    /// - [`DeployError::ImportFailure`] when the import fails; nothing is deployed
    /// - anything [`Deployer::deploy`] can return
    pub async fn promote(
        &self,
        from: &EnvironmentContext,
        to: &EnvironmentContext,
        service_key: &str,
    ) -> Result<PromotionReport, DeployError> {
        let source_target = from.config.target(service_key)?;
        let target = to.config.target(service_key)?;

        let (source, source_metadata) = promotion_source(from, &source_target).await?;
        info!(
            "Promoting {} from {} to {}: {}",
            service_key, from.config.environment, to.config.environment, source
        );

        let import_source = ImportSource {
            registry_resource_id: source
                .is_hosted_by(&from.config.registry_domain)
                .then(|| from.config.registry_resource_id()),
            reference: source.clone(),
        };
        let (imported, import) = PromotionImporter::new(&*to.registry)
            .import(&target, &import_source, Utc::now())
            .await?;

        if let Err(e) = to
            .store
            .set(&target.image_config_key(), &imported.to_string())
            .await
        {
            warn!(
                "Failed to pin {} in {} config: {:#}",
                imported, to.config.environment, e
            );
        }

        let to_commit = match read_provenance(
            &*to.registry,
            &imported,
            &DeploymentMetadata::default(),
        )
        .await
        {
            Some(provenance) => Some(provenance),
            None => read_provenance(&*from.registry, &source, &source_metadata).await,
        };

        let resolved = ResolvedImage::new(&target, imported.clone(), ResolutionSource::Promoted);
        let reconcile = self.reconcile(to, &target, &resolved).await?;

        let from_commit = match &reconcile.previous {
            Some(previous) => {
                read_provenance(
                    &*to.registry,
                    previous,
                    &DeploymentMetadata::from_tags(&reconcile.live_tags),
                )
                .await
            }
            None => None,
        };

        let metadata = if reconcile.fast_path_succeeded() {
            Some(
                MetadataRecorder::new(&*to.registry, &*to.platform)
                    .record(
                        &target,
                        &imported,
                        &reconcile.live_tags,
                        to_commit.as_ref().map(|p| p.commit.clone()),
                    )
                    .await,
            )
        } else {
            None
        };

        Ok(PromotionReport {
            target,
            source_environment: from.config.environment.clone(),
            source,
            imported,
            import,
            reconcile,
            metadata,
            change_range: ChangeRange {
                from_commit,
                to_commit,
            },
        })
    }

    /// Read-only view of `service_key` in `env`.
    ///
    /// # Errors
    /// Returns [`DeployError::Platform`] or [`DeployError::Registry`] when a read fails.
    pub async fn status(
        &self,
        env: &EnvironmentContext,
        service_key: &str,
    ) -> Result<StatusReport, DeployError> {
        let target = env.config.target(service_key)?;

        let configured_image = env
            .store
            .get(&target.image_config_key())
            .await
            .map_err(|e| DeployError::Config(format!("{e:#}")))?;

        let deployment = env
            .platform
            .get_deployment(&target)
            .await
            .map_err(|e| platform_error(&target, e))?;

        let deployed_validity = match deployment.as_ref().and_then(|d| d.image.as_ref()) {
            Some(reference) => Some(
                validate_reference(&*env.registry, reference)
                    .await
                    .map_err(|e| DeployError::Registry {
                        registry: env.registry.domain().to_string(),
                        source: e,
                    })?,
            ),
            None => None,
        };

        Ok(StatusReport {
            registry_binding_present: deployment
                .as_ref()
                .is_some_and(|d| {
                    d.registry_bound_as(&target.registry_domain, &env.config.binding_identity())
                }),
            metadata: deployment
                .as_ref()
                .map(DeploymentState::metadata)
                .unwrap_or_default(),
            target,
            configured_image,
            deployment,
            deployed_validity,
        })
    }

    async fn reconcile(
        &self,
        env: &EnvironmentContext,
        target: &ServiceTarget,
        resolved: &ResolvedImage,
    ) -> Result<ReconcileReport, DeployError> {
        let registry_scope = env.config.registry_resource_id();
        let binding_identity = env.config.binding_identity();
        let binder = RegistryBinder::new(
            &*env.platform,
            &*self.policy,
            &registry_scope,
            &binding_identity,
        );
        Reconciler::new(&*env.registry, &*env.platform, binder)
            .reconcile(target, resolved)
            .await
    }
}

/// Digest-pinned image to promote from `from`: the live deployment's image, else the
/// store's pin. Also returns the source target's recorded metadata.
async fn promotion_source(
    from: &EnvironmentContext,
    source_target: &ServiceTarget,
) -> Result<(ImageReference, DeploymentMetadata), DeployError> {
    let state = from
        .platform
        .get_deployment(source_target)
        .await
        .map_err(|e| platform_error(source_target, e))?;

    let metadata = state
        .as_ref()
        .map(DeploymentState::metadata)
        .unwrap_or_default();

    if let Some(image) = state
        .and_then(|s| s.image)
        .filter(ImageReference::is_digest_pinned)
    {
        return Ok((image, metadata));
    }

    let configured = from
        .store
        .get(&source_target.image_config_key())
        .await
        .map_err(|e| DeployError::Config(format!("{e:#}")))?;
    if let Some(value) = configured {
        let reference = ImageReference::parse(&value)?;
        if reference.is_digest_pinned() {
            return Ok((reference, metadata));
        }
    }

    Err(DeployError::Config(format!(
        "no digest-pinned image for {} in {}",
        source_target.service_key, source_target.environment
    )))
}
