//! # Image Resolver
//!
//! Picks the one image reference to deploy for a service target.
//!
//! Resolution order, first match wins:
//! 1. an explicit reference supplied for this invocation, used verbatim
//! 2. a digest-pinned reference already configured for the target, kept unchanged
//! 3. the most recently pushed digest in the target's registry repository
//! 4. the public placeholder image
//!
//! Resolution never fails: registry errors degrade to the next rule and rule 4
//! always applies. Rules 1 (digest-pinned only) and 3 write the chosen reference
//! back to the environment's configuration store so later runs stay on it.

use crate::model::{ImageReference, ServiceTarget};
use crate::observability::metrics;
use crate::provider::{ConfigStore, ContainerRegistry};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

/// Which rule produced the resolved reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionSource {
    Explicit,
    Pinned,
    LatestInRegistry,
    Placeholder,
    /// Imported from the previous environment by promotion
    Promoted,
}

impl ResolutionSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Pinned => "pinned",
            Self::LatestInRegistry => "latest_in_registry",
            Self::Placeholder => "placeholder",
            Self::Promoted => "promoted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImage {
    pub reference: ImageReference,
    /// Whether the target must be able to pull from its environment's registry
    pub requires_registry_access: bool,
    pub source: ResolutionSource,
}

impl ResolvedImage {
    /// A reference chosen outside the resolver (e.g. by promotion)
    #[must_use]
    pub fn new(target: &ServiceTarget, reference: ImageReference, source: ResolutionSource) -> Self {
        Self {
            requires_registry_access: reference.is_hosted_by(&target.registry_domain),
            reference,
            source,
        }
    }
}

#[derive(Clone, Copy)]
pub struct ImageResolver<'a> {
    registry: &'a dyn ContainerRegistry,
    store: &'a dyn ConfigStore,
    placeholder: &'a ImageReference,
}

impl std::fmt::Debug for ImageResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResolver")
            .field("registry", &self.registry.domain())
            .field("placeholder", &self.placeholder.to_string())
            .finish_non_exhaustive()
    }
}

impl<'a> ImageResolver<'a> {
    #[must_use]
    pub fn new(
        registry: &'a dyn ContainerRegistry,
        store: &'a dyn ConfigStore,
        placeholder: &'a ImageReference,
    ) -> Self {
        Self {
            registry,
            store,
            placeholder,
        }
    }

    pub async fn resolve(
        &self,
        target: &ServiceTarget,
        explicit: Option<&ImageReference>,
    ) -> ResolvedImage {
        let span = info_span!(
            "resolver.resolve",
            service.key = %target.service_key,
            environment = %target.environment,
            resolution.source = tracing::field::Empty,
            image.reference = tracing::field::Empty
        );
        let span_clone = span.clone();

        async move {
            let resolved = self.resolve_inner(target, explicit).await;
            span_clone.record("resolution.source", resolved.source.as_str());
            span_clone.record("image.reference", resolved.reference.to_string());
            metrics::increment_image_resolutions(resolved.source.as_str());
            info!(
                "Resolved {} for {} in {} ({})",
                resolved.reference,
                target.service_key,
                target.environment,
                resolved.source.as_str()
            );
            resolved
        }
        .instrument(span)
        .await
    }

    async fn resolve_inner(
        &self,
        target: &ServiceTarget,
        explicit: Option<&ImageReference>,
    ) -> ResolvedImage {
        let config_key = target.image_config_key();

        if let Some(reference) = explicit {
            if reference.is_digest_pinned() {
                self.write_back(&config_key, reference).await;
            }
            return ResolvedImage::new(target, reference.clone(), ResolutionSource::Explicit);
        }

        if let Some(pinned) = self.configured_pin(&config_key).await {
            return ResolvedImage::new(target, pinned, ResolutionSource::Pinned);
        }

        match self.registry.latest_digest(&target.registry_repository).await {
            Ok(Some(digest)) => {
                let reference = ImageReference::with_digest(
                    &target.registry_domain,
                    &target.registry_repository,
                    digest,
                );
                self.write_back(&config_key, &reference).await;
                return ResolvedImage::new(target, reference, ResolutionSource::LatestInRegistry);
            }
            Ok(None) => debug!(
                "Repository {} in {} has no artifacts",
                target.registry_repository, target.registry_domain
            ),
            Err(e) => warn!(
                "Failed to query latest artifact in {}/{}: {:#}; using placeholder",
                target.registry_domain, target.registry_repository, e
            ),
        }

        ResolvedImage {
            reference: self.placeholder.clone(),
            requires_registry_access: false,
            source: ResolutionSource::Placeholder,
        }
    }

    /// Configured value for the target, when it parses and is digest-pinned
    async fn configured_pin(&self, config_key: &str) -> Option<ImageReference> {
        let value = match self.store.get(config_key).await {
            Ok(Some(value)) if !value.trim().is_empty() => value,
            Ok(_) => return None,
            Err(e) => {
                warn!("Failed to read {}: {:#}", config_key, e);
                return None;
            }
        };

        match ImageReference::parse(&value) {
            Ok(reference) if reference.is_digest_pinned() => Some(reference),
            Ok(_) => {
                debug!("{} is tag-addressed; not treated as a pin", config_key);
                None
            }
            Err(e) => {
                warn!("Ignoring unparsable {}: {}", config_key, e);
                None
            }
        }
    }

    async fn write_back(&self, config_key: &str, reference: &ImageReference) {
        if let Err(e) = self.store.set(config_key, &reference.to_string()).await {
            warn!("Failed to persist {}={}: {:#}", config_key, reference, e);
        }
    }
}
