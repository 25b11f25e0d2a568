//! # Registry Binder
//!
//! Makes sure a deployment target can pull from its environment's registry.
//!
//! A target whose registry configuration already lists the registry with the
//! configured identity is left alone: no grant, no binding, no wait. Otherwise the target's identity is granted pull
//! permission, the binding is set, and the propagation policy runs if the grant
//! was new.

use super::propagation::PropagationPolicy;
use crate::error::DeployError;
use crate::model::{DeploymentState, ServiceTarget};
use crate::observability::metrics;
use crate::provider::{DeploymentPlatform, GrantOutcome};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BindingOutcome {
    /// The registry was already configured on the target for this identity
    AlreadyBound,
    /// A binding was added in this call
    Bound {
        grant: GrantOutcome,
        /// Time spent waiting for the grant to propagate
        waited_ms: u64,
    },
}

impl BindingOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyBound => "already_bound",
            Self::Bound { .. } => "bound",
        }
    }
}

pub struct RegistryBinder<'a> {
    platform: &'a dyn DeploymentPlatform,
    policy: &'a dyn PropagationPolicy,
    /// Resource ID the pull permission is granted on
    registry_scope: &'a str,
    /// `system` or a user identity resource ID
    binding_identity: &'a str,
}

impl std::fmt::Debug for RegistryBinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBinder")
            .field("registry_scope", &self.registry_scope)
            .field("binding_identity", &self.binding_identity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> RegistryBinder<'a> {
    #[must_use]
    pub fn new(
        platform: &'a dyn DeploymentPlatform,
        policy: &'a dyn PropagationPolicy,
        registry_scope: &'a str,
        binding_identity: &'a str,
    ) -> Self {
        Self {
            platform,
            policy,
            registry_scope,
            binding_identity,
        }
    }

    /// Ensure `target` can pull from its registry, given its freshly read `state`.
    ///
    /// # Errors
    /// Returns [`DeployError::BindingGrantFailure`] when the grant or the binding call
    /// fails, or the target has no identity to grant to.
    pub async fn ensure(
        &self,
        target: &ServiceTarget,
        state: &DeploymentState,
    ) -> Result<BindingOutcome, DeployError> {
        let span = info_span!(
            "binder.ensure",
            service.key = %target.service_key,
            environment = %target.environment,
            registry = %target.registry_domain,
            binding.outcome = tracing::field::Empty,
            grant.outcome = tracing::field::Empty
        );
        let span_clone = span.clone();

        async move {
            if state.registry_bound_as(&target.registry_domain, self.binding_identity) {
                span_clone.record("binding.outcome", "already_bound");
                metrics::increment_registry_bindings("already_bound");
                return Ok(BindingOutcome::AlreadyBound);
            }

            let failure = |source: anyhow::Error| DeployError::BindingGrantFailure {
                service: target.service_key.clone(),
                environment: target.environment.clone(),
                registry: target.registry_domain.clone(),
                source,
            };

            let principal_id = state
                .identity
                .principal_id
                .as_deref()
                .ok_or_else(|| failure(anyhow::anyhow!("deployment target has no identity principal")))?;

            info!(
                "Binding {} to registry {} (identity {})",
                target.app_name, target.registry_domain, self.binding_identity
            );

            let grant = self
                .platform
                .grant_pull_permission(principal_id, self.registry_scope)
                .await
                .map_err(failure)?;
            span_clone.record("grant.outcome", grant.as_str());
            metrics::increment_permission_grants(grant.as_str());

            self.platform
                .set_registry_binding(target, &target.registry_domain, self.binding_identity)
                .await
                .map_err(failure)?;

            let waited = match grant {
                GrantOutcome::Granted => {
                    self.policy
                        .await_propagation(self.platform, principal_id, self.registry_scope)
                        .await
                }
                GrantOutcome::AlreadySatisfied => std::time::Duration::ZERO,
            };

            span_clone.record("binding.outcome", "bound");
            metrics::increment_registry_bindings("bound");
            Ok(BindingOutcome::Bound {
                grant,
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            })
        }
        .instrument(span)
        .await
    }
}
