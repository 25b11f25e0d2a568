//! # Environment Configuration
//!
//! Per-environment settings read from that environment's configuration store,
//! and the ordered chain environments are promoted along.

use crate::constants::{ACR_DOMAIN_SUFFIX, DEFAULT_ENVIRONMENTS};
use crate::error::DeployError;
use crate::model::{IdentityKind, ServiceTarget};
use crate::provider::ConfigStore;

/// Ordered environments, base first (e.g. `dev,test,prod`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentChain {
    environments: Vec<String>,
}

impl EnvironmentChain {
    /// # Errors
    /// Returns [`DeployError::Config`] for an empty chain or a repeated environment.
    pub fn new<I, S>(environments: I) -> Result<Self, DeployError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chain = Vec::new();
        for env in environments {
            let env = env.as_ref().trim();
            if env.is_empty() {
                continue;
            }
            if chain.iter().any(|existing| existing == env) {
                return Err(DeployError::Config(format!(
                    "environment '{env}' appears twice in DEPLOY_ENVIRONMENTS"
                )));
            }
            chain.push(env.to_string());
        }
        if chain.is_empty() {
            return Err(DeployError::Config(
                "DEPLOY_ENVIRONMENTS must name at least one environment".to_string(),
            ));
        }
        Ok(Self {
            environments: chain,
        })
    }

    /// The environment images are first built into
    #[must_use]
    pub fn base(&self) -> &str {
        // Non-empty by construction
        self.environments.first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn contains(&self, environment: &str) -> bool {
        self.environments.iter().any(|env| env == environment)
    }

    /// Promotion source for `environment`: the one before it in the chain.
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] for unknown environments and for the base
    /// environment, which has nothing to promote from.
    pub fn previous(&self, environment: &str) -> Result<&str, DeployError> {
        let position = self
            .environments
            .iter()
            .position(|env| env == environment)
            .ok_or_else(|| {
                DeployError::Config(format!(
                    "unknown environment '{environment}' (chain: {})",
                    self.environments.join(",")
                ))
            })?;
        if position == 0 {
            return Err(DeployError::Config(format!(
                "'{environment}' is the base environment and cannot be promoted into"
            )));
        }
        Ok(&self.environments[position - 1])
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(String::as_str)
    }
}

impl Default for EnvironmentChain {
    fn default() -> Self {
        Self {
            environments: DEFAULT_ENVIRONMENTS
                .split(',')
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl std::str::FromStr for EnvironmentChain {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(','))
    }
}

/// Settings of one environment, from its configuration store
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// Registry resource name, e.g. `acmetest`
    pub registry_name: String,
    /// Resource group of the registry; defaults to `resource_group`
    pub registry_resource_group: String,
    /// Registry login server, e.g. `acmetest.azurecr.io`
    pub registry_domain: String,
    pub registry_namespace: String,
    pub service_prefix: Option<String>,
    pub identity_kind: IdentityKind,
    /// Resource ID of the user-assigned identity when `identity_kind` is user-supplied
    pub user_identity_id: Option<String>,
}

impl EnvironmentConfig {
    /// Load an environment's settings from its store
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] when a required key is missing or invalid.
    pub async fn from_store(
        environment: &str,
        store: &dyn ConfigStore,
    ) -> Result<Self, DeployError> {
        let read = |key: &'static str| async move {
            store
                .get(key)
                .await
                .map_err(|e| DeployError::Config(format!("reading {key} for {environment}: {e:#}")))
        };
        let require = |key: &'static str| async move {
            read(key).await?.filter(|v| !v.is_empty()).ok_or_else(|| {
                DeployError::Config(format!("{key} is not set for environment '{environment}'"))
            })
        };

        let subscription_id = require("SUBSCRIPTION_ID").await?;
        let resource_group = require("RESOURCE_GROUP").await?;
        let registry_name = require("REGISTRY_NAME").await?;
        let registry_resource_group = read("REGISTRY_RESOURCE_GROUP")
            .await?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| resource_group.clone());
        let registry_namespace = read("REGISTRY_NAMESPACE").await?.unwrap_or_default();
        let service_prefix = read("SERVICE_PREFIX").await?.filter(|v| !v.is_empty());

        let identity_kind = match read("IDENTITY_KIND").await?.as_deref().map(str::trim) {
            None | Some("" | "system") => IdentityKind::PlatformManaged,
            Some("user") => IdentityKind::UserSupplied,
            Some(other) => {
                return Err(DeployError::Config(format!(
                    "IDENTITY_KIND must be 'system' or 'user' for '{environment}', got '{other}'"
                )))
            }
        };
        let user_identity_id = read("USER_IDENTITY_ID").await?.filter(|v| !v.is_empty());
        if identity_kind == IdentityKind::UserSupplied && user_identity_id.is_none() {
            return Err(DeployError::Config(format!(
                "USER_IDENTITY_ID is required when IDENTITY_KIND=user for '{environment}'"
            )));
        }

        let registry_domain = registry_domain_for(&registry_name);

        Ok(Self {
            environment: environment.to_string(),
            subscription_id,
            resource_group,
            registry_name,
            registry_resource_group,
            registry_domain,
            registry_namespace,
            service_prefix,
            identity_kind,
            user_identity_id,
        })
    }

    /// Resource ID of this environment's registry
    #[must_use]
    pub fn registry_resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerRegistry/registries/{}",
            self.subscription_id, self.registry_resource_group, self.registry_name
        )
    }

    /// Identity value for the registry binding: `system` or the user identity resource ID
    #[must_use]
    pub fn binding_identity(&self) -> String {
        match (&self.identity_kind, &self.user_identity_id) {
            (IdentityKind::UserSupplied, Some(id)) => id.clone(),
            _ => "system".to_string(),
        }
    }

    /// # Errors
    /// See [`ServiceTarget::new`].
    pub fn target(&self, service_key: &str) -> Result<ServiceTarget, DeployError> {
        ServiceTarget::new(
            service_key,
            &self.environment,
            self.service_prefix.as_deref(),
            &self.registry_namespace,
            &self.registry_domain,
        )
    }
}

/// `acmetest` becomes `acmetest.azurecr.io`; a full login server is kept as is.
fn registry_domain_for(registry_name: &str) -> String {
    if registry_name.contains('.') {
        registry_name.to_lowercase()
    } else {
        format!("{}.{ACR_DOMAIN_SUFFIX}", registry_name.to_lowercase())
    }
}
