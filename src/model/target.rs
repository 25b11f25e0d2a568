//! # Service Targets
//!
//! One deployable unit: a service key deployed into one environment.
//! Computed per invocation from the environment configuration, never persisted.

use crate::constants::MAX_APP_NAME_LEN;
use crate::error::DeployError;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Lowercase letters, digits and inner hyphens
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$").expect("identifier pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTarget {
    /// Stable lowercase identifier, e.g. `acme-billing`
    pub service_key: String,
    /// Stage name, e.g. `test`
    pub environment: String,
    /// Container app name: `{environment}-{service key without prefix}`
    pub app_name: String,
    /// Repository in the environment's registry: `{namespace}/{service key}-{environment}`
    pub registry_repository: String,
    /// Login server of the environment's registry
    pub registry_domain: String,
}

impl ServiceTarget {
    /// Derive a target from a service key and environment settings.
    ///
    /// `service_prefix` (e.g. `acme`) is stripped from the key when building the app name
    /// so `acme-billing` in `test` becomes `test-billing`.
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] for keys that are not lowercase `[a-z0-9-]`,
    /// or when the derived app name exceeds the platform limit.
    pub fn new(
        service_key: &str,
        environment: &str,
        service_prefix: Option<&str>,
        registry_namespace: &str,
        registry_domain: &str,
    ) -> Result<Self, DeployError> {
        validate_identifier("service key", service_key)?;
        validate_identifier("environment", environment)?;

        let suffix = service_prefix
            .filter(|prefix| !prefix.is_empty())
            .and_then(|prefix| service_key.strip_prefix(&format!("{prefix}-")))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(service_key);

        let app_name = format!("{environment}-{suffix}");
        if app_name.len() > MAX_APP_NAME_LEN {
            return Err(DeployError::Config(format!(
                "app name '{app_name}' exceeds {MAX_APP_NAME_LEN} characters"
            )));
        }

        let namespace = registry_namespace.trim_matches('/');
        let registry_repository = if namespace.is_empty() {
            format!("{service_key}-{environment}")
        } else {
            format!("{namespace}/{service_key}-{environment}")
        };

        Ok(Self {
            service_key: service_key.to_string(),
            environment: environment.to_string(),
            app_name,
            registry_repository,
            registry_domain: registry_domain.to_lowercase(),
        })
    }

    /// Key of this service's image binding in the environment config store.
    #[must_use]
    pub fn image_config_key(&self) -> String {
        image_config_key(&self.service_key)
    }
}

/// `IMAGE_<SERVICE_KEY>` in upper snake case.
#[must_use]
pub fn image_config_key(service_key: &str) -> String {
    format!("IMAGE_{}", service_key.to_uppercase().replace('-', "_"))
}

fn validate_identifier(what: &str, value: &str) -> Result<(), DeployError> {
    if IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(DeployError::Config(format!(
            "{what} '{value}' must be lowercase letters, digits and '-'"
        )))
    }
}
