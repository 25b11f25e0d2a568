//! # Deployment State
//!
//! Live state of a deployment target as read from the platform, plus the
//! durable metadata tags this system maintains on it.

use super::ImageReference;
use crate::constants::{TAG_LAST_COMMIT, TAG_LAST_DIGEST};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Who the deployment target pulls images as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityKind {
    /// Identity created and owned by the platform for this target
    PlatformManaged,
    /// Identity supplied by the operator and attached to the target
    UserSupplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentIdentity {
    pub kind: IdentityKind,
    /// Principal the pull permission is granted to
    pub principal_id: Option<String>,
    /// Resource ID of a user-supplied identity; `None` means the platform identity
    pub resource_id: Option<String>,
}

/// One entry of the target's registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryBinding {
    pub server: String,
    /// `system` or an identity resource ID
    pub identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Read fresh from the platform on every reconciliation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    /// Currently deployed image; `None` when the platform reports an unparsable reference
    pub image: Option<ImageReference>,
    /// Container whose image this system manages
    pub container_name: String,
    pub registries: Vec<RegistryBinding>,
    pub identity: DeploymentIdentity,
    pub tags: BTreeMap<String, String>,
    pub latest_revision: Option<String>,
}

impl DeploymentState {
    /// Whether the registry configuration already lists `registry_domain`.
    #[must_use]
    pub fn registry_binding_present(&self, registry_domain: &str) -> bool {
        self.registries
            .iter()
            .any(|binding| binding.server.eq_ignore_ascii_case(registry_domain))
    }

    /// Whether the registry configuration lists `registry_domain` bound to `identity`
    /// (`system` or an identity resource ID). An identity change needs a new binding.
    #[must_use]
    pub fn registry_bound_as(&self, registry_domain: &str, identity: &str) -> bool {
        self.registries.iter().any(|binding| {
            binding.server.eq_ignore_ascii_case(registry_domain)
                && binding
                    .identity
                    .as_deref()
                    .is_some_and(|bound| bound.eq_ignore_ascii_case(identity))
        })
    }

    #[must_use]
    pub fn metadata(&self) -> DeploymentMetadata {
        DeploymentMetadata::from_tags(&self.tags)
    }
}

/// Provenance of the last confirmed deployment, kept as tags on the target.
/// Survives registry-side artifact deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub last_digest: Option<String>,
    pub last_commit: Option<String>,
}

impl DeploymentMetadata {
    #[must_use]
    pub fn from_tags(tags: &BTreeMap<String, String>) -> Self {
        let non_empty = |key: &str| tags.get(key).filter(|value| !value.is_empty()).cloned();
        Self {
            last_digest: non_empty(TAG_LAST_DIGEST),
            last_commit: non_empty(TAG_LAST_COMMIT),
        }
    }

    /// Tags to merge onto the target.
    ///
    /// With a digest present, `lastCommit` is always written so a merge never leaves
    /// the previous digest's commit next to a new digest; an unknown commit is empty.
    #[must_use]
    pub fn to_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if let Some(digest) = &self.last_digest {
            tags.insert(TAG_LAST_DIGEST.to_string(), digest.clone());
            tags.insert(
                TAG_LAST_COMMIT.to_string(),
                self.last_commit.clone().unwrap_or_default(),
            );
        }
        tags
    }

    /// Whether every tag this metadata would write already holds the same value.
    #[must_use]
    pub fn is_recorded_in(&self, tags: &BTreeMap<String, String>) -> bool {
        self.to_tags()
            .iter()
            .all(|(key, value)| tags.get(key) == Some(value))
    }
}
