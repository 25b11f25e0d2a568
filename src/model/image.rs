//! # Image References
//!
//! Registry-qualified pointers to deployable images.
//!
//! A reference is either digest-addressed (`domain/repo@sha256:...`, preferred) or
//! tag-addressed (`domain/repo:tag`). Whether the registry can still produce a manifest
//! for it is a property of the registry at a point in time, so nothing here caches
//! resolvability; see [`crate::controller::reconciler::validate_reference`].

use crate::error::DeployError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static DIGEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sha256:[a-f0-9]{64}$").expect("digest pattern is a valid regex")
});

static REPOSITORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
        .expect("repository pattern is a valid regex")
});

/// Registry domain assumed for references written without one (Docker convention)
const DEFAULT_DOMAIN: &str = "docker.io";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub registry_domain: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ImageReference {
    /// Parse `domain/repo[:tag][@sha256:hex]`.
    ///
    /// The first path segment is treated as a registry domain when it contains a `.` or
    /// `:` or is `localhost`; otherwise the Docker Hub defaults apply. When both a tag
    /// and a digest are present the digest wins and the tag is kept for display only.
    ///
    /// # Errors
    /// Returns [`DeployError::InvalidReference`] for empty input, malformed digests or
    /// repository names.
    pub fn parse(input: &str) -> Result<Self, DeployError> {
        let input = input.trim();
        let invalid = |reason: &str| DeployError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name_and_tag, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_PATTERN.is_match(digest) {
                    return Err(invalid("digest must be sha256:<64 lowercase hex>"));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' after the last '/' is a tag separator; one before it belongs to a host:port
        let last_slash = name_and_tag.rfind('/');
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => (
                &name_and_tag[..colon],
                Some(name_and_tag[colon + 1..].to_string()),
            ),
            _ => (name_and_tag, None),
        };

        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        let (registry_domain, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_lowercase(), rest.to_string())
            }
            Some(_) => (DEFAULT_DOMAIN.to_string(), name.to_string()),
            None => (DEFAULT_DOMAIN.to_string(), format!("library/{name}")),
        };

        if !REPOSITORY_PATTERN.is_match(&repository) {
            return Err(invalid("repository must be lowercase path components"));
        }

        if digest.is_none() && tag.is_none() {
            return Ok(Self {
                registry_domain,
                repository,
                digest: None,
                tag: Some("latest".to_string()),
            });
        }

        Ok(Self {
            registry_domain,
            repository,
            digest,
            tag,
        })
    }

    /// Digest-addressed reference in `domain/repository`.
    #[must_use]
    pub fn with_digest(
        registry_domain: impl Into<String>,
        repository: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            registry_domain: registry_domain.into().to_lowercase(),
            repository: repository.into(),
            digest: Some(digest.into()),
            tag: None,
        }
    }

    #[must_use]
    pub fn is_digest_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// The manifest reference the registry is asked about: digest if known, else tag.
    #[must_use]
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// Whether this reference is hosted by the registry with login server `domain`.
    #[must_use]
    pub fn is_hosted_by(&self, domain: &str) -> bool {
        self.registry_domain.eq_ignore_ascii_case(domain)
    }

    /// The same artifact addressed in another registry/repository (digest preserved).
    #[must_use]
    pub fn relocated(&self, registry_domain: &str, repository: &str) -> Self {
        Self {
            registry_domain: registry_domain.to_lowercase(),
            repository: repository.to_string(),
            digest: self.digest.clone(),
            tag: if self.digest.is_some() {
                None
            } else {
                self.tag.clone()
            },
        }
    }
}

/// Equal iff domain, repository and digest match. Tag-only references compare by tag.
impl PartialEq for ImageReference {
    fn eq(&self, other: &Self) -> bool {
        if !self.registry_domain.eq_ignore_ascii_case(&other.registry_domain)
            || self.repository != other.repository
        {
            return false;
        }
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.tag == other.tag,
            _ => false,
        }
    }
}

impl Eq for ImageReference {}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => write!(f, "{}/{}@{}", self.registry_domain, self.repository, digest),
            (None, Some(tag)) => write!(f, "{}/{}:{}", self.registry_domain, self.repository, tag),
            (None, None) => write!(f, "{}/{}", self.registry_domain, self.repository),
        }
    }
}

impl std::str::FromStr for ImageReference {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(n: u64) -> String {
        format!("sha256:{n:064x}")
    }

    #[test]
    fn test_parse_digest_reference() {
        let input = format!("acmedev.azurecr.io/acme/billing-dev@{}", digest(1));
        let parsed = ImageReference::parse(&input).unwrap();
        assert_eq!(parsed.registry_domain, "acmedev.azurecr.io");
        assert_eq!(parsed.repository, "acme/billing-dev");
        assert_eq!(parsed.digest.as_deref(), Some(digest(1).as_str()));
        assert!(parsed.tag.is_none());
        assert!(parsed.is_digest_pinned());
        assert_eq!(parsed.to_string(), input);
    }

    #[test]
    fn test_parse_tag_reference() {
        let parsed = ImageReference::parse(
            "mcr.microsoft.com/azuredocs/containerapps-helloworld:latest",
        )
        .unwrap();
        assert_eq!(parsed.registry_domain, "mcr.microsoft.com");
        assert_eq!(parsed.repository, "azuredocs/containerapps-helloworld");
        assert_eq!(parsed.tag.as_deref(), Some("latest"));
        assert!(!parsed.is_digest_pinned());
        assert_eq!(parsed.manifest_reference(), "latest");
    }

    #[test]
    fn test_parse_tag_and_digest_prefers_digest() {
        let input = format!("acmedev.azurecr.io/acme/billing-dev:20240101120000@{}", digest(7));
        let parsed = ImageReference::parse(&input).unwrap();
        assert_eq!(parsed.manifest_reference(), digest(7));
        assert_eq!(
            parsed.to_string(),
            format!("acmedev.azurecr.io/acme/billing-dev@{}", digest(7))
        );
    }

    #[test]
    fn test_parse_registry_with_port() {
        let parsed = ImageReference::parse("localhost:5000/billing:v1").unwrap();
        assert_eq!(parsed.registry_domain, "localhost:5000");
        assert_eq!(parsed.repository, "billing");
        assert_eq!(parsed.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_parse_docker_hub_short_names() {
        let parsed = ImageReference::parse("nginx").unwrap();
        assert_eq!(parsed.registry_domain, "docker.io");
        assert_eq!(parsed.repository, "library/nginx");
        assert_eq!(parsed.tag.as_deref(), Some("latest"));

        let parsed = ImageReference::parse("bitnami/redis:7").unwrap();
        assert_eq!(parsed.registry_domain, "docker.io");
        assert_eq!(parsed.repository, "bitnami/redis");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("acmedev.azurecr.io/billing@sha256:xyz").is_err());
        assert!(ImageReference::parse("acmedev.azurecr.io/billing:").is_err());
        assert!(ImageReference::parse("acmedev.azurecr.io/Billing:v1").is_err());
    }

    #[test]
    fn test_equality_uses_domain_repository_digest() {
        let a = ImageReference::with_digest("AcmeDev.azurecr.io", "acme/billing-dev", digest(1));
        let mut b = ImageReference::with_digest("acmedev.azurecr.io", "acme/billing-dev", digest(1));
        b.tag = Some("20240101120000".to_string());
        assert_eq!(a, b);

        let c = ImageReference::with_digest("acmedev.azurecr.io", "acme/billing-dev", digest(2));
        assert_ne!(a, c);

        let d = ImageReference::with_digest("acmetest.azurecr.io", "acme/billing-dev", digest(1));
        assert_ne!(a, d);
    }

    #[test]
    fn test_tag_and_digest_references_are_not_equal() {
        let pinned = ImageReference::with_digest("acmedev.azurecr.io", "acme/billing-dev", digest(1));
        let tagged = ImageReference::parse("acmedev.azurecr.io/acme/billing-dev:latest").unwrap();
        assert_ne!(pinned, tagged);
    }

    #[test]
    fn test_relocated_preserves_digest() {
        let source = ImageReference::with_digest("acmedev.azurecr.io", "acme/billing-dev", digest(3));
        let local = source.relocated("acmetest.azurecr.io", "acme/billing-test");
        assert_eq!(local.digest, source.digest);
        assert!(local.is_hosted_by("ACMETEST.azurecr.io"));
        assert_eq!(local.repository, "acme/billing-test");
    }
}
