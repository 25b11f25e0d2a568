//! # Azure Container Registry
//!
//! [`ContainerRegistry`] over two APIs:
//!
//! - the registry data plane (`https://{login server}`) for repository, manifest and
//!   label queries, authenticated with an ACR token exchanged from the AAD token
//! - ARM `importImage` for cross-registry copies, polled until the artifact lands
//!
//! With a static bearer token the exchange is skipped and the token is sent as is.

use super::client::ArmClient;
use super::models::{
    AcrAccessToken, AcrRefreshToken, ImageConfig, ImportImageParameters, ImportSourceParameters,
    Manifest, ManifestAttributesList,
};
use crate::config::EnvironmentConfig;
use crate::constants::{ARM_SCOPE, CONTAINER_REGISTRY_API_VERSION, OCI_REVISION_LABEL};
use crate::provider::common::track;
use crate::provider::{ContainerRegistry, ImportSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span};

const PROVIDER: &str = "azure_container_registry";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json";

/// How data-plane requests are authenticated
enum DataPlaneAuth {
    /// Send this token directly
    Static(String),
    /// Exchange the AAD token for per-repository ACR tokens
    Exchange {
        refresh_token: Mutex<Option<String>>,
        access_tokens: Mutex<HashMap<String, String>>,
    },
}

pub struct AzureContainerRegistry {
    arm: Arc<ArmClient>,
    domain: String,
    registry_resource_id: String,
    data_endpoint: String,
    auth: DataPlaneAuth,
}

impl std::fmt::Debug for AzureContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureContainerRegistry")
            .field("domain", &self.domain)
            .field("data_endpoint", &self.data_endpoint)
            .finish_non_exhaustive()
    }
}

impl AzureContainerRegistry {
    #[must_use]
    pub fn new(arm: Arc<ArmClient>, config: &EnvironmentConfig) -> Self {
        Self {
            arm,
            domain: config.registry_domain.clone(),
            registry_resource_id: config.registry_resource_id(),
            data_endpoint: format!("https://{}", config.registry_domain),
            auth: DataPlaneAuth::Exchange {
                refresh_token: Mutex::new(None),
                access_tokens: Mutex::new(HashMap::new()),
            },
        }
    }

    /// Send data-plane requests to `endpoint` instead of the login server
    #[must_use]
    pub fn with_data_endpoint(mut self, endpoint: &str) -> Self {
        self.data_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Authenticate data-plane requests with `token` and skip the exchange
    #[must_use]
    pub fn with_static_token(mut self, token: &str) -> Self {
        self.auth = DataPlaneAuth::Static(token.to_string());
        self
    }

    async fn data_token(&self, repository: &str) -> Result<String> {
        let (refresh_token, access_tokens) = match &self.auth {
            DataPlaneAuth::Static(token) => return Ok(token.clone()),
            DataPlaneAuth::Exchange {
                refresh_token,
                access_tokens,
            } => (refresh_token, access_tokens),
        };

        if let Some(token) = access_tokens.lock().await.get(repository) {
            return Ok(token.clone());
        }

        let refresh = {
            let mut cached = refresh_token.lock().await;
            match cached.as_ref() {
                Some(token) => token.clone(),
                None => {
                    let token = self.exchange_refresh_token().await?;
                    *cached = Some(token.clone());
                    token
                }
            }
        };

        let scope = format!("repository:{repository}:pull,metadata_read");
        let response = self
            .arm
            .http_client()
            .post(format!("{}/oauth2/token", self.data_endpoint))
            .form(&[
                ("grant_type", "refresh_token"),
                ("service", self.domain.as_str()),
                ("scope", scope.as_str()),
                ("refresh_token", refresh.as_str()),
            ])
            .send()
            .await
            .context("Failed to request ACR access token")?;
        let token: AcrAccessToken = self
            .arm
            .check(response)
            .await?
            .json()
            .await
            .context("Failed to parse ACR access token")?;

        access_tokens
            .lock()
            .await
            .insert(repository.to_string(), token.access_token.clone());
        Ok(token.access_token)
    }

    async fn exchange_refresh_token(&self) -> Result<String> {
        let aad_token = self.arm.token_for(ARM_SCOPE).await?;
        let response = self
            .arm
            .http_client()
            .post(format!("{}/oauth2/exchange", self.data_endpoint))
            .form(&[
                ("grant_type", "access_token"),
                ("service", self.domain.as_str()),
                ("access_token", aad_token.as_str()),
            ])
            .send()
            .await
            .context("Failed to exchange AAD token for ACR refresh token")?;
        let token: AcrRefreshToken = self
            .arm
            .check(response)
            .await?
            .json()
            .await
            .context("Failed to parse ACR refresh token")?;
        Ok(token.refresh_token)
    }

    async fn data_request(
        &self,
        method: Method,
        repository: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<Response> {
        let token = self.data_token(repository).await?;
        let url = format!("{}{path}", self.data_endpoint);
        debug!("{} {}", method, url);

        let mut request = self
            .arm
            .http_client()
            .request(method.clone(), &url)
            .header("Authorization", format!("Bearer {token}"));
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to send {method} {path}"))
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let response = self
            .data_request(
                Method::GET,
                repository,
                &format!("/v2/{repository}/manifests/{reference}"),
                Some(MANIFEST_ACCEPT),
            )
            .await?;
        self.arm
            .check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse manifest {repository}@{reference}"))
    }

    async fn revision_label_inner(&self, repository: &str, digest: &str) -> Result<Option<String>> {
        let mut manifest = self.get_manifest(repository, digest).await?;

        if manifest.config.is_none() {
            // Image index: labels live on a platform manifest
            let Some(child) = manifest
                .manifests
                .iter()
                .find(|d| {
                    d.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
                })
                .or_else(|| manifest.manifests.first())
            else {
                return Ok(None);
            };
            let child_digest = child.digest.clone();
            manifest = self.get_manifest(repository, &child_digest).await?;
        }

        let Some(config) = manifest.config else {
            return Ok(None);
        };

        let response = self
            .data_request(
                Method::GET,
                repository,
                &format!("/v2/{repository}/blobs/{}", config.digest),
                None,
            )
            .await?;
        let image_config: ImageConfig = self
            .arm
            .check(response)
            .await?
            .json()
            .await
            .context("Failed to parse image config")?;

        Ok(image_config
            .config
            .and_then(|c| c.labels)
            .and_then(|mut labels| labels.remove(OCI_REVISION_LABEL))
            .filter(|revision| !revision.is_empty()))
    }
}

#[async_trait]
impl ContainerRegistry for AzureContainerRegistry {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn repository_exists(&self, repository: &str) -> Result<bool> {
        let span = info_span!(
            "azure.acr.repository_exists",
            registry = %self.domain,
            repository = %repository,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "repository_exists", span, async {
            let response = self
                .data_request(Method::GET, repository, &format!("/acr/v1/{repository}"), None)
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            self.arm.check(response).await?;
            Ok(true)
        })
        .await
    }

    async fn manifest_exists(&self, repository: &str, reference: &str) -> Result<bool> {
        let span = info_span!(
            "azure.acr.manifest_exists",
            registry = %self.domain,
            repository = %repository,
            reference = %reference,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "manifest_exists", span, async {
            let response = self
                .data_request(
                    Method::HEAD,
                    repository,
                    &format!("/v2/{repository}/manifests/{reference}"),
                    Some(MANIFEST_ACCEPT),
                )
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            self.arm.check(response).await?;
            Ok(true)
        })
        .await
    }

    async fn latest_digest(&self, repository: &str) -> Result<Option<String>> {
        let span = info_span!(
            "azure.acr.latest_digest",
            registry = %self.domain,
            repository = %repository,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "latest_digest", span, async {
            let response = self
                .data_request(
                    Method::GET,
                    repository,
                    &format!("/acr/v1/{repository}/_manifests?orderby=time_desc&n=1"),
                    None,
                )
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let list: ManifestAttributesList = self
                .arm
                .check(response)
                .await?
                .json()
                .await
                .context("Failed to parse manifest list")?;
            Ok(list.manifests.into_iter().next().map(|m| m.digest))
        })
        .await
    }

    async fn import_image(
        &self,
        source: &ImportSource,
        target_repository: &str,
        tags: &[String],
    ) -> Result<()> {
        let span = info_span!(
            "azure.acr.import_image",
            registry = %self.domain,
            source = %source.reference,
            target.repository = %target_repository,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "import_image", span, async {
            let digest = source
                .reference
                .digest
                .as_deref()
                .context("import source must be digest-pinned")?;

            let parameters = ImportImageParameters {
                source: ImportSourceParameters {
                    registry_uri: source
                        .registry_resource_id
                        .is_none()
                        .then(|| source.reference.registry_domain.clone()),
                    resource_id: source.registry_resource_id.clone(),
                    source_image: format!("{}@{digest}", source.reference.repository),
                },
                target_tags: tags
                    .iter()
                    .map(|tag| format!("{target_repository}:{tag}"))
                    .collect(),
                untagged_target_repositories: if tags.is_empty() {
                    vec![target_repository.to_string()]
                } else {
                    Vec::new()
                },
                mode: "NoForce",
            };

            let response = self
                .arm
                .send(
                    Method::POST,
                    &format!("{}/importImage", self.registry_resource_id),
                    CONTAINER_REGISTRY_API_VERSION,
                    Some(serde_json::to_value(&parameters)?),
                )
                .await?;
            self.arm.wait_for_completion(response, "image import").await?;

            info!(
                "Imported {} into {}/{}",
                source.reference, self.domain, target_repository
            );
            Ok(())
        })
        .await
    }

    async fn revision_label(&self, repository: &str, digest: &str) -> Result<Option<String>> {
        let span = info_span!(
            "azure.acr.revision_label",
            registry = %self.domain,
            repository = %repository,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(
            PROVIDER,
            "revision_label",
            span,
            self.revision_label_inner(repository, digest),
        )
        .await
    }
}
