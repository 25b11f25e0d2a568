//! # Azure Authentication
//!
//! Credential selection, in order:
//!
//! 1. `AZURE_ACCESS_TOKEN`: a static bearer token (CI runners that already logged in,
//!    Pact tests against a mock server)
//! 2. `AZURE_CLIENT_ID`: Workload Identity
//! 3. Managed Identity

use crate::config::DeployerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use std::sync::Arc;
use tracing::info;

/// Credential returning a fixed bearer token
pub struct StaticTokenCredential {
    token: String,
}

impl std::fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenCredential").finish_non_exhaustive()
    }
}

impl StaticTokenCredential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(
        &self,
        _scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        // Expiry is unknown; report an hour so callers do not refresh eagerly
        use typespec_client_core::time::{Duration, OffsetDateTime};

        Ok(AccessToken::new(
            Secret::new(self.token.clone()),
            OffsetDateTime::now_utc() + Duration::seconds(3600),
        ))
    }
}

/// Build the credential used for ARM and registry token exchange
///
/// # Errors
/// Returns an error if the identity credential cannot be created
pub fn credential_from_config(config: &DeployerConfig) -> Result<Arc<dyn TokenCredential>> {
    if let Some(token) = &config.access_token {
        info!("Using static bearer token from AZURE_ACCESS_TOKEN");
        return Ok(Arc::new(StaticTokenCredential::new(token.clone())));
    }

    let credential: Arc<dyn TokenCredential> = match &config.azure_client_id {
        Some(client_id) => {
            info!(
                "Using Azure Workload Identity authentication with client ID: {}",
                client_id
            );
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: Some(client_id.clone()),
                ..Default::default()
            };
            WorkloadIdentityCredential::new(Some(options))
                .context("Failed to create WorkloadIdentityCredential")?
        }
        None => {
            info!("AZURE_CLIENT_ID not set, using Managed Identity");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        }
    };
    Ok(credential)
}
