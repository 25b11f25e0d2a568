//! # Azure Resource Manager Client
//!
//! Thin REST client for ARM: bearer authentication, error decoding and polling of
//! long-running operations (`Azure-AsyncOperation` / `Location` monitors).
//!
//! Uses reqwest with rustls and works directly against Pact mock servers when the
//! endpoint is overridden.

use super::models::{ArmErrorResponse, AsyncOperationStatus};
use crate::config::DeployerConfig;
use crate::constants::ARM_SCOPE;
use anyhow::{Context, Result};
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use reqwest::{Client, Method, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Decoded ARM error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmError {
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ArmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(
                f,
                "Azure API error: {} (code: {}, status: {})",
                self.message,
                code,
                self.status.as_u16()
            ),
            None => write!(f, "HTTP {}: {}", self.status.as_u16(), self.message),
        }
    }
}

impl std::error::Error for ArmError {}

pub struct ArmClient {
    http_client: Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        endpoint: &str,
        credential: Arc<dyn TokenCredential>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
            poll_interval,
            poll_timeout,
        })
    }

    /// # Errors
    /// Returns an error if no credential can be created
    pub fn from_config(config: &DeployerConfig) -> Result<Self> {
        Self::new(
            &config.arm_endpoint,
            super::auth::credential_from_config(config)?,
            config.import_poll_interval(),
            config.import_timeout(),
        )
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// AAD access token for `scope`
    pub(crate) async fn token_for(&self, scope: &str) -> Result<String> {
        let token = self
            .credential
            .get_token(&[scope], Some(TokenRequestOptions::default()))
            .await
            .context("Failed to get Azure access token")?;
        Ok(token.token.secret().to_string())
    }

    /// Send an ARM request for `path` (a resource ID plus optional sub-path).
    ///
    /// `path` may already carry a query string; `api-version` is appended.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{path}{separator}api-version={api_version}", self.endpoint);
        let token = self.token_for(ARM_SCOPE).await?;

        debug!("{} {}", method, url);
        self.make_request(method.clone(), &url, &token, body)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} {path}"))
    }

    /// GET the next page of an ARM list.
    ///
    /// The `nextLink`'s path and query are replayed against this client's endpoint.
    pub(crate) async fn send_next_link(&self, next_link: &str) -> Result<Response> {
        let url = self.next_link_url(next_link)?;
        let token = self.token_for(ARM_SCOPE).await?;

        debug!("GET {}", url);
        self.make_request(Method::GET, &url, &token, None)
            .send()
            .await
            .with_context(|| format!("Failed to follow nextLink {next_link}"))
    }

    fn next_link_url(&self, next_link: &str) -> Result<String> {
        let link = reqwest::Url::parse(next_link)
            .with_context(|| format!("Invalid nextLink '{next_link}'"))?;
        Ok(match link.query() {
            Some(query) => format!("{}{}?{query}", self.endpoint, link.path()),
            None => format!("{}{}", self.endpoint, link.path()),
        })
    }

    /// Build HTTP request with authentication headers
    pub(crate) fn make_request(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }
        request
    }

    /// Decode an ARM error body, keeping the raw text when it is not JSON
    pub(crate) fn handle_error_response(&self, status: StatusCode, error_text: &str) -> ArmError {
        match serde_json::from_str::<ArmErrorResponse>(error_text) {
            Ok(error_response) => ArmError {
                status,
                code: Some(error_response.error.code),
                message: error_response.error.message,
            },
            Err(_) => ArmError {
                status,
                code: None,
                message: error_text.to_string(),
            },
        }
    }

    /// Turn a non-success response into an error; pass a success through
    pub(crate) async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(self.handle_error_response(status, &error_text).into())
    }

    /// Wait for a possibly long-running operation to reach a terminal state.
    ///
    /// Synchronous successes return immediately.
    pub(crate) async fn wait_for_completion(
        &self,
        response: Response,
        operation: &str,
    ) -> Result<()> {
        let response = self.check(response).await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string)
        };
        let (monitor_url, is_async_operation) = match header("Azure-AsyncOperation") {
            Some(url) => (url, true),
            None => match header("Location") {
                Some(url) if response.status() == StatusCode::ACCEPTED => (url, false),
                _ => return Ok(()),
            },
        };

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let token = self.token_for(ARM_SCOPE).await?;
            let poll = self
                .make_request(Method::GET, &monitor_url, &token, None)
                .send()
                .await
                .with_context(|| format!("Failed to poll {operation}"))?;
            let poll = self.check(poll).await?;

            if is_async_operation {
                let status: AsyncOperationStatus = poll
                    .json()
                    .await
                    .with_context(|| format!("Failed to parse {operation} status"))?;
                match status.status.as_str() {
                    "Succeeded" => return Ok(()),
                    "Failed" | "Canceled" => {
                        let detail = status
                            .error
                            .map(|e| format!("{}: {}", e.code, e.message))
                            .unwrap_or_default();
                        anyhow::bail!("{operation} {}: {detail}", status.status.to_lowercase());
                    }
                    other => debug!("{} is {}", operation, other),
                }
            } else if poll.status() != StatusCode::ACCEPTED {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "{operation} did not complete within {}s",
                    self.poll_timeout.as_secs()
                );
            }
        }
    }
}
