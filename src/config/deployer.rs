//! # Deployer Configuration
//!
//! Process-level settings loaded from environment variables.

use super::environment::EnvironmentChain;
use crate::error::DeployError;
use std::path::PathBuf;
use std::time::Duration;

/// How to wait for a new pull-permission grant to take effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicyKind {
    /// Sleep a fixed interval
    Fixed,
    /// Probe the grant with exponential backoff between attempts
    Probe,
}

impl std::str::FromStr for PropagationPolicyKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "probe" => Ok(Self::Probe),
            other => Err(DeployError::Config(format!(
                "PROPAGATION_POLICY must be 'fixed' or 'probe', got '{other}'"
            ))),
        }
    }
}

/// Deployer configuration
///
/// All settings have defaults in [`crate::constants`] and can be overridden via
/// environment variables.
#[derive(Clone)]
pub struct DeployerConfig {
    /// Directory holding `{environment}.env` configuration stores
    pub env_dir: PathBuf,
    /// Ordered environment chain, base first
    pub environments: EnvironmentChain,
    /// Public image used when an environment's registry has nothing for a service
    pub placeholder_image: String,
    pub propagation_policy: PropagationPolicyKind,
    /// Fixed propagation wait (seconds)
    pub propagation_delay_secs: u64,
    /// Maximum number of "permission effective" probes
    pub propagation_probe_max_attempts: u32,
    /// First backoff between probes (milliseconds)
    pub propagation_probe_start_ms: u64,
    /// Maximum backoff between probes (milliseconds)
    pub propagation_probe_max_ms: u64,
    /// Poll interval for asynchronous registry imports (seconds)
    pub import_poll_interval_secs: u64,
    /// Give up on an asynchronous registry import after this long (seconds)
    pub import_timeout_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
    /// Prometheus textfile written at exit, when set
    pub metrics_textfile: Option<PathBuf>,
    /// Azure Resource Manager endpoint
    pub arm_endpoint: String,
    /// Static bearer token that bypasses credential discovery
    pub access_token: Option<String>,
    /// Workload Identity client ID; Managed Identity is used when unset
    pub azure_client_id: Option<String>,
}

impl std::fmt::Debug for DeployerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployerConfig")
            .field("env_dir", &self.env_dir)
            .field("environments", &self.environments)
            .field("placeholder_image", &self.placeholder_image)
            .field("propagation_policy", &self.propagation_policy)
            .field("propagation_delay_secs", &self.propagation_delay_secs)
            .field("import_timeout_secs", &self.import_timeout_secs)
            .field("arm_endpoint", &self.arm_endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("azure_client_id", &self.azure_client_id)
            .finish_non_exhaustive()
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            env_dir: PathBuf::from(DEFAULT_ENV_DIR),
            environments: EnvironmentChain::default(),
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            propagation_policy: PropagationPolicyKind::Fixed,
            propagation_delay_secs: DEFAULT_PROPAGATION_DELAY_SECS,
            propagation_probe_max_attempts: DEFAULT_PROPAGATION_PROBE_MAX_ATTEMPTS,
            propagation_probe_start_ms: DEFAULT_PROPAGATION_PROBE_START_MS,
            propagation_probe_max_ms: DEFAULT_PROPAGATION_PROBE_MAX_MS,
            import_poll_interval_secs: DEFAULT_IMPORT_POLL_INTERVAL_SECS,
            import_timeout_secs: DEFAULT_IMPORT_TIMEOUT_SECS,
            log_format: "text".to_string(),
            metrics_textfile: None,
            arm_endpoint: DEFAULT_ARM_ENDPOINT.to_string(),
            access_token: None,
            azure_client_id: None,
        }
    }
}

impl DeployerConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] for an empty environment chain or an unknown
    /// propagation policy.
    pub fn from_env() -> Result<Self, DeployError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// # Errors
    /// See [`DeployerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        use crate::constants::*;

        let or_default = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            env_dir: PathBuf::from(or_default("DEPLOY_ENV_DIR", DEFAULT_ENV_DIR)),
            environments: or_default("DEPLOY_ENVIRONMENTS", DEFAULT_ENVIRONMENTS).parse()?,
            placeholder_image: or_default("PLACEHOLDER_IMAGE", DEFAULT_PLACEHOLDER_IMAGE),
            propagation_policy: or_default("PROPAGATION_POLICY", "fixed").parse()?,
            propagation_delay_secs: parse_or_default(
                &lookup,
                "PROPAGATION_DELAY_SECS",
                DEFAULT_PROPAGATION_DELAY_SECS,
            ),
            propagation_probe_max_attempts: parse_or_default(
                &lookup,
                "PROPAGATION_PROBE_MAX_ATTEMPTS",
                DEFAULT_PROPAGATION_PROBE_MAX_ATTEMPTS,
            ),
            propagation_probe_start_ms: parse_or_default(
                &lookup,
                "PROPAGATION_PROBE_START_MS",
                DEFAULT_PROPAGATION_PROBE_START_MS,
            ),
            propagation_probe_max_ms: parse_or_default(
                &lookup,
                "PROPAGATION_PROBE_MAX_MS",
                DEFAULT_PROPAGATION_PROBE_MAX_MS,
            ),
            import_poll_interval_secs: parse_or_default(
                &lookup,
                "IMPORT_POLL_INTERVAL_SECS",
                DEFAULT_IMPORT_POLL_INTERVAL_SECS,
            ),
            import_timeout_secs: parse_or_default(
                &lookup,
                "IMPORT_TIMEOUT_SECS",
                DEFAULT_IMPORT_TIMEOUT_SECS,
            ),
            log_format: or_default("LOG_FORMAT", "text"),
            metrics_textfile: lookup("METRICS_TEXTFILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            arm_endpoint: or_default("AZURE_ARM_ENDPOINT", DEFAULT_ARM_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            access_token: lookup("AZURE_ACCESS_TOKEN").filter(|v| !v.trim().is_empty()),
            azure_client_id: lookup("AZURE_CLIENT_ID").filter(|v| !v.trim().is_empty()),
        })
    }

    /// Path of the configuration store for `environment`
    #[must_use]
    pub fn env_file(&self, environment: &str) -> PathBuf {
        self.env_dir.join(format!("{environment}.env"))
    }

    #[must_use]
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }

    #[must_use]
    pub fn propagation_probe_start(&self) -> Duration {
        Duration::from_millis(self.propagation_probe_start_ms)
    }

    #[must_use]
    pub fn propagation_probe_max(&self) -> Duration {
        Duration::from_millis(self.propagation_probe_max_ms)
    }

    #[must_use]
    pub fn import_poll_interval(&self) -> Duration {
        Duration::from_secs(self.import_poll_interval_secs)
    }

    #[must_use]
    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.import_timeout_secs)
    }
}

/// Read a value and parse it, or return the default
fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
