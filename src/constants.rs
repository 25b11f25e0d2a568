//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config::DeployerConfig`]).

/// Public image deployed when an environment's registry has nothing for a service yet.
/// Lives outside every configured registry, so it never needs a pull grant.
pub const DEFAULT_PLACEHOLDER_IMAGE: &str =
    "mcr.microsoft.com/azuredocs/containerapps-helloworld:latest";

/// Default wait after a new pull-permission grant (seconds)
/// Role assignments are recorded immediately but honored by ACR only after propagation
pub const DEFAULT_PROPAGATION_DELAY_SECS: u64 = 15;

/// Default number of "permission effective" probes before giving up waiting
pub const DEFAULT_PROPAGATION_PROBE_MAX_ATTEMPTS: u32 = 6;

/// Default first backoff between propagation probes (milliseconds)
pub const DEFAULT_PROPAGATION_PROBE_START_MS: u64 = 2_000;

/// Default maximum backoff between propagation probes (milliseconds)
pub const DEFAULT_PROPAGATION_PROBE_MAX_MS: u64 = 16_000;

/// Default poll interval for asynchronous registry imports (seconds)
pub const DEFAULT_IMPORT_POLL_INTERVAL_SECS: u64 = 3;

/// Default timeout for asynchronous registry imports (seconds)
pub const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 300;

/// Default directory holding `{environment}.env` configuration stores
pub const DEFAULT_ENV_DIR: &str = "deploy/environments";

/// Default environment chain (base first)
pub const DEFAULT_ENVIRONMENTS: &str = "dev,test,prod";

/// Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Token scope for Azure Resource Manager
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Container Apps API version
pub const CONTAINER_APPS_API_VERSION: &str = "2024-03-01";

/// Container Registry management API version (importImage)
pub const CONTAINER_REGISTRY_API_VERSION: &str = "2023-07-01";

/// Authorization API version (role assignments)
pub const AUTHORIZATION_API_VERSION: &str = "2022-04-01";

/// Resources API version (tags/default merge)
pub const TAGS_API_VERSION: &str = "2021-04-01";

/// Managed Identity API version (user-assigned identity lookup)
pub const MANAGED_IDENTITY_API_VERSION: &str = "2023-01-31";

/// Built-in AcrPull role definition ID
pub const ACR_PULL_ROLE_DEFINITION_ID: &str = "7f951dda-4ed3-4680-a7ca-43fe172d538d";

/// Domain suffix of Azure Container Registry login servers
pub const ACR_DOMAIN_SUFFIX: &str = "azurecr.io";

/// OCI config label carrying the source commit of an image
pub const OCI_REVISION_LABEL: &str = "org.opencontainers.image.revision";

/// Deployment tag recording the last deployed digest
pub const TAG_LAST_DIGEST: &str = "lastDigest";

/// Deployment tag recording the commit of `lastDigest`; empty when that commit is unknown
pub const TAG_LAST_COMMIT: &str = "lastCommit";

/// chrono format of the human-readable tag applied on import
pub const IMPORT_TAG_FORMAT: &str = "%Y%m%d%H%M%S";

/// Upper bound on pages followed through `nextLink` when listing revisions
pub const MAX_LIST_PAGES: usize = 50;

/// Maximum length of a Container App name
pub const MAX_APP_NAME_LEN: usize = 32;
