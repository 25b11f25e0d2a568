//! # deployctl
//!
//! Command-line entry point of the deployment reconciler, run by CI per service.
//!
//! ## Usage
//!
//! ```bash
//! # Deploy whatever the environment resolves for a service
//! deployctl deploy acme-billing --env dev
//!
//! # Deploy an explicit image
//! deployctl deploy acme-billing --env dev --image acmedev.azurecr.io/acme/acme-billing-dev@sha256:...
//!
//! # Promote from the preceding environment in DEPLOY_ENVIRONMENTS
//! deployctl promote acme-billing --to test
//!
//! # Show live state
//! deployctl status acme-billing --env prod --output json
//! ```
//!
//! ## Exit codes
//!
//! - `0`: the fast path succeeded (or status was read)
//! - `2`: full provisioning is required (target absent or the platform rejected the update)
//! - `1`: hard failure

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deploy_reconciler::config::{DeployerConfig, EnvFileStore, EnvironmentConfig};
use deploy_reconciler::controller::deployer::{Deployer, EnvironmentContext};
use deploy_reconciler::observability::{init_tracing, metrics};
use deploy_reconciler::provider::azure::{ArmClient, AzureContainerRegistry, ContainerApps};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

mod deploy;
mod promote;
mod status;

/// Deployment reconciler CLI
#[derive(Parser)]
#[command(name = "deployctl")]
#[command(
    about = "Keep container app images in sync with their desired state",
    long_about = None,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ", built ", env!("BUILD_DATETIME"), ")"),
    after_help = "\
Exit codes:
  0  fast path succeeded
  2  full provisioning required
  1  error

Examples:
  deployctl deploy acme-billing --env dev
  deployctl promote acme-billing --to test
  deployctl status acme-billing --env prod --output json
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Report format on stdout
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the image for a service, reconcile its container app and record metadata
    Deploy {
        /// Service key, e.g. acme-billing
        #[arg(value_name = "SERVICE_KEY")]
        service_key: String,

        /// Target environment
        #[arg(short, long)]
        env: String,

        /// Explicit image reference; skips resolution
        #[arg(long)]
        image: Option<String>,
    },
    /// Import the artifact running in the source environment and deploy it to the target
    Promote {
        /// Service key, e.g. acme-billing
        #[arg(value_name = "SERVICE_KEY")]
        service_key: String,

        /// Target environment
        #[arg(long)]
        to: String,

        /// Source environment (defaults to the one preceding --to in DEPLOY_ENVIRONMENTS)
        #[arg(long)]
        from: Option<String>,
    },
    /// Show the live state of a service's container app
    Status {
        /// Service key, e.g. acme-billing
        #[arg(value_name = "SERVICE_KEY")]
        service_key: String,

        /// Environment to inspect
        #[arg(short, long)]
        env: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Result of a command, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Done,
    NeedsFullProvision,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        return ExitCode::from(1);
    }

    let cli = Cli::parse();

    let config = match DeployerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = init_tracing(&config.log_format) {
        eprintln!("Failed to initialize tracing: {e:#}");
        return ExitCode::from(1);
    }
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register metrics: {:#}", e);
    }

    let result = run(cli, &config).await;

    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics to {}: {:#}", path.display(), e);
        }
    }

    match result {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::NeedsFullProvision) => {
            info!("Fast path did not apply; full provisioning required");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: &DeployerConfig) -> Result<Completion> {
    let arm = Arc::new(ArmClient::from_config(config)?);
    let deployer = Deployer::from_config(config)?;

    match cli.command {
        Commands::Deploy {
            service_key,
            env,
            image,
        } => {
            let context = environment_context(config, &arm, &env).await?;
            deploy::deploy_command(&deployer, &context, &service_key, image.as_deref(), cli.output)
                .await
        }
        Commands::Promote {
            service_key,
            to,
            from,
        } => {
            let from = match from {
                Some(from) => from,
                None => config.environments.previous(&to)?.to_string(),
            };
            let source = environment_context(config, &arm, &from).await?;
            let target = environment_context(config, &arm, &to).await?;
            promote::promote_command(&deployer, &source, &target, &service_key, cli.output).await
        }
        Commands::Status { service_key, env } => {
            let context = environment_context(config, &arm, &env).await?;
            status::status_command(&deployer, &context, &service_key, cli.output).await
        }
    }
}

/// Load an environment's store and wire its Azure collaborators
async fn environment_context(
    config: &DeployerConfig,
    arm: &Arc<ArmClient>,
    environment: &str,
) -> Result<EnvironmentContext> {
    if !config.environments.contains(environment) {
        warn!(
            "Environment '{}' is not part of DEPLOY_ENVIRONMENTS ({})",
            environment,
            config.environments.iter().collect::<Vec<_>>().join(",")
        );
    }

    let path = config.env_file(environment);
    let store = Arc::new(
        EnvFileStore::open(&path)
            .with_context(|| format!("Failed to open config store for '{environment}'"))?,
    );
    let env_config = EnvironmentConfig::from_store(environment, store.as_ref()).await?;

    let mut registry = AzureContainerRegistry::new(Arc::clone(arm), &env_config);
    if let Some(token) = &config.access_token {
        registry = registry.with_static_token(token);
    }

    Ok(EnvironmentContext {
        platform: Arc::new(ContainerApps::new(Arc::clone(arm), &env_config)),
        registry: Arc::new(registry),
        store,
        config: env_config,
    })
}

/// Print `report` as pretty JSON on stdout
pub(crate) fn print_json<T: serde::Serialize>(report: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("Failed to serialize report")?
    );
    Ok(())
}
