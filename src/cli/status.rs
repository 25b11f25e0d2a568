//! # Status Command
//!
//! Read-only view of a service's container app: deployed image and its validity,
//! registry binding, and recorded deployment metadata.

use super::{print_json, Completion, OutputFormat};
use anyhow::Result;
use deploy_reconciler::controller::deployer::{Deployer, EnvironmentContext};

/// Show the live state of one service in one environment
pub async fn status_command(
    deployer: &Deployer,
    context: &EnvironmentContext,
    service_key: &str,
    output: OutputFormat,
) -> Result<Completion> {
    let report = deployer.status(context, service_key).await?;

    if output == OutputFormat::Json {
        print_json(&report)?;
        return Ok(Completion::Done);
    }

    let target = &report.target;
    println!(
        "Status for {} in {}",
        target.service_key, target.environment
    );
    println!();
    println!("Target:");
    println!("  App: {}", target.app_name);
    println!(
        "  Repository: {}/{}",
        target.registry_domain, target.registry_repository
    );
    println!(
        "  Configured image: {}",
        report.configured_image.as_deref().unwrap_or("<none>")
    );

    let Some(deployment) = &report.deployment else {
        println!();
        println!("Container app does not exist; full provisioning required");
        return Ok(Completion::Done);
    };

    println!();
    println!("Deployment:");
    match &deployment.image {
        Some(image) => println!("  Image: {image}"),
        None => println!("  Image: <unrecognized>"),
    }
    if let Some(validity) = report.deployed_validity {
        println!("  Validity: {}", validity.as_str());
    }
    println!("  Container: {}", deployment.container_name);
    if let Some(revision) = &deployment.latest_revision {
        println!("  Latest revision: {revision}");
    }
    println!(
        "  Registry bound: {}",
        if report.registry_binding_present { "yes" } else { "no" }
    );
    println!(
        "  Identity: {}",
        deployment
            .identity
            .resource_id
            .as_deref()
            .unwrap_or("system")
    );

    println!();
    println!("Metadata:");
    println!(
        "  Last digest: {}",
        report.metadata.last_digest.as_deref().unwrap_or("<none>")
    );
    println!(
        "  Last commit: {}",
        report.metadata.last_commit.as_deref().unwrap_or("<none>")
    );

    Ok(Completion::Done)
}
