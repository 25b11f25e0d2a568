//! # Deploy Command

use super::{print_json, Completion, OutputFormat};
use anyhow::Result;
use deploy_reconciler::controller::deployer::{Deployer, EnvironmentContext};
use deploy_reconciler::controller::reconciler::ReconcileOutcome;
use deploy_reconciler::model::ImageReference;
use tracing::info;

/// Resolve, reconcile and record one service in one environment
pub async fn deploy_command(
    deployer: &Deployer,
    context: &EnvironmentContext,
    service_key: &str,
    image: Option<&str>,
    output: OutputFormat,
) -> Result<Completion> {
    let explicit = image.map(ImageReference::parse).transpose()?;

    let report = deployer
        .deploy(context, service_key, explicit.as_ref())
        .await?;

    info!(
        "{} in {}: {} ({} via {})",
        service_key,
        context.config.environment,
        report.reconcile.outcome.as_str(),
        report.resolved.reference,
        report.resolved.source.as_str()
    );
    if let ReconcileOutcome::FastPathFailed { reason, .. } = &report.reconcile.outcome {
        info!("Platform rejected the update: {}", reason);
    }

    match output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!("{}", report.resolved.reference),
    }

    Ok(if report.fast_path_succeeded() {
        Completion::Done
    } else {
        Completion::NeedsFullProvision
    })
}
