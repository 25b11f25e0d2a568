//! # Promote Command

use super::{print_json, Completion, OutputFormat};
use anyhow::Result;
use deploy_reconciler::controller::deployer::{Deployer, EnvironmentContext};
use deploy_reconciler::controller::promotion::ImportOutcome;

/// Promote one service from `source` into `target`
pub async fn promote_command(
    deployer: &Deployer,
    source: &EnvironmentContext,
    target: &EnvironmentContext,
    service_key: &str,
    output: OutputFormat,
) -> Result<Completion> {
    let report = deployer.promote(source, target, service_key).await?;

    match output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("{}", report.imported);
            let import = match &report.import {
                ImportOutcome::Imported { tag } => format!("imported as {tag}"),
                ImportOutcome::AlreadyPresent => "already present".to_string(),
            };
            eprintln!(
                "Promoted {} {} -> {}: {}, {}",
                service_key,
                report.source_environment,
                target.config.environment,
                import,
                report.reconcile.outcome.as_str()
            );
            let range = &report.change_range;
            if let (Some(from), Some(to)) = (&range.from_commit, &range.to_commit) {
                eprintln!("Changes: {}..{}", from.commit, to.commit);
            }
        }
    }

    Ok(if report.fast_path_succeeded() {
        Completion::Done
    } else {
        Completion::NeedsFullProvision
    })
}
