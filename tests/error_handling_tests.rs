//! # Error Handling Tests
//!
//! Failures a caller has to act on surface as typed errors with context and stop the
//! run before later steps; internal remediations and non-fatal steps do not.
//!
//! These tests verify:
//! - Grant and import failures abort before any deployment or metadata call
//! - An unresolvable desired image is rejected before the update
//! - A missing target is a provisioning signal, not an error
//! - Metadata and config write-back failures never fail a deployment

mod common;

use common::{deployer, digest, Call, TestEnvironment, SERVICE_KEY};
use deploy_reconciler::controller::binder::BindingOutcome;
use deploy_reconciler::controller::metadata::MetadataWrite;
use deploy_reconciler::controller::reconciler::ReconcileOutcome;
use deploy_reconciler::error::DeployError;
use deploy_reconciler::model::image_config_key;
use deploy_reconciler::provider::GrantOutcome;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_grant_failure_aborts_before_update() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));
    test.push(&digest('2'));
    test.platform
        .create_app(&test.target(), &test.image(&digest('1')), false);
    test.platform.fail_grant.store(true, Ordering::SeqCst);

    let err = deployer()
        .deploy(&test.context, SERVICE_KEY, None)
        .await
        .unwrap_err();

    let DeployError::BindingGrantFailure {
        service,
        environment,
        registry,
        ..
    } = &err
    else {
        panic!("expected BindingGrantFailure, got {err:?}");
    };
    assert_eq!(service, SERVICE_KEY);
    assert_eq!(environment, "test");
    assert_eq!(registry, "acmetest.azurecr.io");
    assert!(err.to_string().contains("AuthorizationFailed"));
    assert!(err.is_retryable());

    assert_eq!(
        test.calls.count(|c| matches!(
            c,
            Call::SetRegistryBinding { .. } | Call::UpdateImage { .. } | Call::MergeTags { .. }
        )),
        0
    );
    assert_eq!(
        test.platform.deployed_image(&test.target()),
        Some(test.image(&digest('1')))
    );
}

#[tokio::test(start_paused = true)]
async fn test_grant_already_satisfied_skips_wait() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));
    test.platform
        .create_app(&test.target(), &common::placeholder(), false);
    test.platform.set_grant_outcome(GrantOutcome::AlreadySatisfied);

    let started = Instant::now();
    let report = deployer()
        .deploy(&test.context, SERVICE_KEY, None)
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        report.reconcile.binding,
        Some(BindingOutcome::Bound {
            grant: GrantOutcome::AlreadySatisfied,
            waited_ms: 0,
        })
    );
    assert_eq!(
        test.calls.count(|c| matches!(c, Call::SetRegistryBinding { .. })),
        1
    );
    assert_eq!(report.reconcile.outcome, ReconcileOutcome::Updated);
}

#[tokio::test(start_paused = true)]
async fn test_import_failure_aborts_promotion() {
    let dev = TestEnvironment::new("dev");
    let test = TestEnvironment::new("test");
    dev.push(&digest('1'));
    dev.platform
        .create_app(&dev.target(), &dev.image(&digest('1')), true);
    test.platform
        .create_app(&test.target(), &common::placeholder(), false);
    test.registry.fail_imports.store(true, Ordering::SeqCst);

    let err = deployer()
        .promote(&dev.context, &test.context, SERVICE_KEY)
        .await
        .unwrap_err();

    let DeployError::ImportFailure {
        registry,
        reference,
        ..
    } = &err
    else {
        panic!("expected ImportFailure, got {err:?}");
    };
    assert_eq!(registry, "acmetest.azurecr.io");
    assert_eq!(reference, &dev.image(&digest('1')).to_string());

    assert!(test.calls.platform_mutations().is_empty());
    assert_eq!(test.calls.count(|c| matches!(c, Call::GetDeployment)), 0);
    assert_eq!(test.store.value(&image_config_key(SERVICE_KEY)), None);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_desired_image_is_rejected() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));
    test.platform
        .create_app(&test.target(), &test.image(&digest('1')), true);

    let err = deployer()
        .deploy(&test.context, SERVICE_KEY, Some(&test.image(&digest('9'))))
        .await
        .unwrap_err();

    assert!(
        matches!(err, DeployError::DesiredImageUnresolvable { .. }),
        "{err:?}"
    );
    assert!(!err.is_retryable());
    assert_eq!(
        test.calls.count(|c| matches!(
            c,
            Call::UpdateImage { .. } | Call::CopyRevision { .. } | Call::MergeTags { .. }
        )),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_absent_target_signals_full_provisioning() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));

    let report = deployer()
        .deploy(&test.context, SERVICE_KEY, None)
        .await
        .unwrap();

    assert_eq!(report.reconcile.outcome, ReconcileOutcome::TargetAbsent);
    assert!(!report.fast_path_succeeded());
    assert_eq!(report.metadata, None);
    assert!(test.calls.platform_mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_failure_does_not_fail_deployment() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));
    test.push(&digest('2'));
    test.platform
        .create_app(&test.target(), &test.image(&digest('1')), true);
    test.platform.fail_merge_tags.store(true, Ordering::SeqCst);

    let report = deployer()
        .deploy(&test.context, SERVICE_KEY, None)
        .await
        .unwrap();

    assert!(report.fast_path_succeeded());
    assert!(matches!(report.metadata, Some(MetadataWrite::Failed { .. })));
    assert_eq!(
        test.platform.deployed_image(&test.target()),
        Some(test.image(&digest('2')))
    );
}

#[tokio::test(start_paused = true)]
async fn test_config_write_back_failure_does_not_fail_deployment() {
    let test = TestEnvironment::new("test");
    test.push(&digest('1'));
    test.platform
        .create_app(&test.target(), &common::placeholder(), true);
    test.store.fail_writes.store(true, Ordering::SeqCst);

    let report = deployer()
        .deploy(&test.context, SERVICE_KEY, None)
        .await
        .unwrap();

    assert_eq!(report.reconcile.outcome, ReconcileOutcome::Updated);
    assert_eq!(test.store.value(&image_config_key(SERVICE_KEY)), None);
}

#[tokio::test(start_paused = true)]
async fn test_promotion_without_source_image_is_a_config_error() {
    let dev = TestEnvironment::new("dev");
    let test = TestEnvironment::new("test");
    dev.platform
        .create_app(&dev.target(), &common::placeholder(), true);

    let err = deployer()
        .promote(&dev.context, &test.context, SERVICE_KEY)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Config(_)), "{err:?}");
    assert!(err.to_string().contains("no digest-pinned image"));
    assert_eq!(
        test.calls.count(|c| matches!(c, Call::Import { .. })),
        0
    );
}

#[tokio::test]
async fn test_invalid_service_key_is_rejected() {
    let test = TestEnvironment::new("test");

    let err = deployer()
        .deploy(&test.context, "Acme_Billing", None)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Config(_)), "{err:?}");
    assert!(test.calls.all().is_empty());
}
