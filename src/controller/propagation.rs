//! # Propagation Policies
//!
//! A pull-permission grant is recorded immediately but honored by the registry only
//! after it propagates. The binder calls a [`PropagationPolicy`] after every new grant
//! or binding, and never otherwise.

use super::backoff::ExponentialBackoff;
use crate::config::{DeployerConfig, PropagationPolicyKind};
use crate::observability::metrics;
use crate::provider::DeploymentPlatform;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[async_trait]
pub trait PropagationPolicy: Send + Sync + std::fmt::Debug {
    /// Wait until a grant for `principal_id` on `registry_scope` is likely honored.
    /// Returns the time spent waiting.
    async fn await_propagation(
        &self,
        platform: &dyn DeploymentPlatform,
        principal_id: &str,
        registry_scope: &str,
    ) -> Duration;
}

/// Sleep a fixed interval
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl FixedDelay {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PropagationPolicy for FixedDelay {
    async fn await_propagation(
        &self,
        _platform: &dyn DeploymentPlatform,
        _principal_id: &str,
        _registry_scope: &str,
    ) -> Duration {
        info!(
            "Waiting {}s for pull permission to propagate",
            self.delay.as_secs()
        );
        tokio::time::sleep(self.delay).await;
        metrics::observe_propagation_wait(self.delay.as_secs_f64());
        self.delay
    }
}

/// Probe whether the grant is visible, backing off exponentially between probes
///
/// Gives up after `max_attempts` probes and lets the run continue; a grant that never
/// becomes visible surfaces later as a platform pull-validation failure.
#[derive(Debug, Clone)]
pub struct ProbeWithBackoff {
    pub max_attempts: u32,
    pub start: Duration,
    pub max: Duration,
}

#[async_trait]
impl PropagationPolicy for ProbeWithBackoff {
    async fn await_propagation(
        &self,
        platform: &dyn DeploymentPlatform,
        principal_id: &str,
        registry_scope: &str,
    ) -> Duration {
        let began = Instant::now();
        let mut backoff = ExponentialBackoff::new(self.start, self.max);

        for attempt in 1..=self.max_attempts.max(1) {
            tokio::time::sleep(backoff.next_backoff()).await;
            match platform
                .pull_permission_effective(principal_id, registry_scope)
                .await
            {
                Ok(true) => {
                    let waited = began.elapsed();
                    info!(
                        "Pull permission effective after {} probe(s), {}ms",
                        attempt,
                        waited.as_millis()
                    );
                    metrics::observe_propagation_wait(waited.as_secs_f64());
                    return waited;
                }
                Ok(false) => debug!("Pull permission not yet effective (probe {})", attempt),
                Err(e) => warn!("Pull permission probe {} failed: {:#}", attempt, e),
            }
        }

        let waited = began.elapsed();
        warn!(
            "Pull permission for {} not confirmed after {} probes ({}ms); continuing",
            principal_id,
            self.max_attempts,
            waited.as_millis()
        );
        metrics::observe_propagation_wait(waited.as_secs_f64());
        waited
    }
}

/// Policy selected by `PROPAGATION_POLICY`
#[must_use]
pub fn from_config(config: &DeployerConfig) -> Arc<dyn PropagationPolicy> {
    match config.propagation_policy {
        PropagationPolicyKind::Fixed => Arc::new(FixedDelay::new(config.propagation_delay())),
        PropagationPolicyKind::Probe => Arc::new(ProbeWithBackoff {
            max_attempts: config.propagation_probe_max_attempts,
            start: config.propagation_probe_start(),
            max: config.propagation_probe_max(),
        }),
    }
}
