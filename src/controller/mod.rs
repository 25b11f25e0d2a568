//! # Controller
//!
//! Reconciliation engine for container deployments.
//!
//! - `resolver`: picks the image a service should run
//! - `reconciler`: brings a live target in line with that image
//! - `binder`: ensures a target can pull from its registry
//! - `propagation`: waits for new permission grants to take effect
//! - `promotion`: copies artifacts between environment registries by digest
//! - `metadata`: records the last deployed digest and commit on the target
//! - `deployer`: deploy, promote and status entry points
//! - `backoff`: exponential backoff used by the propagation probe

pub mod backoff;
pub mod binder;
pub mod deployer;
pub mod metadata;
pub mod promotion;
pub mod propagation;
pub mod reconciler;
pub mod resolver;
