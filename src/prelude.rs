//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use deploy_reconciler::prelude::*;
//! ```
//!
//! This brings into scope:
//! - Model types (`ImageReference`, `ServiceTarget`, `DeploymentState`, ...)
//! - Provider traits (`ContainerRegistry`, `DeploymentPlatform`, `ConfigStore`)
//! - The deployer entry points and their reports
//! - Config types (`DeployerConfig`, `EnvironmentConfig`, `EnvironmentChain`)
//! - `DeployError`

// Model types
pub use crate::model::{
    DeploymentIdentity, DeploymentMetadata, DeploymentState, IdentityKind, ImageReference,
    RegistryBinding, Revision, ServiceTarget,
};

// Provider traits - needed for implementing providers
pub use crate::provider::{
    ConfigStore, ContainerRegistry, DeploymentPlatform, GrantOutcome, ImportSource,
};

// Deployer and reports
pub use crate::controller::binder::BindingOutcome;
pub use crate::controller::deployer::{
    ChangeRange, DeployReport, Deployer, EnvironmentContext, PromotionReport, StatusReport,
};
pub use crate::controller::metadata::{MetadataWrite, Provenance, ProvenanceSource};
pub use crate::controller::promotion::ImportOutcome;
pub use crate::controller::propagation::{FixedDelay, ProbeWithBackoff, PropagationPolicy};
pub use crate::controller::reconciler::{
    ReconcileOutcome, ReconcileReport, ReferenceValidity, UpdateStrategy,
};
pub use crate::controller::resolver::{ResolutionSource, ResolvedImage};

// Config types
pub use crate::config::{DeployerConfig, EnvFileStore, EnvironmentChain, EnvironmentConfig};

// Errors
pub use crate::error::DeployError;
