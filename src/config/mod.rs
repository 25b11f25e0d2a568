//! # Configuration
//!
//! Process-level settings from environment variables, and per-environment
//! settings from each environment's configuration store.

pub mod deployer;
pub mod environment;
pub mod store;

pub use deployer::{DeployerConfig, PropagationPolicyKind};
pub use environment::{EnvironmentChain, EnvironmentConfig};
pub use store::EnvFileStore;
