//! # Model
//!
//! Values passed through the reconciliation call chain.

pub mod image;
pub mod state;
pub mod target;

pub use image::ImageReference;
pub use state::{
    DeploymentIdentity, DeploymentMetadata, DeploymentState, IdentityKind, RegistryBinding,
    Revision,
};
pub use target::{image_config_key, ServiceTarget};
