//! # Azure Providers
//!
//! - [`ContainerApps`]: deployment targets are Azure Container Apps
//! - [`AzureContainerRegistry`]: images live in Azure Container Registry
//!
//! Both share one [`ArmClient`] per process.

mod auth;
mod client;
mod container_apps;
mod models;
mod registry;

pub use auth::{credential_from_config, StaticTokenCredential};
pub use client::{ArmClient, ArmError};
pub use container_apps::ContainerApps;
pub use registry::AzureContainerRegistry;
