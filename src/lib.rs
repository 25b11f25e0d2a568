//! Deployment Reconciler Library
//!
//! Keeps a running container service's image in sync with a desired state:
//! resolves the image to deploy, binds the registry on demand, updates in place or
//! via revision copy, promotes artifacts between environment registries by digest,
//! and records the last deployed digest and commit on the target.
//!
//! ## Quick Start
//!
//! ```rust
//! use deploy_reconciler::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod model;
pub mod observability;
pub mod prelude;
pub mod provider;
