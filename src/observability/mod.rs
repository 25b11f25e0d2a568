//! # Observability
//!
//! - `logging`: `tracing` subscriber setup
//! - `metrics`: Prometheus metrics, flushed to a textfile at exit

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
