//! Shared configuration, error types, and IDs for FedGrid crates.
//!
//! Architecture role:
//! - defines the gateway configuration parsed once at startup
//! - provides the common [`FedError`] / [`Result`] contracts
//! - hosts typed query/fragment/task identifiers
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

pub mod config;
pub mod error;
pub mod ids;

pub use config::{GatewayConfig, NodeConfig, SchemaConfig, SourceConfig, DEFAULT_WORKER_CT};
pub use error::{FedError, Result};
pub use ids::*;
