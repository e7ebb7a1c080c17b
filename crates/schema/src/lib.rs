//! Schema federation layer for FedGrid.
//!
//! Architecture role:
//! - models federated schemas, their sources, tables, and partitions
//! - owns the process-wide registry of schemas and driver factories
//! - defines the [`SourceDriver`] seam backends implement
//!
//! Key modules:
//! - [`schema`]
//! - [`registry`]
//! - [`source`]
//! - [`memsource`]

pub mod memsource;
pub mod registry;
pub mod schema;
pub mod source;

pub use memsource::{MemSource, MemSourceFactory};
pub use registry::Registry;
pub use schema::{Partition, Schema, SchemaSource, Table};
pub use source::{Pushdown, SourceDriver, SourceFactory, TableDef};
