//! Gateway bootstrap for FedGrid.
//!
//! Architecture role:
//! - runs the configuration load phase and owns the per-process
//!   [`ServerCtx`]: registry, planner, transport
//! - exposes the frontend seam: schema lookup, table lookup, and the
//!   unplanned/distributed executor builders
//! - drives the periodic schema refresh loop
//!
//! Key modules:
//! - [`server_ctx`]

pub mod server_ctx;

pub use server_ctx::ServerCtx;
