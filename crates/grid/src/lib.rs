//! Distributed execution grid for FedGrid.
//!
//! Architecture role:
//! - runs the leaf tasks of a [`fedgrid_planner::GridJob`] on their
//!   assigned workers, local or remote
//! - gates on every leaf stream reaching end-of-stream, then evaluates
//!   the job's central plan on the gateway
//! - surfaces leaf failures, cancellation, and contained panics as
//!   typed terminal errors
//!
//! Key modules:
//! - [`executor`]
//! - [`operators`]
//! - [`task`]
//! - [`transport`]

pub mod executor;
pub mod operators;
pub mod task;
pub mod transport;

pub use executor::{CancelHandle, ExecutorGrid};
pub use operators::{AggPhase, ExecOutput};
pub use task::{run_leaf_task, spawn_leaf_task};
pub use transport::{GridTransport, InProcessTransport, WorkerNode};
