//! Query planning for the FedGrid gateway.
//!
//! Architecture role:
//! - defines the resolved [`LogicalPlan`] trees frontends hand in
//! - compiles plans into [`GridJob`]s: leaf task fragments placed on
//!   workers plus a central plan for the gateway
//!
//! Key modules:
//! - [`logical_plan`]
//! - [`job`]
//! - [`grid_planner`]

pub mod grid_planner;
pub mod job;
pub mod logical_plan;

pub use grid_planner::{
    avg_count_col_name, final_aggregate_schema, partial_aggregate_schema, GridConfig, JobContext,
    PlannerGrid,
};
pub use job::{
    AggregateMode, CentralPlan, Fragment, GridJob, LeafOp, LeafTask, WorkerAssignment,
};
pub use logical_plan::{LogicalPlan, SortKey};
