//! Compiled distributed job model: leaf task fragments plus a central plan.
//!
//! A job is built once per query and is immutable afterwards. Leaf
//! tasks fan out to workers (one per source partition); the central
//! plan consumes fragment outputs on the gateway.

use arrow_schema::SchemaRef;
use fedgrid_common::{FragmentId, QueryId, TaskId};
use fedgrid_execution::{AggExpr, Expr};

use crate::logical_plan::SortKey;

/// Where one leaf task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerAssignment {
    /// Executed in the gateway process.
    Local,
    /// Executed on a remote worker at this address.
    Remote(String),
}

/// Operator applied inside a leaf task, after the driver scan,
/// in listed order.
#[derive(Debug, Clone)]
pub enum LeafOp {
    /// Residual filter the driver could not absorb.
    Filter(Expr),
    Project(Vec<(Expr, String)>),
    /// First phase of a split aggregate; emits partial states.
    PartialAggregate {
        group_by: Vec<String>,
        aggr_exprs: Vec<(AggExpr, String)>,
    },
}

/// One scan task against one partition of one source.
#[derive(Debug, Clone)]
pub struct LeafTask {
    pub task_id: TaskId,
    /// Source name within the job's schema.
    pub source: String,
    pub table: String,
    /// Partition index within the source.
    pub partition: usize,
    pub worker: WorkerAssignment,
    /// Projection pushed into the driver, when it accepts one.
    pub projection: Option<Vec<String>>,
    /// Filters pushed into the driver, when it accepts them.
    pub filters: Vec<Expr>,
    /// Residual operators applied in the task after the scan.
    pub local_ops: Vec<LeafOp>,
}

/// All leaf tasks feeding one central input, plus their common
/// output schema.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub tasks: Vec<LeafTask>,
    /// Schema of every batch the fragment's tasks emit.
    pub schema: SchemaRef,
}

/// How a central aggregate treats its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Input rows are partial states from leaf tasks; merge them.
    Final,
    /// Input rows are raw; aggregate from scratch.
    Complete,
}

/// Centralized tail of the job, executed on the gateway over
/// fragment outputs.
#[derive(Debug, Clone)]
pub enum CentralPlan {
    /// Interleave every task stream of one fragment.
    Merge { fragment: FragmentId },
    Filter {
        predicate: Expr,
        input: Box<CentralPlan>,
    },
    Project {
        exprs: Vec<(Expr, String)>,
        input: Box<CentralPlan>,
    },
    Aggregate {
        mode: AggregateMode,
        group_by: Vec<String>,
        aggr_exprs: Vec<(AggExpr, String)>,
        input: Box<CentralPlan>,
    },
    Join {
        left: Box<CentralPlan>,
        right: Box<CentralPlan>,
        on: Vec<(String, String)>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<CentralPlan>,
    },
    Distinct {
        input: Box<CentralPlan>,
    },
    Limit {
        n: usize,
        input: Box<CentralPlan>,
    },
}

/// A fully compiled distributed query.
#[derive(Debug, Clone)]
pub struct GridJob {
    pub query_id: QueryId,
    /// Schema name the query was planned against.
    pub schema: String,
    pub fragments: Vec<Fragment>,
    pub central: CentralPlan,
}

impl GridJob {
    /// Total leaf task count across fragments.
    pub fn task_count(&self) -> usize {
        self.fragments.iter().map(|f| f.tasks.len()).sum()
    }
}
