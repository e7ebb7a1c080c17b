//! Logical query plans handed to the grid planner.
//!
//! Plans arrive resolved: table names exist in the target schema and
//! column references are by name. There is no SQL text at this layer;
//! a frontend (or a test) builds these trees directly.

use fedgrid_execution::{AggExpr, Expr};
use serde::{Deserialize, Serialize};

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogicalPlan {
    TableScan {
        table: String,
        projection: Option<Vec<String>>,
        filters: Vec<Expr>,
    },
    Projection {
        /// Expression plus output alias, in output column order.
        exprs: Vec<(Expr, String)>,
        input: Box<LogicalPlan>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        /// Equi-join column pairs (left, right).
        on: Vec<(String, String)>,
    },
    Aggregate {
        /// Grouping columns by name.
        group_by: Vec<String>,
        /// Aggregate call plus output alias.
        aggr_exprs: Vec<(AggExpr, String)>,
        input: Box<LogicalPlan>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Limit {
        n: usize,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// The scan at the bottom of a single-table plan, if the plan is a
    /// pure pipeline (no join anywhere).
    pub fn single_scan(&self) -> Option<&LogicalPlan> {
        match self {
            LogicalPlan::TableScan { .. } => Some(self),
            LogicalPlan::Projection { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Limit { input, .. } => input.single_scan(),
            LogicalPlan::Join { .. } => None,
        }
    }
}
