//! Compiles logical plans into distributed grid jobs.
//!
//! The cut between leaf tasks and the central plan follows one rule:
//! filters, projections, and the partial half of an aggregate run next
//! to the data, everything ordering- or cross-partition-sensitive runs
//! centrally on the gateway.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use fedgrid_common::{FedError, FragmentId, QueryId, Result, TaskId};
use fedgrid_execution::{compile_expr, AggExpr, Expr};
use fedgrid_schema::Schema;
use tracing::debug;

use crate::job::{
    AggregateMode, CentralPlan, Fragment, GridJob, LeafOp, LeafTask, WorkerAssignment,
};
use crate::logical_plan::LogicalPlan;

/// Hidden column carrying the row count next to a partial AVG sum.
pub fn avg_count_col_name(name: &str) -> String {
    format!("__fg_avg_count_{name}")
}

/// Grid-level planning knobs, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct GridConfig {
    /// Upper bound on distinct workers used per query.
    pub worker_ct: usize,
    pub coordinator_address: String,
    /// Convert leaf/operator panics into terminal errors instead of
    /// unwinding the gateway. Applies from job execution onward; plan
    /// compilation runs on the caller's stack and is not guarded.
    pub suppress_recover: bool,
}

/// Everything one query's planning needs: an id, a schema snapshot,
/// and the resolved logical plan.
pub struct JobContext {
    pub query_id: QueryId,
    pub schema: Arc<Schema>,
    pub plan: LogicalPlan,
}

/// Builds [`GridJob`]s against a fixed worker set.
#[derive(Debug)]
pub struct PlannerGrid {
    config: GridConfig,
    /// Sorted, truncated to `worker_ct`. Empty means run leaves locally.
    workers: Vec<String>,
}

impl PlannerGrid {
    /// `discovered` is the raw worker address list; placement uses the
    /// first `worker_ct` addresses in sorted order so repeated queries
    /// land on the same workers.
    pub fn new(config: GridConfig, mut discovered: Vec<String>) -> Self {
        discovered.sort();
        discovered.dedup();
        let limit = if config.worker_ct == 0 {
            discovered.len()
        } else {
            config.worker_ct.min(discovered.len())
        };
        discovered.truncate(limit);
        Self {
            config,
            workers: discovered,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Compile a distributed job: leaves placed on remote workers when
    /// any are known, central plan on the gateway.
    pub fn build_sql_job(&self, ctx: &JobContext) -> Result<GridJob> {
        self.build(ctx, true)
    }

    /// Compile the same job shape but pin every leaf to the gateway
    /// process. Used when no grid is attached.
    pub fn build_unplanned(&self, ctx: &JobContext) -> Result<GridJob> {
        self.build(ctx, false)
    }

    fn build(&self, ctx: &JobContext, distributed: bool) -> Result<GridJob> {
        let mut builder = JobBuilder {
            ctx,
            workers: if distributed { &self.workers } else { &[] },
            next_fragment: 0,
            next_task: 0,
            fragments: Vec::new(),
        };
        let central = builder.compile(&ctx.plan)?;
        let job = GridJob {
            query_id: ctx.query_id,
            schema: ctx.schema.name.clone(),
            fragments: builder.fragments,
            central,
        };
        debug!(
            query_id = %job.query_id,
            fragments = job.fragments.len(),
            tasks = job.task_count(),
            distributed,
            "job compiled"
        );
        Ok(job)
    }
}

struct JobBuilder<'a> {
    ctx: &'a JobContext,
    workers: &'a [String],
    next_fragment: u64,
    next_task: u64,
    fragments: Vec<Fragment>,
}

impl<'a> JobBuilder<'a> {
    fn compile(&mut self, plan: &LogicalPlan) -> Result<CentralPlan> {
        match plan {
            LogicalPlan::Join { left, right, on } => {
                let l = self.compile(left)?;
                let r = self.compile(right)?;
                Ok(CentralPlan::Join {
                    left: Box::new(l),
                    right: Box::new(r),
                    on: on.clone(),
                })
            }
            // Operators above a join stay central.
            LogicalPlan::Filter { predicate, input } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Filter {
                    predicate: predicate.clone(),
                    input: Box::new(inner),
                })
            }
            LogicalPlan::Projection { exprs, input } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Project {
                    exprs: exprs.clone(),
                    input: Box::new(inner),
                })
            }
            LogicalPlan::Aggregate {
                group_by,
                aggr_exprs,
                input,
            } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Aggregate {
                    mode: AggregateMode::Complete,
                    group_by: group_by.clone(),
                    aggr_exprs: aggr_exprs.clone(),
                    input: Box::new(inner),
                })
            }
            LogicalPlan::Sort { keys, input } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Sort {
                    keys: keys.clone(),
                    input: Box::new(inner),
                })
            }
            LogicalPlan::Distinct { input } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Distinct {
                    input: Box::new(inner),
                })
            }
            LogicalPlan::Limit { n, input } if input.single_scan().is_none() => {
                let inner = self.compile(input)?;
                Ok(CentralPlan::Limit {
                    n: *n,
                    input: Box::new(inner),
                })
            }
            _ => self.compile_pipeline(plan),
        }
    }

    /// Compile a single-table pipeline into one leaf fragment plus the
    /// central tail above it.
    fn compile_pipeline(&mut self, plan: &LogicalPlan) -> Result<CentralPlan> {
        // Flatten the chain bottom-up: scan first.
        let mut chain: Vec<&LogicalPlan> = Vec::new();
        let mut cur = plan;
        let (table, projection, filters) = loop {
            match cur {
                LogicalPlan::TableScan {
                    table,
                    projection,
                    filters,
                } => break (table, projection, filters),
                LogicalPlan::Projection { input, .. }
                | LogicalPlan::Filter { input, .. }
                | LogicalPlan::Aggregate { input, .. }
                | LogicalPlan::Sort { input, .. }
                | LogicalPlan::Distinct { input }
                | LogicalPlan::Limit { input, .. } => {
                    chain.push(cur);
                    cur = input;
                }
                LogicalPlan::Join { .. } => {
                    return Err(FedError::Planning(
                        "join inside a leaf pipeline".to_string(),
                    ));
                }
            }
        };
        chain.reverse();

        let table_ref = self.ctx.schema.table(table).ok_or_else(|| {
            FedError::Planning(format!(
                "unknown table '{}' in schema '{}'",
                table, self.ctx.schema.name
            ))
        })?;
        let source = self.ctx.schema.source(&table_ref.source).ok_or_else(|| {
            FedError::Planning(format!(
                "table '{}' references missing source '{}'",
                table, table_ref.source
            ))
        })?;
        let driver = source.driver()?;
        let caps = driver.pushdown();

        // Split the scan between driver pushdown and residual leaf ops.
        let mut leaf_ops: Vec<LeafOp> = Vec::new();
        let mut schema = table_ref.schema.clone();

        let pushed_projection = if caps.projection {
            projection.clone()
        } else {
            None
        };
        let pushed_filters = if caps.filters {
            filters.clone()
        } else {
            Vec::new()
        };
        if !caps.filters {
            for f in filters {
                leaf_ops.push(LeafOp::Filter(f.clone()));
            }
        }
        if let Some(cols) = projection {
            if caps.projection {
                schema = project_schema(&schema, cols)?;
            } else {
                // Declined projection becomes an explicit column select.
                let exprs: Vec<(Expr, String)> = cols
                    .iter()
                    .map(|c| (Expr::col(c.clone()), c.clone()))
                    .collect();
                schema = projection_output_schema(&exprs, &schema)?;
                leaf_ops.push(LeafOp::Project(exprs));
            }
        }

        // Leaf-side operators: filters and projections stream through;
        // the first aggregate splits into partial + final.
        let mut aliasing: Vec<(Expr, String)> = Vec::new();
        let mut split_aggregate: Option<(Vec<String>, Vec<(AggExpr, String)>)> = None;
        let mut idx = 0;
        while idx < chain.len() {
            match chain[idx] {
                LogicalPlan::Filter { predicate, .. } => {
                    leaf_ops.push(LeafOp::Filter(rewrite_expr(predicate, &aliasing)));
                    idx += 1;
                }
                LogicalPlan::Projection { exprs, .. } => {
                    let rewritten: Vec<(Expr, String)> = exprs
                        .iter()
                        .map(|(e, a)| (rewrite_expr(e, &aliasing), a.clone()))
                        .collect();
                    schema = projection_output_schema(&rewritten, &schema)?;
                    aliasing = rewritten.clone();
                    leaf_ops.push(LeafOp::Project(rewritten));
                    idx += 1;
                }
                LogicalPlan::Aggregate {
                    group_by,
                    aggr_exprs,
                    ..
                } => {
                    let group_by: Vec<String> = group_by
                        .iter()
                        .map(|c| rewrite_name(c, &aliasing))
                        .collect();
                    leaf_ops.push(LeafOp::PartialAggregate {
                        group_by: group_by.clone(),
                        aggr_exprs: aggr_exprs.clone(),
                    });
                    schema = partial_aggregate_schema(&group_by, aggr_exprs, &schema)?;
                    split_aggregate = Some((group_by, aggr_exprs.clone()));
                    idx += 1;
                    break;
                }
                // Ordering-sensitive operators end the leaf phase.
                _ => break,
            }
        }

        // One task per source partition, placed round-robin by
        // partition index so placement is stable across retries of the
        // same query shape.
        let fragment_id = FragmentId(self.next_fragment);
        self.next_fragment += 1;
        let mut tasks = Vec::with_capacity(source.partitions.len().max(1));
        for part in &source.partitions {
            let worker = if self.workers.is_empty() {
                WorkerAssignment::Local
            } else {
                WorkerAssignment::Remote(self.workers[part.id % self.workers.len()].clone())
            };
            tasks.push(LeafTask {
                task_id: TaskId(self.next_task),
                source: source.name.clone(),
                table: table.clone(),
                partition: part.id,
                worker,
                projection: pushed_projection.clone(),
                filters: pushed_filters.clone(),
                local_ops: leaf_ops.clone(),
            });
            self.next_task += 1;
        }
        self.fragments.push(Fragment {
            id: fragment_id,
            tasks,
            schema: schema.clone(),
        });

        let mut central = CentralPlan::Merge {
            fragment: fragment_id,
        };
        if let Some((group_by, aggr_exprs)) = split_aggregate {
            central = CentralPlan::Aggregate {
                mode: AggregateMode::Final,
                group_by: group_by.clone(),
                aggr_exprs: aggr_exprs.clone(),
                input: Box::new(central),
            };
            schema = final_aggregate_schema(&group_by, &aggr_exprs, &schema)?;
            aliasing = aggregate_aliasing(&group_by, &aggr_exprs);
        }

        // Remaining operators run centrally, with leaf aliases folded in.
        for op in &chain[idx..] {
            match op {
                LogicalPlan::Filter { predicate, .. } => {
                    central = CentralPlan::Filter {
                        predicate: rewrite_expr(predicate, &aliasing),
                        input: Box::new(central),
                    };
                }
                LogicalPlan::Projection { exprs, .. } => {
                    let rewritten: Vec<(Expr, String)> = exprs
                        .iter()
                        .map(|(e, a)| (rewrite_expr(e, &aliasing), a.clone()))
                        .collect();
                    if is_identity_projection(&rewritten, &schema) {
                        continue;
                    }
                    schema = projection_output_schema(&rewritten, &schema)?;
                    aliasing = rewritten.clone();
                    central = CentralPlan::Project {
                        exprs: rewritten,
                        input: Box::new(central),
                    };
                }
                LogicalPlan::Aggregate {
                    group_by,
                    aggr_exprs,
                    ..
                } => {
                    let group_by: Vec<String> = group_by
                        .iter()
                        .map(|c| rewrite_name(c, &aliasing))
                        .collect();
                    schema = final_aggregate_schema(&group_by, aggr_exprs, &schema)?;
                    aliasing = aggregate_aliasing(&group_by, aggr_exprs);
                    central = CentralPlan::Aggregate {
                        mode: AggregateMode::Complete,
                        group_by,
                        aggr_exprs: aggr_exprs.clone(),
                        input: Box::new(central),
                    };
                }
                LogicalPlan::Sort { keys, .. } => {
                    let keys = keys
                        .iter()
                        .map(|k| crate::logical_plan::SortKey {
                            column: rewrite_name(&k.column, &aliasing),
                            descending: k.descending,
                        })
                        .collect();
                    central = CentralPlan::Sort {
                        keys,
                        input: Box::new(central),
                    };
                }
                LogicalPlan::Distinct { .. } => {
                    central = CentralPlan::Distinct {
                        input: Box::new(central),
                    };
                }
                LogicalPlan::Limit { n, .. } => {
                    central = CentralPlan::Limit {
                        n: *n,
                        input: Box::new(central),
                    };
                }
                LogicalPlan::TableScan { .. } | LogicalPlan::Join { .. } => {
                    return Err(FedError::Planning(
                        "malformed pipeline above leaf scan".to_string(),
                    ));
                }
            }
        }

        Ok(central)
    }
}

/// Replace sub-expressions already materialized under an alias with a
/// column reference to that alias. Keeps central operators from
/// re-evaluating (or failing to resolve) expressions the leaf already
/// produced.
fn rewrite_expr(expr: &Expr, aliasing: &[(Expr, String)]) -> Expr {
    if let Some((_, alias)) = aliasing.iter().find(|(e, _)| e == expr) {
        return Expr::Column(alias.clone());
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) => expr.clone(),
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(rewrite_expr(left, aliasing)),
            op: *op,
            right: Box::new(rewrite_expr(right, aliasing)),
        },
        Expr::And(a, b) => Expr::And(
            Box::new(rewrite_expr(a, aliasing)),
            Box::new(rewrite_expr(b, aliasing)),
        ),
        Expr::Or(a, b) => Expr::Or(
            Box::new(rewrite_expr(a, aliasing)),
            Box::new(rewrite_expr(b, aliasing)),
        ),
        Expr::Not(e) => Expr::Not(Box::new(rewrite_expr(e, aliasing))),
    }
}

fn rewrite_name(name: &str, aliasing: &[(Expr, String)]) -> String {
    match rewrite_expr(&Expr::Column(name.to_string()), aliasing) {
        Expr::Column(n) => n,
        _ => name.to_string(),
    }
}

/// True when a projection emits exactly its input, column for column.
fn is_identity_projection(exprs: &[(Expr, String)], input: &SchemaRef) -> bool {
    if exprs.len() != input.fields().len() {
        return false;
    }
    exprs.iter().zip(input.fields()).all(|((e, alias), field)| {
        matches!(e, Expr::Column(name) if name == field.name()) && alias == field.name()
    })
}

fn project_schema(schema: &SchemaRef, cols: &[String]) -> Result<SchemaRef> {
    let mut fields = Vec::with_capacity(cols.len());
    for c in cols {
        let field = schema
            .fields()
            .iter()
            .find(|f| f.name() == c)
            .ok_or_else(|| FedError::Planning(format!("unknown column in projection: {c}")))?;
        fields.push(field.as_ref().clone());
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

fn projection_output_schema(exprs: &[(Expr, String)], input: &SchemaRef) -> Result<SchemaRef> {
    let mut fields = Vec::with_capacity(exprs.len());
    for (e, alias) in exprs {
        let compiled = compile_expr(e, input)?;
        fields.push(Field::new(alias, compiled.data_type(), true));
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

fn agg_output_type(agg: &AggExpr, input: &SchemaRef) -> Result<DataType> {
    let col = agg.input_column();
    let input_type = input
        .fields()
        .iter()
        .find(|f| f.name() == col)
        .map(|f| f.data_type().clone())
        .ok_or_else(|| FedError::Planning(format!("unknown column in aggregate: {col}")))?;
    Ok(match agg {
        AggExpr::Count(_) => DataType::Int64,
        AggExpr::Sum(_) | AggExpr::Min(_) | AggExpr::Max(_) => input_type,
        AggExpr::Avg(_) => DataType::Float64,
    })
}

fn group_fields(group_by: &[String], input: &SchemaRef) -> Result<Vec<Field>> {
    group_by
        .iter()
        .map(|c| {
            input
                .fields()
                .iter()
                .find(|f| f.name() == c)
                .map(|f| f.as_ref().clone())
                .ok_or_else(|| FedError::Planning(format!("unknown group column: {c}")))
        })
        .collect()
}

/// Leaf-side partial aggregate output: group columns, aggregate
/// columns, plus a hidden count column per AVG.
pub fn partial_aggregate_schema(
    group_by: &[String],
    aggr_exprs: &[(AggExpr, String)],
    input: &SchemaRef,
) -> Result<SchemaRef> {
    let mut fields = group_fields(group_by, input)?;
    for (agg, name) in aggr_exprs {
        fields.push(Field::new(name, agg_output_type(agg, input)?, true));
    }
    // Hidden AVG counts trail every visible column.
    for (agg, name) in aggr_exprs {
        if matches!(agg, AggExpr::Avg(_)) {
            fields.push(Field::new(
                &avg_count_col_name(name),
                DataType::Int64,
                true,
            ));
        }
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

/// Final aggregate output as seen by the client: hidden AVG count
/// columns are dropped.
pub fn final_aggregate_schema(
    group_by: &[String],
    aggr_exprs: &[(AggExpr, String)],
    input: &SchemaRef,
) -> Result<SchemaRef> {
    let mut fields = group_fields(group_by, input)?;
    for (agg, name) in aggr_exprs {
        let dt = match agg {
            AggExpr::Count(_) => DataType::Int64,
            AggExpr::Avg(_) => DataType::Float64,
            AggExpr::Sum(_) | AggExpr::Min(_) | AggExpr::Max(_) => input
                .fields()
                .iter()
                .find(|f| f.name() == name || f.name() == agg.input_column())
                .map(|f| f.data_type().clone())
                .ok_or_else(|| {
                    FedError::Planning(format!("unknown column in aggregate: {name}"))
                })?,
        };
        fields.push(Field::new(name, dt, true));
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

fn aggregate_aliasing(group_by: &[String], aggr_exprs: &[(AggExpr, String)]) -> Vec<(Expr, String)> {
    let mut out: Vec<(Expr, String)> = group_by
        .iter()
        .map(|c| (Expr::Column(c.clone()), c.clone()))
        .collect();
    for (_, name) in aggr_exprs {
        out.push((Expr::Column(name.clone()), name.clone()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema as ArrowSchema};
    use fedgrid_execution::{BinaryOp, LiteralValue};
    use fedgrid_schema::{MemSource, Partition, SchemaSource};

    fn orders_schema() -> SchemaRef {
        Arc::new(ArrowSchema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amount", DataType::Float64, false),
            Field::new("region", DataType::Utf8, false),
        ]))
    }

    fn test_schema(partitions: usize) -> Arc<Schema> {
        let names: Vec<String> = (0..partitions).map(|i| format!("p{i}")).collect();
        let mem = Arc::new(MemSource::new(&names));
        mem.insert_table("orders", orders_schema(), vec![]);
        let mut schema = Schema::new("web");
        schema.add_source(Arc::new(SchemaSource {
            name: "orders_src".into(),
            source_type: "mem".into(),
            conf: Default::default(),
            nodes: vec![],
            partitions: Partition::from_names(&names),
            driver: Some(mem),
        }));
        Arc::new(schema)
    }

    fn ctx(schema: Arc<Schema>, plan: LogicalPlan) -> JobContext {
        JobContext {
            query_id: QueryId(1),
            schema,
            plan,
        }
    }

    fn planner(workers: &[&str]) -> PlannerGrid {
        PlannerGrid::new(
            GridConfig {
                worker_ct: workers.len(),
                ..Default::default()
            },
            workers.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn scan_becomes_one_task_per_partition() {
        let plan = LogicalPlan::TableScan {
            table: "orders".into(),
            projection: None,
            filters: vec![],
        };
        let job = planner(&[])
            .build_unplanned(&ctx(test_schema(3), plan))
            .unwrap();
        assert_eq!(job.fragments.len(), 1);
        assert_eq!(job.fragments[0].tasks.len(), 3);
        assert!(job.fragments[0]
            .tasks
            .iter()
            .all(|t| t.worker == WorkerAssignment::Local));
        assert!(matches!(job.central, CentralPlan::Merge { .. }));
    }

    #[test]
    fn workers_assigned_round_robin_by_partition() {
        let plan = LogicalPlan::TableScan {
            table: "orders".into(),
            projection: None,
            filters: vec![],
        };
        let job = planner(&["w-b", "w-a"])
            .build_sql_job(&ctx(test_schema(3), plan))
            .unwrap();
        let assigned: Vec<_> = job.fragments[0]
            .tasks
            .iter()
            .map(|t| t.worker.clone())
            .collect();
        // Sorted worker list, indexed by partition id.
        assert_eq!(
            assigned,
            vec![
                WorkerAssignment::Remote("w-a".into()),
                WorkerAssignment::Remote("w-b".into()),
                WorkerAssignment::Remote("w-a".into()),
            ]
        );
    }

    #[test]
    fn scan_filters_push_into_capable_driver() {
        let filter = Expr::binary(
            Expr::col("id"),
            BinaryOp::Gt,
            Expr::Literal(LiteralValue::Int64(5)),
        );
        let plan = LogicalPlan::TableScan {
            table: "orders".into(),
            projection: Some(vec!["id".into(), "amount".into()]),
            filters: vec![filter.clone()],
        };
        let job = planner(&[])
            .build_unplanned(&ctx(test_schema(1), plan))
            .unwrap();
        let task = &job.fragments[0].tasks[0];
        // MemSource accepts filters but declines projection.
        assert_eq!(task.filters, vec![filter]);
        assert!(task.projection.is_none());
        assert!(matches!(task.local_ops[0], LeafOp::Project(_)));
        assert_eq!(
            job.fragments[0]
                .schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect::<Vec<_>>(),
            vec!["id", "amount"]
        );
    }

    #[test]
    fn aggregate_splits_into_partial_and_final() {
        let plan = LogicalPlan::Aggregate {
            group_by: vec!["region".into()],
            aggr_exprs: vec![
                (AggExpr::Count("id".into()), "cnt".into()),
                (AggExpr::Avg("amount".into()), "avg_amount".into()),
            ],
            input: Box::new(LogicalPlan::TableScan {
                table: "orders".into(),
                projection: None,
                filters: vec![],
            }),
        };
        let job = planner(&[])
            .build_unplanned(&ctx(test_schema(2), plan))
            .unwrap();
        let task = &job.fragments[0].tasks[0];
        assert!(matches!(
            task.local_ops.last(),
            Some(LeafOp::PartialAggregate { .. })
        ));
        // Fragment schema carries the hidden avg count column.
        let names: Vec<String> = job.fragments[0]
            .schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(
            names,
            vec!["region", "cnt", "avg_amount", "__fg_avg_count_avg_amount"]
        );
        assert!(matches!(
            job.central,
            CentralPlan::Aggregate {
                mode: AggregateMode::Final,
                ..
            }
        ));
    }

    #[test]
    fn identity_projection_above_aggregate_is_dropped() {
        let plan = LogicalPlan::Projection {
            exprs: vec![
                (Expr::col("region"), "region".into()),
                (Expr::col("cnt"), "cnt".into()),
            ],
            input: Box::new(LogicalPlan::Aggregate {
                group_by: vec!["region".into()],
                aggr_exprs: vec![(AggExpr::Count("id".into()), "cnt".into())],
                input: Box::new(LogicalPlan::TableScan {
                    table: "orders".into(),
                    projection: None,
                    filters: vec![],
                }),
            }),
        };
        let job = planner(&[])
            .build_unplanned(&ctx(test_schema(1), plan))
            .unwrap();
        assert!(matches!(
            job.central,
            CentralPlan::Aggregate {
                mode: AggregateMode::Final,
                ..
            }
        ));
    }

    #[test]
    fn join_compiles_both_sides_as_fragments() {
        let scan = |t: &str| LogicalPlan::TableScan {
            table: t.into(),
            projection: None,
            filters: vec![],
        };
        let plan = LogicalPlan::Join {
            left: Box::new(scan("orders")),
            right: Box::new(scan("orders")),
            on: vec![("id".into(), "id".into())],
        };
        let job = planner(&[])
            .build_unplanned(&ctx(test_schema(2), plan))
            .unwrap();
        assert_eq!(job.fragments.len(), 2);
        assert_eq!(job.task_count(), 4);
        assert!(matches!(job.central, CentralPlan::Join { .. }));
    }

    #[test]
    fn unknown_table_is_planning_error() {
        let plan = LogicalPlan::TableScan {
            table: "missing".into(),
            projection: None,
            filters: vec![],
        };
        let err = planner(&[])
            .build_unplanned(&ctx(test_schema(1), plan))
            .unwrap_err();
        assert!(matches!(err, FedError::Planning(_)));
    }

    #[test]
    fn driverless_source_fails_at_planning() {
        let mut schema = Schema::new("web");
        schema.add_source(Arc::new(SchemaSource {
            name: "down".into(),
            source_type: "es".into(),
            conf: Default::default(),
            nodes: vec![],
            partitions: vec![],
            driver: None,
        }));
        // No driver, so no tables were discovered either.
        let plan = LogicalPlan::TableScan {
            table: "anything".into(),
            projection: None,
            filters: vec![],
        };
        let err = planner(&[])
            .build_unplanned(&ctx(Arc::new(schema), plan))
            .unwrap_err();
        assert!(matches!(err, FedError::Planning(_)));
    }
}
