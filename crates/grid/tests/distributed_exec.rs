use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use async_trait::async_trait;
use fedgrid_common::{FedError, QueryId, Result, SourceConfig};
use fedgrid_execution::stream::{boxed_stream, SendableRecordBatchStream};
use fedgrid_execution::{AggExpr, BinaryOp, Expr, LiteralValue};
use fedgrid_grid::{ExecOutput, ExecutorGrid, GridTransport, InProcessTransport, WorkerNode};
use fedgrid_planner::{
    GridConfig, JobContext, LogicalPlan, PlannerGrid, SortKey, WorkerAssignment,
};
use fedgrid_schema::{MemSource, Partition, Pushdown, Schema, SchemaSource, SourceDriver, TableDef};

fn sales_arrow_schema() -> SchemaRef {
    Arc::new(ArrowSchema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("amount", DataType::Int64, false),
    ]))
}

fn sales_batch(rows: &[(&str, i64)]) -> RecordBatch {
    RecordBatch::try_new(
        sales_arrow_schema(),
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|(r, _)| *r).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                rows.iter().map(|(_, a)| *a).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

/// Three-partition sales table: east totals 16 over 3 rows, west 27
/// over 2 rows.
fn sales_source() -> Arc<MemSource> {
    let src = Arc::new(MemSource::new(&[
        "p0".to_string(),
        "p1".to_string(),
        "p2".to_string(),
    ]));
    src.insert_table(
        "sales",
        sales_arrow_schema(),
        vec![
            vec![sales_batch(&[("east", 10), ("west", 20)])],
            vec![sales_batch(&[("east", 5)])],
            vec![sales_batch(&[("west", 7), ("east", 1)])],
        ],
    );
    src
}

fn attach_source(
    schema: &mut Schema,
    name: &str,
    driver: Arc<dyn SourceDriver>,
    nodes: Vec<String>,
) {
    let partitions = driver.partitions();
    schema.add_source(Arc::new(SchemaSource {
        name: name.to_string(),
        source_type: "mem".to_string(),
        conf: SourceConfig::default(),
        nodes,
        partitions,
        driver: Some(driver),
    }));
}

fn sales_schema(nodes: Vec<String>) -> Arc<Schema> {
    let mut schema = Schema::new("analytics");
    attach_source(&mut schema, "pg_main", sales_source(), nodes);
    Arc::new(schema)
}

fn plan_job(
    schema: &Arc<Schema>,
    plan: LogicalPlan,
    workers: Vec<String>,
    distributed: bool,
) -> fedgrid_planner::GridJob {
    let planner = PlannerGrid::new(GridConfig::default(), workers);
    let ctx = JobContext {
        query_id: QueryId(1),
        schema: schema.clone(),
        plan,
    };
    if distributed {
        planner.build_sql_job(&ctx).unwrap()
    } else {
        planner.build_unplanned(&ctx).unwrap()
    }
}

fn group_by_region_plan() -> LogicalPlan {
    LogicalPlan::Aggregate {
        group_by: vec!["region".to_string()],
        aggr_exprs: vec![
            (AggExpr::Sum("amount".to_string()), "total".to_string()),
            (AggExpr::Count("amount".to_string()), "cnt".to_string()),
        ],
        input: Box::new(LogicalPlan::TableScan {
            table: "sales".to_string(),
            projection: None,
            filters: vec![],
        }),
    }
}

fn collect_region_rows(out: &ExecOutput) -> Vec<(String, i64, i64)> {
    let batch = out.concat().unwrap();
    let region = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("region");
    let total = batch
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("total");
    let cnt = batch
        .column(2)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("cnt");
    let mut rows: Vec<(String, i64, i64)> = (0..batch.num_rows())
        .map(|i| (region.value(i).to_string(), total.value(i), cnt.value(i)))
        .collect();
    rows.sort();
    rows
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distributed_group_by_matches_local_run() {
    let workers = vec!["w-a".to_string(), "w-b".to_string()];
    let schema = sales_schema(workers.clone());

    let transport = Arc::new(InProcessTransport::new());
    for addr in &workers {
        let node = Arc::new(WorkerNode::new());
        node.register_driver("pg_main", sales_source());
        transport.add_worker(addr.clone(), node);
    }

    let job = plan_job(&schema, group_by_region_plan(), workers, true);
    assert!(job
        .fragments
        .iter()
        .flat_map(|f| &f.tasks)
        .all(|t| matches!(t.worker, WorkerAssignment::Remote(_))));

    let distributed = ExecutorGrid::new(job, schema.clone(), transport, true)
        .run()
        .await
        .unwrap();

    let local_job = plan_job(&schema, group_by_region_plan(), vec![], false);
    let local = ExecutorGrid::new(
        local_job,
        schema,
        Arc::new(InProcessTransport::new()),
        true,
    )
    .run()
    .await
    .unwrap();

    let expected = vec![
        ("east".to_string(), 16, 3),
        ("west".to_string(), 27, 2),
    ];
    assert_eq!(collect_region_rows(&distributed), expected);
    assert_eq!(collect_region_rows(&local), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sort_and_limit_run_on_gateway() {
    let schema = sales_schema(vec![]);
    let plan = LogicalPlan::Limit {
        n: 2,
        input: Box::new(LogicalPlan::Sort {
            keys: vec![SortKey {
                column: "amount".to_string(),
                descending: true,
            }],
            input: Box::new(LogicalPlan::TableScan {
                table: "sales".to_string(),
                projection: None,
                filters: vec![Expr::binary(
                    Expr::col("amount"),
                    BinaryOp::Gt,
                    Expr::Literal(LiteralValue::Int64(1)),
                )],
            }),
        }),
    };
    let job = plan_job(&schema, plan, vec![], false);
    let out = ExecutorGrid::new(job, schema, Arc::new(InProcessTransport::new()), true)
        .run()
        .await
        .unwrap();

    let batch = out.concat().unwrap();
    let amounts = batch
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    let values: Vec<i64> = (0..batch.num_rows()).map(|i| amounts.value(i)).collect();
    assert_eq!(values, vec![20, 10]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_source_join_combines_tables() {
    let managers = Arc::new(MemSource::new(&["p0".to_string()]));
    let manager_schema: SchemaRef = Arc::new(ArrowSchema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("manager", DataType::Utf8, false),
    ]));
    managers.insert_table(
        "managers",
        manager_schema.clone(),
        vec![vec![RecordBatch::try_new(
            manager_schema,
            vec![
                Arc::new(StringArray::from(vec!["east", "west"])),
                Arc::new(StringArray::from(vec!["ada", "bob"])),
            ],
        )
        .unwrap()]],
    );

    let mut schema = Schema::new("analytics");
    attach_source(&mut schema, "pg_main", sales_source(), vec![]);
    attach_source(&mut schema, "crm", managers, vec![]);
    let schema = Arc::new(schema);

    let plan = LogicalPlan::Join {
        left: Box::new(LogicalPlan::TableScan {
            table: "sales".to_string(),
            projection: None,
            filters: vec![],
        }),
        right: Box::new(LogicalPlan::TableScan {
            table: "managers".to_string(),
            projection: None,
            filters: vec![],
        }),
        on: vec![("region".to_string(), "region".to_string())],
    };
    let job = plan_job(&schema, plan, vec![], false);
    assert_eq!(job.fragments.len(), 2);

    let out = ExecutorGrid::new(job, schema, Arc::new(InProcessTransport::new()), true)
        .run()
        .await
        .unwrap();
    // Every sales row finds exactly one manager.
    assert_eq!(out.num_rows(), 5);
    let batch = out.concat().unwrap();
    assert_eq!(batch.num_columns(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_worker_is_terminal() {
    let workers = vec!["w-a".to_string(), "w-b".to_string()];
    let schema = sales_schema(workers.clone());

    // Only one of the two planned workers is actually attached.
    let transport = Arc::new(InProcessTransport::new());
    let node = Arc::new(WorkerNode::new());
    node.register_driver("pg_main", sales_source());
    transport.add_worker("w-a", node);

    let job = plan_job(&schema, group_by_region_plan(), workers, true);
    let err = ExecutorGrid::new(job, schema, transport, true)
        .run()
        .await
        .unwrap_err();
    match err {
        FedError::Execution(msg) => assert!(msg.contains("unreachable"), "{msg}"),
        other => panic!("expected execution error, got {other}"),
    }
}

/// Driver whose scans never produce a batch; used to hold a query open.
struct HangingSource {
    partitions: Vec<Partition>,
    schema: SchemaRef,
}

#[async_trait]
impl SourceDriver for HangingSource {
    async fn setup(&self, _source: &SchemaSource) -> Result<()> {
        Ok(())
    }

    fn partitions(&self) -> Vec<Partition> {
        self.partitions.clone()
    }

    fn table_names(&self) -> Vec<String> {
        vec!["slow".to_string()]
    }

    fn table(&self, name: &str) -> Option<TableDef> {
        (name == "slow").then(|| TableDef {
            name: name.to_string(),
            schema: self.schema.clone(),
        })
    }

    fn pushdown(&self) -> Pushdown {
        Pushdown::default()
    }

    async fn scan_partition(
        &self,
        _table: &str,
        _partition: &Partition,
        _projection: Option<Vec<String>>,
        _filters: Vec<Expr>,
    ) -> Result<SendableRecordBatchStream> {
        let inner = futures::stream::pending::<Result<RecordBatch>>();
        Ok(boxed_stream(self.schema.clone(), inner))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_scan_returns_canceled() {
    let driver = Arc::new(HangingSource {
        partitions: Partition::from_names(&["p0".to_string()]),
        schema: sales_arrow_schema(),
    });
    let mut schema = Schema::new("analytics");
    attach_source(&mut schema, "slow_src", driver, vec![]);
    let schema = Arc::new(schema);

    let plan = LogicalPlan::TableScan {
        table: "slow".to_string(),
        projection: None,
        filters: vec![],
    };
    let job = plan_job(&schema, plan, vec![], false);
    let exec = ExecutorGrid::new(job, schema, Arc::new(InProcessTransport::new()), true);
    let cancel = exec.cancel_handle();

    let handle = tokio::spawn(exec.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_canceled(), "expected cancellation, got {err}");
}

/// Driver that panics inside the scan, standing in for a buggy backend.
struct PanickingSource {
    partitions: Vec<Partition>,
    schema: SchemaRef,
}

#[async_trait]
impl SourceDriver for PanickingSource {
    async fn setup(&self, _source: &SchemaSource) -> Result<()> {
        Ok(())
    }

    fn partitions(&self) -> Vec<Partition> {
        self.partitions.clone()
    }

    fn table_names(&self) -> Vec<String> {
        vec!["bad".to_string()]
    }

    fn table(&self, name: &str) -> Option<TableDef> {
        (name == "bad").then(|| TableDef {
            name: name.to_string(),
            schema: self.schema.clone(),
        })
    }

    async fn scan_partition(
        &self,
        _table: &str,
        _partition: &Partition,
        _projection: Option<Vec<String>>,
        _filters: Vec<Expr>,
    ) -> Result<SendableRecordBatchStream> {
        panic!("backend bug");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_leaf_surfaces_execution_error() {
    let driver = Arc::new(PanickingSource {
        partitions: Partition::from_names(&["p0".to_string()]),
        schema: sales_arrow_schema(),
    });
    let mut schema = Schema::new("analytics");
    attach_source(&mut schema, "bad_src", driver, vec![]);
    let schema = Arc::new(schema);

    let plan = LogicalPlan::TableScan {
        table: "bad".to_string(),
        projection: None,
        filters: vec![],
    };
    let job = plan_job(&schema, plan, vec![], false);
    let err = ExecutorGrid::new(job, schema, Arc::new(InProcessTransport::new()), true)
        .run()
        .await
        .unwrap_err();
    match err {
        FedError::Execution(msg) => assert!(msg.contains("panicked"), "{msg}"),
        other => panic!("expected execution error, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driverless_source_fails_before_dispatch() {
    let mut schema = Schema::new("analytics");
    schema.add_source(Arc::new(SchemaSource {
        name: "broken".to_string(),
        source_type: "mem".to_string(),
        conf: SourceConfig::default(),
        nodes: vec![],
        partitions: Partition::from_names(&["p0".to_string()]),
        driver: None,
    }));
    let schema = Arc::new(schema);

    let planner = PlannerGrid::new(GridConfig::default(), vec![]);
    let ctx = JobContext {
        query_id: QueryId(7),
        schema: schema.clone(),
        plan: LogicalPlan::TableScan {
            table: "anything".to_string(),
            projection: None,
            filters: vec![],
        },
    };
    // A driverless source exposes no tables, so planning fails on the
    // table lookup rather than at dispatch time.
    let err = planner.build_unplanned(&ctx).unwrap_err();
    assert!(matches!(err, FedError::Planning(_)));
}
