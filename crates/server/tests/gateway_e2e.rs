use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use fedgrid_common::{FedError, GatewayConfig};
use fedgrid_execution::AggExpr;
use fedgrid_grid::{ExecOutput, InProcessTransport, WorkerNode};
use fedgrid_planner::LogicalPlan;
use fedgrid_schema::{MemSourceFactory, Registry};
use fedgrid_server::ServerCtx;

fn orders_arrow_schema() -> SchemaRef {
    Arc::new(ArrowSchema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("amount", DataType::Int64, false),
    ]))
}

fn orders_batch(rows: &[(&str, i64)]) -> RecordBatch {
    RecordBatch::try_new(
        orders_arrow_schema(),
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

/// Registry with the mem driver registered and the orders table seeded
/// across two partitions.
fn seeded_registry(config: &GatewayConfig) -> Arc<Registry> {
    let factory = Arc::new(MemSourceFactory::new());
    if let Some(conf) = config.source("orders_src") {
        let src = factory.source(conf);
        src.insert_table(
            "orders",
            orders_arrow_schema(),
            vec![
                vec![orders_batch(&[("east", 10), ("west", 20)])],
                vec![orders_batch(&[("east", 5), ("west", 7)])],
            ],
        );
    }
    let registry = Arc::new(Registry::new());
    registry.register_factory(factory);
    registry
}

fn base_config() -> GatewayConfig {
    GatewayConfig::from_json_str(
        r#"{
            "sources": [
                {"name": "orders_src", "source_type": "mem",
                 "partitions": ["p0", "p1"]}
            ],
            "schemas": [{"name": "web", "sources": ["orders_src"]}]
        }"#,
    )
    .unwrap()
}

fn sum_by_region_plan() -> LogicalPlan {
    LogicalPlan::Aggregate {
        group_by: vec!["region".to_string()],
        aggr_exprs: vec![(AggExpr::Sum("amount".to_string()), "total".to_string())],
        input: Box::new(LogicalPlan::TableScan {
            table: "orders".to_string(),
            projection: None,
            filters: vec![],
        }),
    }
}

fn collect_totals(out: &ExecOutput) -> Vec<(String, i64)> {
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
    let mut rows: Vec<(String, i64)> = (0..batch.num_rows())
        .map(|i| (region.value(i).to_string(), total.value(i)))
        .collect();
    rows.sort();
    rows
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_schema_name_aborts_startup() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "sources": [{"name": "orders_src", "source_type": "mem"}],
            "schemas": [
                {"name": "web", "sources": ["orders_src"]},
                {"name": "web", "sources": []}
            ]
        }"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);
    let err = ServerCtx::init(config, registry.clone(), Arc::new(InProcessTransport::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, FedError::Config(_)), "{err}");
    // Nothing was registered before the failure surfaced.
    assert!(registry.schema_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dangling_source_reference_aborts_startup() {
    let config = GatewayConfig::from_json_str(
        r#"{"schemas": [{"name": "web", "sources": ["missing_src"]}]}"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);
    let err = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap_err();
    match err {
        FedError::Config(msg) => assert!(msg.contains("missing_src"), "{msg}"),
        other => panic!("expected config error, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_source_type_degrades_not_fails() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "sources": [
                {"name": "orders_src", "source_type": "mem",
                 "partitions": ["p0", "p1"]},
                {"name": "legacy", "source_type": "cassandra"}
            ],
            "schemas": [{"name": "web", "sources": ["orders_src", "legacy"]}]
        }"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);
    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();

    let schema = ctx.schema_loader("web").unwrap();
    // The degraded source stays attached but contributes no tables.
    let legacy = schema.source("legacy").unwrap();
    assert!(legacy.driver.is_none());
    assert!(legacy.partitions.is_empty());
    assert_eq!(schema.table_names(), vec!["orders"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_setup_degrades_single_source() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "sources": [
                {"name": "orders_src", "source_type": "mem",
                 "partitions": ["p0", "p1"]},
                {"name": "flaky", "source_type": "mem",
                 "settings": {"fail_setup": true}}
            ],
            "schemas": [{"name": "web", "sources": ["orders_src", "flaky"]}]
        }"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);
    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();

    let schema = ctx.schema_loader("web").unwrap();
    let flaky = schema.source("flaky").unwrap();
    assert!(flaky.driver.is_none());
    assert!(flaky.partitions.is_empty());
    // The healthy source still serves queries.
    assert!(schema.table("orders").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_schema_is_not_found_consistently() {
    let config = base_config();
    let registry = seeded_registry(&config);
    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();
    for _ in 0..3 {
        let err = ctx.schema_loader("warehouse").unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn info_schema_follows_config_order() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "schemas": [
                {"name": "zeta", "sources": []},
                {"name": "alpha", "sources": []}
            ]
        }"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);
    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();
    // Configuration order wins over name order.
    assert_eq!(ctx.info_schema().unwrap().name, "zeta");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn table_lookup_distinguishes_error_kinds() {
    let config = base_config();
    let registry = seeded_registry(&config);
    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();

    assert!(ctx.table("nope", "orders").unwrap_err().is_not_found());
    assert!(ctx.table("nope", "orders").unwrap_err().is_not_found());
    let err = ctx.table("web", "nope").unwrap_err();
    assert!(!err.is_not_found());
    assert!(matches!(err, FedError::Planning(_)));
    assert!(ctx.table("web", "orders").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unplanned_and_distributed_runs_agree() {
    let config = GatewayConfig::from_json_str(
        r#"{
            "sources": [
                {"name": "orders_src", "source_type": "mem",
                 "partitions": ["p0", "p1"]}
            ],
            "schemas": [{"name": "web", "sources": ["orders_src"]}],
            "nodes": [
                {"source": "orders_src", "address": "w-1"},
                {"source": "orders_src", "address": "w-2"}
            ],
            "worker_ct": 2
        }"#,
    )
    .unwrap();
    let registry = seeded_registry(&config);

    // Attach both planned workers to the in-process grid.
    let transport = Arc::new(InProcessTransport::new());
    for addr in ["w-1", "w-2"] {
        let node = Arc::new(WorkerNode::new());
        let driver = registry
            .factory("mem")
            .unwrap()
            .create(config.source("orders_src").unwrap())
            .unwrap();
        node.register_driver("orders_src", driver);
        transport.add_worker(addr, node);
    }

    let ctx = ServerCtx::init(config, registry, transport).await.unwrap();

    let local = ctx.job_context("web", sum_by_region_plan()).unwrap();
    let local_out = ctx.job_maker(&local).unwrap().run().await.unwrap();

    let dist = ctx.job_context("web", sum_by_region_plan()).unwrap();
    let exec = ctx.build_sql_job(&dist).unwrap();
    assert_eq!(exec.job().task_count(), 2);
    let dist_out = exec.run().await.unwrap();

    let expected = vec![("east".to_string(), 15), ("west".to_string(), 27)];
    assert_eq!(collect_totals(&local_out), expected);
    assert_eq!(collect_totals(&dist_out), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_publishes_new_snapshot_copy_on_write() {
    let config = base_config();
    let factory = Arc::new(MemSourceFactory::new());
    let src = factory.source(config.source("orders_src").unwrap());
    src.insert_table(
        "orders",
        orders_arrow_schema(),
        vec![vec![orders_batch(&[("east", 1)])], vec![]],
    );
    let registry = Arc::new(Registry::new());
    registry.register_factory(factory);

    let ctx = ServerCtx::init(config, registry, Arc::new(InProcessTransport::new()))
        .await
        .unwrap();

    let before = ctx.schema_loader("web").unwrap();
    assert_eq!(before.table_names(), vec!["orders"]);

    // A table appears on the backend after load.
    src.insert_table(
        "returns",
        orders_arrow_schema(),
        vec![vec![], vec![]],
    );
    ctx.refresh_schemas();

    let after = ctx.schema_loader("web").unwrap();
    assert_eq!(after.table_names(), vec!["orders", "returns"]);
    // The pre-refresh snapshot is untouched.
    assert_eq!(before.table_names(), vec!["orders"]);
}
