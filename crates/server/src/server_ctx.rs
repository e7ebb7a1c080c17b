//! Gateway bootstrap and per-process orchestration.
//!
//! `ServerCtx` owns the load phase: it turns the parsed configuration
//! into registered schemas, wires the planner to the discovered worker
//! set, and hands frontends ready-to-run executors. Configuration
//! contract violations abort startup; a single misbehaving backend
//! only degrades its own source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fedgrid_common::{FedError, GatewayConfig, QueryId, Result, SourceConfig};
use fedgrid_grid::{ExecutorGrid, GridTransport};
use fedgrid_planner::{GridConfig, JobContext, LogicalPlan, PlannerGrid};
use fedgrid_schema::{Partition, Registry, Schema, SchemaSource, Table};
use tracing::{debug, info, warn};

/// Per-process orchestration object: registry, planner, transport.
pub struct ServerCtx {
    config: GatewayConfig,
    registry: Arc<Registry>,
    transport: Arc<dyn GridTransport>,
    planner: PlannerGrid,
    next_query: AtomicU64,
}

impl std::fmt::Debug for ServerCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCtx")
            .field("config", &self.config)
            .field("next_query", &self.next_query)
            .finish_non_exhaustive()
    }
}

impl ServerCtx {
    /// Bootstrap the gateway: run the load phase against the registry,
    /// then build the planner from the configured worker addresses.
    ///
    /// Idempotent with respect to already-registered schemas: names the
    /// registry already holds are carried forward untouched.
    pub async fn init(
        config: GatewayConfig,
        registry: Arc<Registry>,
        transport: Arc<dyn GridTransport>,
    ) -> Result<Arc<Self>> {
        load_config(&config, registry.as_ref()).await?;

        // Worker discovery: configured node addresses plus whatever the
        // transport already knows about. The planner dedups and sorts.
        let mut discovered: Vec<String> = config.nodes.iter().map(|n| n.address.clone()).collect();
        discovered.extend(transport.workers());
        let planner = PlannerGrid::new(
            GridConfig {
                worker_ct: config.effective_worker_ct(),
                coordinator_address: config.coordinator_address.clone(),
                suppress_recover: config.suppress_recover,
            },
            discovered,
        );
        info!(
            schemas = registry.schema_names().len(),
            workers = planner.workers().len(),
            "gateway context initialized"
        );
        Ok(Arc::new(Self {
            config,
            registry,
            transport,
            planner,
            next_query: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn planner(&self) -> &PlannerGrid {
        &self.planner
    }

    /// Registry lookup exposed to the compilation layer. Unknown names
    /// surface as the distinguished not-found kind.
    pub fn schema_loader(&self, name: &str) -> Result<Arc<Schema>> {
        self.registry
            .schema(name)
            .ok_or_else(|| FedError::SchemaNotFound(name.to_string()))
    }

    /// Default schema for session/introspection queries: the first
    /// schema in configuration order, falling back to name order for
    /// schemas registered outside the config.
    pub fn info_schema(&self) -> Option<Arc<Schema>> {
        self.config
            .schemas
            .iter()
            .find_map(|s| self.registry.schema(&s.name))
            .or_else(|| {
                self.registry
                    .schema_names()
                    .first()
                    .and_then(|n| self.registry.schema(n))
            })
    }

    /// Table lookup that keeps "unknown schema" and "unknown table in a
    /// known schema" distinguishable for callers.
    pub fn table(&self, schema_name: &str, table_name: &str) -> Result<Arc<Table>> {
        let schema = self.schema_loader(schema_name)?;
        schema.table(table_name).ok_or_else(|| {
            FedError::Planning(format!(
                "unknown table '{table_name}' in schema '{schema_name}'"
            ))
        })
    }

    /// Bind a resolved plan to a schema snapshot under a fresh query id.
    pub fn job_context(&self, schema_name: &str, plan: LogicalPlan) -> Result<JobContext> {
        let schema = self.schema_loader(schema_name)?;
        Ok(JobContext {
            query_id: QueryId(self.next_query.fetch_add(1, Ordering::Relaxed)),
            schema,
            plan,
        })
    }

    /// Unplanned fast path: every leaf pinned to this process.
    pub fn job_maker(&self, ctx: &JobContext) -> Result<ExecutorGrid> {
        let job = self.planner.build_unplanned(ctx)?;
        Ok(self.executor(job, ctx))
    }

    /// Full distributed build across the known worker set.
    pub fn build_sql_job(&self, ctx: &JobContext) -> Result<ExecutorGrid> {
        let job = self.planner.build_sql_job(ctx)?;
        Ok(self.executor(job, ctx))
    }

    fn executor(&self, job: fedgrid_planner::GridJob, ctx: &JobContext) -> ExecutorGrid {
        ExecutorGrid::new(
            job,
            ctx.schema.clone(),
            self.transport.clone(),
            self.planner.config().suppress_recover,
        )
    }

    /// Rebuild one schema's table metadata from its attached drivers
    /// and publish the new snapshot atomically. In-flight compilations
    /// keep whichever snapshot they already hold.
    pub fn refresh_schema(&self, name: &str) -> Result<()> {
        self.registry
            .rebuild(name)
            .ok_or_else(|| FedError::SchemaNotFound(name.to_string()))?;
        Ok(())
    }

    /// One refresh pass over every registered schema.
    pub fn refresh_schemas(&self) {
        for name in self.registry.schema_names() {
            if let Err(err) = self.refresh_schema(&name) {
                warn!(schema = %name, error = %err, "schema refresh failed");
            }
        }
        debug!("schema refresh pass complete");
    }

    /// Start the periodic refresh loop. Returns `None` when the
    /// configured interval is zero.
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let secs = self.config.schema_refresh_secs;
        if secs == 0 {
            return None;
        }
        let ctx = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(secs));
            // The first tick fires immediately; load already refreshed.
            tick.tick().await;
            loop {
                tick.tick().await;
                ctx.refresh_schemas();
            }
        }))
    }
}

/// The load phase. Duplicate schema names and dangling source
/// references are fatal; everything driver-related degrades per-source.
async fn load_config(config: &GatewayConfig, registry: &Registry) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for sc in &config.schemas {
        if !seen.insert(sc.name.as_str()) {
            return Err(FedError::Config(format!(
                "duplicate schema name: {}",
                sc.name
            )));
        }
    }

    for sc in &config.schemas {
        if registry.schema(&sc.name).is_some() {
            debug!(schema = %sc.name, "schema already registered, carried forward");
            continue;
        }
        registry.schema_add(Schema::new(&sc.name))?;
        for source_name in &sc.sources {
            let conf = config.source(source_name).ok_or_else(|| {
                FedError::Config(format!(
                    "schema '{}' references unknown source '{}'",
                    sc.name, source_name
                ))
            })?;
            let source = build_source(config, registry, conf).await;
            registry.source_schema_add(&sc.name, Arc::new(source))?;
        }
        // Pull live metadata once every source is attached.
        let _ = registry.rebuild(&sc.name);
    }
    Ok(())
}

/// Build one `SchemaSource`. Never fails the load: an unknown type or
/// a failing setup leaves the source attached without a driver.
async fn build_source(
    config: &GatewayConfig,
    registry: &Registry,
    conf: &SourceConfig,
) -> SchemaSource {
    let source_type = conf.source_type.to_ascii_lowercase();
    let explicit_nodes = config.nodes_for(&conf.name);
    let nodes = if explicit_nodes.is_empty() {
        // One fabricated node per host when nothing is configured.
        conf.hosts.clone()
    } else {
        explicit_nodes
    };

    let mut source = SchemaSource {
        name: conf.name.clone(),
        source_type: source_type.clone(),
        conf: conf.clone(),
        nodes,
        partitions: Vec::new(),
        driver: None,
    };

    let factory = match registry.factory(&source_type) {
        Some(f) => f,
        None => {
            warn!(
                source = %conf.name,
                source_type = %source_type,
                "no driver factory registered, source attached without tables"
            );
            return source;
        }
    };
    let driver = match factory.create(conf) {
        Ok(d) => d,
        Err(err) => {
            warn!(source = %conf.name, error = %err, "driver construction failed, source degraded");
            return source;
        }
    };
    match driver.setup(&source).await {
        Ok(()) => {
            let mut partitions = driver.partitions();
            if partitions.is_empty() {
                partitions = Partition::from_names(&conf.partition_names());
            }
            source.partitions = partitions;
            source.driver = Some(driver);
            info!(
                source = %conf.name,
                source_type = %source_type,
                partitions = source.partitions.len(),
                "source attached"
            );
        }
        Err(err) => {
            // Partitions stay empty until a setup succeeds.
            warn!(source = %conf.name, error = %err, "source setup failed, source degraded");
        }
    }
    source
}
