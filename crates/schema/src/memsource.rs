//! In-memory source driver.
//!
//! Backs smoke tests and local demos. Tables are seeded through the
//! factory before config load; every `create` for the same source name
//! returns the same shared instance so in-process workers see the same
//! data as the gateway.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use fedgrid_common::{FedError, Result, SourceConfig};
use fedgrid_execution::stream::{memory_stream, SendableRecordBatchStream};
use fedgrid_execution::{compile_expr, Expr};

use crate::schema::{Partition, SchemaSource};
use crate::source::{Pushdown, SourceDriver, SourceFactory, TableDef};

struct MemTable {
    schema: SchemaRef,
    /// Batches per partition id.
    partitions: Vec<Vec<RecordBatch>>,
}

/// One in-memory source: named partitions holding pre-built batches.
pub struct MemSource {
    partitions: Vec<Partition>,
    tables: RwLock<HashMap<String, MemTable>>,
    fail_setup: bool,
}

impl MemSource {
    pub fn new(partition_names: &[String]) -> Self {
        Self {
            partitions: Partition::from_names(partition_names),
            tables: RwLock::new(HashMap::new()),
            fail_setup: false,
        }
    }

    fn with_fail_setup(mut self, fail: bool) -> Self {
        self.fail_setup = fail;
        self
    }

    /// Seed a table. `partitions` must line up with this source's
    /// partition list; missing trailing partitions scan as empty.
    pub fn insert_table(
        &self,
        name: impl Into<String>,
        schema: SchemaRef,
        partitions: Vec<Vec<RecordBatch>>,
    ) {
        self.tables.write().expect("mem table lock poisoned").insert(
            name.into(),
            MemTable {
                schema,
                partitions,
            },
        );
    }
}

#[async_trait]
impl SourceDriver for MemSource {
    async fn setup(&self, source: &SchemaSource) -> Result<()> {
        if self.fail_setup {
            return Err(FedError::Execution(format!(
                "mem source '{}' configured to fail setup",
                source.name
            )));
        }
        Ok(())
    }

    fn partitions(&self) -> Vec<Partition> {
        self.partitions.clone()
    }

    fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .expect("mem table lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn table(&self, name: &str) -> Option<TableDef> {
        self.tables
            .read()
            .expect("mem table lock poisoned")
            .get(name)
            .map(|t| TableDef {
                name: name.to_string(),
                schema: t.schema.clone(),
            })
    }

    fn pushdown(&self) -> Pushdown {
        // Filters are absorbed here; projection stays in the leaf task.
        Pushdown {
            projection: false,
            filters: true,
        }
    }

    async fn scan_partition(
        &self,
        table: &str,
        partition: &Partition,
        _projection: Option<Vec<String>>,
        filters: Vec<Expr>,
    ) -> Result<SendableRecordBatchStream> {
        let tables = self.tables.read().expect("mem table lock poisoned");
        let t = tables
            .get(table)
            .ok_or_else(|| FedError::Planning(format!("unknown table: {table}")))?;
        let schema = t.schema.clone();
        let mut batches = t
            .partitions
            .get(partition.id)
            .cloned()
            .unwrap_or_default();
        drop(tables);

        for f in &filters {
            let compiled = compile_expr(f, &schema)?;
            let mut kept = Vec::with_capacity(batches.len());
            for batch in &batches {
                let mask = compiled.evaluate(batch)?;
                let mask = mask
                    .as_any()
                    .downcast_ref::<arrow::array::BooleanArray>()
                    .ok_or_else(|| {
                        FedError::Execution("filter must evaluate to boolean".to_string())
                    })?;
                let filtered = filter_record_batch(batch, mask)
                    .map_err(|e| FedError::Execution(format!("filter failed: {e}")))?;
                kept.push(filtered);
            }
            batches = kept;
        }

        Ok(memory_stream(schema, batches))
    }
}

/// Factory for [`MemSource`] drivers, keyed on `source_type = "mem"`.
///
/// Holds one shared instance per source name; tests seed tables via
/// [`MemSourceFactory::source`] before the gateway loads its config.
#[derive(Default)]
pub struct MemSourceFactory {
    instances: RwLock<HashMap<String, Arc<MemSource>>>,
}

impl MemSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance for a source name, created on first use.
    pub fn source(&self, conf: &SourceConfig) -> Arc<MemSource> {
        let mut map = self.instances.write().expect("mem factory lock poisoned");
        map.entry(conf.name.clone())
            .or_insert_with(|| {
                Arc::new(
                    MemSource::new(&conf.partition_names())
                        .with_fail_setup(conf.setting_bool("fail_setup")),
                )
            })
            .clone()
    }
}

impl SourceFactory for MemSourceFactory {
    fn source_type(&self) -> &str {
        "mem"
    }

    fn create(&self, conf: &SourceConfig) -> Result<Arc<dyn SourceDriver>> {
        Ok(self.source(conf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow_schema::{DataType, Field, Schema as ArrowSchema};
    use fedgrid_execution::{BinaryOp, LiteralValue};
    use futures::TryStreamExt;

    fn int_batch(values: &[i64]) -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "v",
            DataType::Int64,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(values.to_vec()))],
        )
        .unwrap();
        (schema, batch)
    }

    #[tokio::test]
    async fn scan_applies_pushed_filter() {
        let src = MemSource::new(&["p0".to_string()]);
        let (schema, batch) = int_batch(&[1, 5, 10]);
        src.insert_table("t", schema, vec![vec![batch]]);

        let part = src.partitions()[0].clone();
        let filter = Expr::binary(
            Expr::col("v"),
            BinaryOp::Gt,
            Expr::Literal(LiteralValue::Int64(2)),
        );
        let stream = src
            .scan_partition("t", &part, None, vec![filter])
            .await
            .unwrap();
        let batches: Vec<RecordBatch> = stream.try_collect().await.unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn missing_partition_scans_empty() {
        let src = MemSource::new(&["p0".to_string(), "p1".to_string()]);
        let (schema, batch) = int_batch(&[1]);
        // Only partition 0 seeded.
        src.insert_table("t", schema, vec![vec![batch]]);

        let p1 = src.partitions()[1].clone();
        let stream = src.scan_partition("t", &p1, None, vec![]).await.unwrap();
        let batches: Vec<RecordBatch> = stream.try_collect().await.unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn factory_returns_shared_instance() {
        let factory = MemSourceFactory::new();
        let conf = SourceConfig {
            name: "s".into(),
            source_type: "mem".into(),
            ..Default::default()
        };
        let a = factory.source(&conf);
        let b = factory.source(&conf);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
