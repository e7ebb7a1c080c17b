//! Backend driver seam: the trait every federated source implements.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use fedgrid_common::{Result, SourceConfig};
use fedgrid_execution::stream::SendableRecordBatchStream;
use fedgrid_execution::Expr;

use crate::schema::{Partition, SchemaSource};

/// Table definition exposed by a driver.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub schema: SchemaRef,
}

/// What a driver can absorb from the compiled plan.
///
/// Anything a driver declines stays in the leaf task as a residual
/// operator, so declining is always correct, just slower.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pushdown {
    pub projection: bool,
    pub filters: bool,
}

/// Storage abstraction for one federated backend.
///
/// Implementations are backend-specific (for example elasticsearch,
/// mongo, an in-memory seed). A driver instance is shared by every
/// query against its source; `scan_partition` must be safe to call
/// concurrently.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// One-time connection/handshake against the configured backend.
    ///
    /// # Errors
    /// Returns an error when the backend is unreachable or rejects the
    /// configuration. The source stays attached without a driver; only
    /// queries touching it fail.
    async fn setup(&self, source: &SchemaSource) -> Result<()>;

    /// Partitions this driver exposes for parallel scanning.
    fn partitions(&self) -> Vec<Partition>;

    /// Tables this source currently exposes, in a stable order.
    fn table_names(&self) -> Vec<String>;

    /// Table definition by name.
    fn table(&self, name: &str) -> Option<TableDef>;

    /// Pushdown capabilities of this backend.
    fn pushdown(&self) -> Pushdown {
        Pushdown::default()
    }

    /// Start a scan of one partition of a table.
    ///
    /// `projection`/`filters` are only passed when [`Self::pushdown`]
    /// declared support; otherwise they arrive empty and the grid
    /// applies them as residual operators.
    async fn scan_partition(
        &self,
        table: &str,
        partition: &Partition,
        projection: Option<Vec<String>>,
        filters: Vec<Expr>,
    ) -> Result<SendableRecordBatchStream>;
}

/// Creates driver instances for one `source_type` key.
///
/// Factories are registered once at startup; creation failures degrade
/// the source rather than aborting the server.
pub trait SourceFactory: Send + Sync {
    /// Driver key this factory serves, matched case-insensitively.
    fn source_type(&self) -> &str;

    /// Build a driver for one configured source.
    fn create(&self, conf: &SourceConfig) -> Result<Arc<dyn SourceDriver>>;
}
