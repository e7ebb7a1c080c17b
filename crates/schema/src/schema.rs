//! Federated schema model: one namespace over one or more sources.
//!
//! `Schema` values are immutable once published. Refresh builds a new
//! value and swaps the registry pointer, so in-flight queries keep the
//! snapshot they planned against.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use fedgrid_common::{FedError, Result, SourceConfig};
use tracing::warn;

use crate::source::SourceDriver;

/// One scannable slice of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Zero-based index, used for worker placement.
    pub id: usize,
    pub name: String,
}

impl Partition {
    /// Partitions from configured names, ids assigned in order.
    pub fn from_names(names: &[String]) -> Vec<Partition> {
        names
            .iter()
            .enumerate()
            .map(|(id, name)| Partition {
                id,
                name: name.clone(),
            })
            .collect()
    }
}

/// A table resolved inside a schema, tagged with its owning source.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub schema: SchemaRef,
    /// Name of the source that exposes this table.
    pub source: String,
}

/// One backend attached to a schema.
pub struct SchemaSource {
    pub name: String,
    /// Driver key as configured, lowercased.
    pub source_type: String,
    pub conf: SourceConfig,
    /// Grid node addresses serving this source.
    pub nodes: Vec<String>,
    pub partitions: Vec<Partition>,
    /// Absent when driver setup failed or the type was unknown;
    /// the source stays attached and queries against it fail per-query.
    pub driver: Option<Arc<dyn SourceDriver>>,
}

impl std::fmt::Debug for SchemaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSource")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .field("partitions", &self.partitions.len())
            .field("has_driver", &self.driver.is_some())
            .finish()
    }
}

impl SchemaSource {
    /// Driver handle, or a planning error naming the source.
    pub fn driver(&self) -> Result<Arc<dyn SourceDriver>> {
        self.driver.clone().ok_or_else(|| {
            FedError::Planning(format!(
                "source '{}' has no usable driver (type '{}')",
                self.name, self.source_type
            ))
        })
    }
}

/// A federated namespace: tables from every attached source under one name.
#[derive(Debug, Default)]
pub struct Schema {
    pub name: String,
    sources: Vec<Arc<SchemaSource>>,
    tables: HashMap<String, Arc<Table>>,
}

impl Clone for Schema {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sources: self.sources.clone(),
            tables: self.tables.clone(),
        }
    }
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            tables: HashMap::new(),
        }
    }

    /// Attach a source and absorb its tables.
    ///
    /// Table names already claimed by an earlier source keep their
    /// original owner; the collision is logged and the new table
    /// dropped, so attachment order decides ownership.
    pub fn add_source(&mut self, source: Arc<SchemaSource>) {
        if let Some(driver) = &source.driver {
            for table_name in driver.table_names() {
                if self.tables.contains_key(&table_name) {
                    warn!(
                        schema = %self.name,
                        source = %source.name,
                        table = %table_name,
                        "table name already claimed by an earlier source, skipping"
                    );
                    continue;
                }
                if let Some(def) = driver.table(&table_name) {
                    self.tables.insert(
                        table_name.clone(),
                        Arc::new(Table {
                            name: table_name,
                            schema: def.schema,
                            source: source.name.clone(),
                        }),
                    );
                }
            }
        }
        self.sources.push(source);
    }

    /// Table lookup within this schema.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Source by name.
    pub fn source(&self, name: &str) -> Option<Arc<SchemaSource>> {
        self.sources.iter().find(|s| s.name == name).cloned()
    }

    /// All sources in attachment order.
    pub fn sources(&self) -> &[Arc<SchemaSource>] {
        &self.sources
    }
}
