//! Process-wide registry of schemas and driver factories.
//!
//! Published schemas are immutable `Arc<Schema>` snapshots; refresh
//! replaces the pointer instead of mutating in place, so readers never
//! observe a half-updated schema.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fedgrid_common::{FedError, Result};
use tracing::info;

use crate::schema::{Schema, SchemaSource};
use crate::source::SourceFactory;

#[derive(Default)]
pub struct Registry {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
    factories: RwLock<HashMap<String, Arc<dyn SourceFactory>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schemas = self
            .schemas
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        let factories = self
            .factories
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("Registry")
            .field("schemas", &schemas)
            .field("factories", &factories)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a driver factory, keyed by lowercased type.
    pub fn register_factory(&self, factory: Arc<dyn SourceFactory>) {
        let key = factory.source_type().to_ascii_lowercase();
        self.factories
            .write()
            .expect("factory lock poisoned")
            .insert(key, factory);
    }

    /// Factory lookup, case-insensitive on the type key.
    pub fn factory(&self, source_type: &str) -> Option<Arc<dyn SourceFactory>> {
        self.factories
            .read()
            .expect("factory lock poisoned")
            .get(&source_type.to_ascii_lowercase())
            .cloned()
    }

    /// Current snapshot of a schema by name.
    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .expect("schema lock poisoned")
            .get(name)
            .cloned()
    }

    /// Register a brand new schema. Duplicate names are a config error.
    pub fn schema_add(&self, schema: Schema) -> Result<()> {
        let mut map = self.schemas.write().expect("schema lock poisoned");
        if map.contains_key(&schema.name) {
            return Err(FedError::Config(format!(
                "duplicate schema name: {}",
                schema.name
            )));
        }
        info!(schema = %schema.name, "schema registered");
        map.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Publish a rebuilt snapshot, replacing any previous version.
    pub fn publish(&self, schema: Arc<Schema>) {
        self.schemas
            .write()
            .expect("schema lock poisoned")
            .insert(schema.name.clone(), schema);
    }

    /// Attach a source to an existing schema.
    ///
    /// Copy-on-write: clones the current snapshot, attaches, then
    /// republishes. In-flight queries keep the old snapshot.
    pub fn source_schema_add(&self, schema_name: &str, source: Arc<SchemaSource>) -> Result<()> {
        let current = self
            .schema(schema_name)
            .ok_or_else(|| FedError::SchemaNotFound(schema_name.to_string()))?;
        let mut next = (*current).clone();
        next.add_source(source);
        self.publish(Arc::new(next));
        Ok(())
    }

    /// Rebuild one schema from its attached drivers and publish the
    /// fresh snapshot. Returns `None` for unknown names.
    ///
    /// Copy-on-write like [`source_schema_add`](Self::source_schema_add):
    /// holders of the previous snapshot are unaffected.
    pub fn rebuild(&self, name: &str) -> Option<Arc<Schema>> {
        let current = self.schema(name)?;
        let mut fresh = Schema::new(name);
        for source in current.sources() {
            fresh.add_source(source.clone());
        }
        let fresh = Arc::new(fresh);
        self.publish(fresh.clone());
        Some(fresh)
    }

    /// Registered schema names in sorted order.
    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .expect("schema lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
