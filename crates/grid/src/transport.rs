//! Worker transport seam.
//!
//! The executor talks to remote workers only through [`GridTransport`].
//! The in-process implementation backs tests and single-binary
//! deployments; a networked implementation can replace it without
//! touching the executor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use fedgrid_common::{FedError, Result};
use fedgrid_execution::stream::SendableRecordBatchStream;
use fedgrid_planner::LeafTask;
use fedgrid_schema::SourceDriver;
use tokio::sync::watch;

use crate::task::spawn_leaf_task;

/// Dispatch surface for remote leaf tasks.
#[async_trait]
pub trait GridTransport: Send + Sync {
    /// Known worker addresses, unordered.
    fn workers(&self) -> Vec<String>;

    /// Start a leaf task on the worker at `addr`.
    ///
    /// `schema` is the task's expected output schema; the returned
    /// stream yields exactly that shape. Dispatch to an unknown or
    /// unreachable worker is an execution error.
    async fn dispatch(
        &self,
        addr: &str,
        task: LeafTask,
        schema: SchemaRef,
        cancel: watch::Receiver<bool>,
    ) -> Result<SendableRecordBatchStream>;
}

/// One simulated worker process: a driver per source name.
#[derive(Default)]
pub struct WorkerNode {
    drivers: RwLock<HashMap<String, Arc<dyn SourceDriver>>>,
}

impl WorkerNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_driver(&self, source: impl Into<String>, driver: Arc<dyn SourceDriver>) {
        self.drivers
            .write()
            .expect("worker driver lock poisoned")
            .insert(source.into(), driver);
    }

    fn driver(&self, source: &str) -> Result<Arc<dyn SourceDriver>> {
        self.drivers
            .read()
            .expect("worker driver lock poisoned")
            .get(source)
            .cloned()
            .ok_or_else(|| {
                FedError::Execution(format!("worker has no driver for source '{source}'"))
            })
    }
}

/// Transport that runs every "remote" task inside the gateway process.
#[derive(Default)]
pub struct InProcessTransport {
    nodes: RwLock<HashMap<String, Arc<WorkerNode>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a worker under an address.
    pub fn add_worker(&self, addr: impl Into<String>, node: Arc<WorkerNode>) {
        self.nodes
            .write()
            .expect("transport node lock poisoned")
            .insert(addr.into(), node);
    }
}

#[async_trait]
impl GridTransport for InProcessTransport {
    fn workers(&self) -> Vec<String> {
        self.nodes
            .read()
            .expect("transport node lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    async fn dispatch(
        &self,
        addr: &str,
        task: LeafTask,
        schema: SchemaRef,
        cancel: watch::Receiver<bool>,
    ) -> Result<SendableRecordBatchStream> {
        let node = self
            .nodes
            .read()
            .expect("transport node lock poisoned")
            .get(addr)
            .cloned()
            .ok_or_else(|| FedError::Execution(format!("worker unreachable: {addr}")))?;
        let driver = node.driver(&task.source)?;
        Ok(spawn_leaf_task(driver, task, cancel, schema))
    }
}
