//! Leaf task execution: one partition scan plus residual operators.

use std::sync::Arc;

use fedgrid_common::{FedError, Result};
use fedgrid_execution::stream::{batch_channel, SendableRecordBatchStream};
use fedgrid_planner::{LeafOp, LeafTask};
use fedgrid_schema::SourceDriver;
use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tracing::debug;

use crate::operators::{run_filter, run_hash_aggregate, run_project, AggPhase, ExecOutput};

/// Channel depth between a leaf producer and the central consumer.
const TASK_CHANNEL_CAPACITY: usize = 8;

/// Run one leaf task to completion against its driver.
///
/// The scan stream is drained under the cancellation watch; residual
/// operators run on the materialized result. Cancellation surfaces as
/// [`FedError::Canceled`].
pub async fn run_leaf_task(
    driver: Arc<dyn SourceDriver>,
    task: &LeafTask,
    mut cancel: watch::Receiver<bool>,
) -> Result<ExecOutput> {
    let partition = driver
        .partitions()
        .into_iter()
        .find(|p| p.id == task.partition)
        .ok_or_else(|| {
            FedError::Execution(format!(
                "source '{}' has no partition {}",
                task.source, task.partition
            ))
        })?;

    let mut stream = driver
        .scan_partition(
            &task.table,
            &partition,
            task.projection.clone(),
            task.filters.clone(),
        )
        .await?;
    let scan_schema = stream.schema();

    let mut batches = Vec::new();
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Err(FedError::Canceled);
                }
            }
            item = stream.next() => {
                match item {
                    Some(batch) => batches.push(batch?),
                    None => break,
                }
            }
        }
    }

    let mut out = ExecOutput::new(scan_schema, batches);
    for op in &task.local_ops {
        if *cancel.borrow() {
            return Err(FedError::Canceled);
        }
        out = match op {
            LeafOp::Filter(predicate) => run_filter(out, predicate)?,
            LeafOp::Project(exprs) => run_project(out, exprs)?,
            LeafOp::PartialAggregate {
                group_by,
                aggr_exprs,
            } => run_hash_aggregate(out, group_by, aggr_exprs, AggPhase::Partial)?,
        };
    }
    debug!(
        task_id = %task.task_id,
        table = %task.table,
        partition = task.partition,
        rows = out.num_rows(),
        "leaf task finished"
    );
    Ok(out)
}

/// Spawn a leaf task and expose its output as a batch stream.
///
/// Failures (including cancellation) arrive as an error item on the
/// stream; the channel closing marks end of stream. A panicking driver
/// is contained here and surfaces as an execution error so one bad
/// leaf cannot take down its worker.
pub fn spawn_leaf_task(
    driver: Arc<dyn SourceDriver>,
    task: LeafTask,
    cancel: watch::Receiver<bool>,
    schema: arrow_schema::SchemaRef,
) -> SendableRecordBatchStream {
    let (mut tx, stream) = batch_channel(schema, TASK_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let task_id = task.task_id;
        let result = std::panic::AssertUnwindSafe(run_leaf_task(driver, &task, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(FedError::Execution(format!(
                    "leaf task {task_id} panicked"
                )))
            });
        match result {
            Ok(out) => {
                for batch in out.batches {
                    if tx.send_batch(batch).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send_error(err).await;
            }
        }
    });
    stream
}
