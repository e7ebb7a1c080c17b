//! Per-query executor: fans leaf tasks out, gates on their completion,
//! then runs the central plan on the gateway.
//!
//! Failure policy is deliberate: any leaf failure is terminal for the
//! whole query. There is no redispatch, because most sources are not
//! idempotent under partial re-reads; callers retry whole queries.

use std::collections::HashMap;
use std::sync::Arc;

use fedgrid_common::{FedError, FragmentId, Result};
use fedgrid_execution::SendableRecordBatchStream;
use fedgrid_planner::{CentralPlan, GridJob, WorkerAssignment};
use fedgrid_schema::Schema;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::operators::{
    run_distinct, run_filter, run_hash_aggregate, run_hash_join, run_limit, run_project, run_sort,
    ExecOutput,
};
use crate::task::spawn_leaf_task;
use crate::transport::GridTransport;

/// Cancels one running query. Cheap to clone; safe to fire more than
/// once or after completion.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Owns the runtime of one compiled [`GridJob`].
pub struct ExecutorGrid {
    job: GridJob,
    schema: Arc<Schema>,
    transport: Arc<dyn GridTransport>,
    suppress_recover: bool,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutorGrid {
    pub fn new(
        job: GridJob,
        schema: Arc<Schema>,
        transport: Arc<dyn GridTransport>,
        suppress_recover: bool,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            job,
            schema,
            transport,
            suppress_recover,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn job(&self) -> &GridJob {
        &self.job
    }

    /// Handle that cancels this query from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run the job to completion.
    ///
    /// The work happens on a spawned task so a panicking operator can
    /// be contained: with suppress-recover enabled the panic becomes a
    /// terminal [`FedError::Execution`], otherwise it propagates.
    pub async fn run(self) -> Result<ExecOutput> {
        let query_id = self.job.query_id;
        let suppress_recover = self.suppress_recover;
        let handle = tokio::spawn(run_inner(
            self.job,
            self.schema,
            self.transport,
            self.cancel_rx,
        ));
        match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                if suppress_recover {
                    error!(query_id = %query_id, "query task panicked");
                    Err(FedError::Execution(format!(
                        "query {query_id} panicked during execution"
                    )))
                } else {
                    std::panic::resume_unwind(join_err.into_panic())
                }
            }
            Err(join_err) => Err(FedError::Execution(format!(
                "query {query_id} task aborted: {join_err}"
            ))),
        }
    }
}

async fn run_inner(
    job: GridJob,
    schema: Arc<Schema>,
    transport: Arc<dyn GridTransport>,
    cancel: watch::Receiver<bool>,
) -> Result<ExecOutput> {
    info!(
        query_id = %job.query_id,
        schema = %job.schema,
        fragments = job.fragments.len(),
        tasks = job.task_count(),
        "query started"
    );

    // Dispatch every leaf before draining anything, so all partitions
    // scan concurrently.
    let mut fragment_streams: Vec<(FragmentId, Vec<SendableRecordBatchStream>)> =
        Vec::with_capacity(job.fragments.len());
    for fragment in &job.fragments {
        let mut streams = Vec::with_capacity(fragment.tasks.len());
        for task in &fragment.tasks {
            let stream = match &task.worker {
                WorkerAssignment::Local => {
                    let source = schema.source(&task.source).ok_or_else(|| {
                        FedError::Execution(format!("missing source '{}'", task.source))
                    })?;
                    let driver = source.driver()?;
                    spawn_leaf_task(
                        driver,
                        task.clone(),
                        cancel.clone(),
                        fragment.schema.clone(),
                    )
                }
                WorkerAssignment::Remote(addr) => {
                    transport
                        .dispatch(addr, task.clone(), fragment.schema.clone(), cancel.clone())
                        .await?
                }
            };
            streams.push(stream);
        }
        fragment_streams.push((fragment.id, streams));
    }

    // Completion gate: every leaf stream must reach end-of-stream
    // before any central work starts. The first error cancels the
    // rest and terminates the query.
    let mut outputs: HashMap<FragmentId, ExecOutput> = HashMap::new();
    let mut cancel_watch = cancel.clone();
    for fragment in &job.fragments {
        let (_, streams) = fragment_streams.remove(0);
        let mut batches = Vec::new();
        for mut stream in streams {
            loop {
                tokio::select! {
                    changed = cancel_watch.changed() => {
                        if changed.is_err() || *cancel_watch.borrow() {
                            return Err(FedError::Canceled);
                        }
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(batch)) => batches.push(batch),
                            Some(Err(err)) => {
                                debug!(
                                    query_id = %job.query_id,
                                    fragment = %fragment.id,
                                    error = %err,
                                    "leaf task failed, terminating query"
                                );
                                return Err(err);
                            }
                            None => break,
                        }
                    }
                }
            }
        }
        outputs.insert(fragment.id, ExecOutput::new(fragment.schema.clone(), batches));
    }

    if *cancel.borrow() {
        return Err(FedError::Canceled);
    }

    let out = evaluate(&job.central, &mut outputs)?;
    info!(
        query_id = %job.query_id,
        rows = out.num_rows(),
        "query finished"
    );
    Ok(out)
}

fn evaluate(
    plan: &CentralPlan,
    fragments: &mut HashMap<FragmentId, ExecOutput>,
) -> Result<ExecOutput> {
    match plan {
        CentralPlan::Merge { fragment } => fragments
            .remove(fragment)
            .ok_or_else(|| FedError::Execution(format!("missing fragment output {fragment}"))),
        CentralPlan::Filter { predicate, input } => {
            let child = evaluate(input, fragments)?;
            run_filter(child, predicate)
        }
        CentralPlan::Project { exprs, input } => {
            let child = evaluate(input, fragments)?;
            run_project(child, exprs)
        }
        CentralPlan::Aggregate {
            mode,
            group_by,
            aggr_exprs,
            input,
        } => {
            let child = evaluate(input, fragments)?;
            run_hash_aggregate(child, group_by, aggr_exprs, (*mode).into())
        }
        CentralPlan::Join { left, right, on } => {
            let l = evaluate(left, fragments)?;
            let r = evaluate(right, fragments)?;
            run_hash_join(l, r, on)
        }
        CentralPlan::Sort { keys, input } => {
            let child = evaluate(input, fragments)?;
            run_sort(child, keys)
        }
        CentralPlan::Distinct { input } => {
            let child = evaluate(input, fragments)?;
            run_distinct(child)
        }
        CentralPlan::Limit { n, input } => {
            let child = evaluate(input, fragments)?;
            run_limit(child, *n)
        }
    }
}
