//! Batch streaming contracts between leaf tasks and central operators.
//!
//! Rows move through the grid as pinned, schema-carrying streams of
//! `Result<RecordBatch>`. Producers either hand over already
//! materialized batches (`memory_stream`) or push through a bounded
//! channel (`batch_channel`) so a slow consumer backpressures the scan.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use fedgrid_common::{FedError, Result};
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, Stream, StreamExt};

/// A stream of record batches that knows the schema of every batch it
/// will yield.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> + Send {
    fn schema(&self) -> SchemaRef;
}

/// The boxed form operators and drivers return.
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream>>;

struct Tagged {
    schema: SchemaRef,
    inner: BoxStream<'static, Result<RecordBatch>>,
}

impl Stream for Tagged {
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl RecordBatchStream for Tagged {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

/// Box any batch stream under a schema tag.
pub fn boxed_stream<S>(schema: SchemaRef, inner: S) -> SendableRecordBatchStream
where
    S: Stream<Item = Result<RecordBatch>> + Send + 'static,
{
    Box::pin(Tagged {
        schema,
        inner: inner.boxed(),
    })
}

/// Stream over batches already materialized in memory.
pub fn memory_stream(schema: SchemaRef, batches: Vec<RecordBatch>) -> SendableRecordBatchStream {
    boxed_stream(schema, futures::stream::iter(batches.into_iter().map(Ok)))
}

/// The consuming side of a batch channel hung up.
///
/// Producers treat this as a stop signal rather than a failure of
/// their own: the query was cancelled or already failed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

impl fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("batch channel closed by receiver")
    }
}

impl std::error::Error for ChannelClosed {}

/// Push side of [`batch_channel`].
#[derive(Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Result<RecordBatch>>,
}

impl BatchSender {
    /// Queue one batch, waiting while the buffer is full.
    pub async fn send_batch(
        &mut self,
        batch: RecordBatch,
    ) -> std::result::Result<(), ChannelClosed> {
        self.send(Ok(batch)).await
    }

    /// Terminate the stream with an error.
    pub async fn send_error(&mut self, err: FedError) -> std::result::Result<(), ChannelClosed> {
        self.send(Err(err)).await
    }

    async fn send(&mut self, item: Result<RecordBatch>) -> std::result::Result<(), ChannelClosed> {
        self.tx.send(item).await.map_err(|_| ChannelClosed)
    }
}

/// Bounded producer/consumer pair with `capacity` batches of buffer.
pub fn batch_channel(
    schema: SchemaRef,
    capacity: usize,
) -> (BatchSender, SendableRecordBatchStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (BatchSender { tx }, boxed_stream(schema, rx))
}
