//! Expression evaluation and batch streaming primitives for FedGrid.
//!
//! Architecture role:
//! - defines the logical [`Expr`] trees the planner emits and drivers consume
//! - compiles expressions to Arrow-kernel evaluators for operators
//! - provides the schema-carrying batch stream contracts used across the grid
//!
//! Key modules:
//! - [`expr`]
//! - [`expressions`]
//! - [`scalar`]
//! - [`stream`]

pub mod expr;
pub mod expressions;
pub mod scalar;
pub mod stream;

pub use expr::{AggExpr, BinaryOp, Expr, LiteralValue};
pub use expressions::{compile_expr, PhysicalExpr};
pub use scalar::{
    as_f64, encode_group_key, scalar_from_array, scalar_gt, scalar_lt, scalars_to_array,
    ScalarValue,
};
pub use stream::{
    batch_channel, boxed_stream, memory_stream, BatchSender, ChannelClosed, RecordBatchStream,
    SendableRecordBatchStream,
};
