//! Expression compilation and evaluation for grid operators.
//!
//! Input contract:
//! - column references are by name and must exist in the input schema;
//! - arithmetic requires both sides to share a type (no implicit casts).
//!
//! Output contract:
//! - each evaluation returns an `ArrayRef` aligned to input batch row count.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::kernels::{
    boolean::{and_kleene, not, or_kleene},
    cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
    numeric::{add, div, mul, sub},
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use fedgrid_common::{FedError, Result};

use crate::expr::{BinaryOp, Expr, LiteralValue};

/// Executable expression for grid operators.
///
/// The planner produces [`Expr`] trees; operators compile them once per
/// task and evaluate against every batch flowing through.
pub trait PhysicalExpr: Send + Sync + std::fmt::Debug {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for every row in `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

/// Compile a planner expression into a runnable expression.
pub fn compile_expr(expr: &Expr, input_schema: &SchemaRef) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        Expr::Column(name) => {
            let idx = input_schema
                .fields()
                .iter()
                .position(|f| f.name() == name)
                .ok_or_else(|| {
                    FedError::Planning(format!("unknown column in execution: {name}"))
                })?;
            let dt = input_schema.field(idx).data_type().clone();
            Ok(Arc::new(ColumnExpr { index: idx, dt }))
        }

        Expr::Literal(v) => Ok(Arc::new(LiteralExpr {
            v: v.clone(),
            dt: literal_type(v),
        })),

        Expr::Not(e) => {
            let inner = compile_expr(e, input_schema)?;
            Ok(Arc::new(NotExpr { inner }))
        }

        Expr::And(a, b) => {
            let left = compile_expr(a, input_schema)?;
            let right = compile_expr(b, input_schema)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::And,
            }))
        }

        Expr::Or(a, b) => {
            let left = compile_expr(a, input_schema)?;
            let right = compile_expr(b, input_schema)?;
            Ok(Arc::new(BoolBinaryExpr {
                left,
                right,
                op: BoolOp::Or,
            }))
        }

        Expr::BinaryOp { left, op, right } => {
            let l = compile_expr(left, input_schema)?;
            let r = compile_expr(right, input_schema)?;
            let out = binary_out_type(*op, l.data_type(), r.data_type())?;

            Ok(Arc::new(BinaryExpr {
                left: l,
                right: r,
                op: *op,
                out,
            }))
        }
    }
}

#[derive(Debug)]
struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        Ok(batch.column(self.index).clone())
    }
}

#[derive(Debug)]
struct LiteralExpr {
    v: LiteralValue,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        literal_to_array(&self.v, batch.num_rows())
    }
}

#[derive(Debug)]
struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let b = arr
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| FedError::Execution("NOT expects boolean".to_string()))?;

        let out = not(b).map_err(|e| FedError::Execution(format!("not failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

#[derive(Debug, Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

#[derive(Debug)]
struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        let lb = l
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| FedError::Execution("AND/OR expects boolean".to_string()))?;
        let rb = r
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| FedError::Execution("AND/OR expects boolean".to_string()))?;

        let out = match self.op {
            BoolOp::And => and_kleene(lb, rb),
            BoolOp::Or => or_kleene(lb, rb),
        }
        .map_err(|e| FedError::Execution(format!("boolean kernel failed: {e}")))?;

        Ok(Arc::new(out))
    }
}

#[derive(Debug)]
struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        match self.op {
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
                eval_arith(self.op, &l, &r, &self.out)
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => eval_cmp(self.op, &l, &r),
        }
    }
}

fn literal_type(v: &LiteralValue) -> DataType {
    match v {
        LiteralValue::Int64(_) => DataType::Int64,
        LiteralValue::Float64(_) => DataType::Float64,
        LiteralValue::Utf8(_) => DataType::Utf8,
        LiteralValue::Boolean(_) => DataType::Boolean,
        LiteralValue::Null => DataType::Null,
    }
}

fn literal_to_array(v: &LiteralValue, len: usize) -> Result<ArrayRef> {
    use arrow::array::{BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
    match v {
        LiteralValue::Int64(x) => {
            let mut b = Int64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Float64(x) => {
            let mut b = Float64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Boolean(x) => {
            let mut b = BooleanBuilder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Utf8(s) => {
            let mut b = StringBuilder::with_capacity(len, s.len() * len);
            for _ in 0..len {
                b.append_value(s);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Null => Ok(arrow::array::new_null_array(&DataType::Null, len)),
    }
}

fn binary_out_type(op: BinaryOp, l: DataType, r: DataType) -> Result<DataType> {
    match op {
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => Ok(DataType::Boolean),

        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
            if l != r {
                return Err(FedError::Planning(format!(
                    "arithmetic requires matching operand types; got {l:?} vs {r:?}"
                )));
            }
            Ok(l)
        }
    }
}

fn eval_arith(op: BinaryOp, l: &ArrayRef, r: &ArrayRef, out: &DataType) -> Result<ArrayRef> {
    match out {
        DataType::Int64 => {
            let la = l
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| FedError::Execution("expected Int64 array".to_string()))?;
            let ra = r
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| FedError::Execution("expected Int64 array".to_string()))?;

            let res = match op {
                BinaryOp::Plus => add(la, ra),
                BinaryOp::Minus => sub(la, ra),
                BinaryOp::Multiply => mul(la, ra),
                BinaryOp::Divide => div(la, ra),
                _ => unreachable!(),
            }
            .map_err(|e| FedError::Execution(format!("arith kernel failed: {e}")))?;

            Ok(res)
        }

        DataType::Float64 => {
            let la = l
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| FedError::Execution("expected Float64 array".to_string()))?;
            let ra = r
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| FedError::Execution("expected Float64 array".to_string()))?;

            let res = match op {
                BinaryOp::Plus => add(la, ra),
                BinaryOp::Minus => sub(la, ra),
                BinaryOp::Multiply => mul(la, ra),
                BinaryOp::Divide => div(la, ra),
                _ => unreachable!(),
            }
            .map_err(|e| FedError::Execution(format!("arith kernel failed: {e}")))?;

            Ok(res)
        }

        _ => Err(FedError::Unsupported(format!(
            "arith not supported for type {out:?}"
        ))),
    }
}

fn eval_cmp(op: BinaryOp, l: &ArrayRef, r: &ArrayRef) -> Result<ArrayRef> {
    match l.data_type() {
        DataType::Int64 => {
            let la = l.as_any().downcast_ref::<Int64Array>().unwrap();
            let ra = r
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| FedError::Execution("comparison operand type mismatch".into()))?;
            cmp_kernel(op, la, ra)
        }

        DataType::Float64 => {
            let la = l.as_any().downcast_ref::<Float64Array>().unwrap();
            let ra = r
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| FedError::Execution("comparison operand type mismatch".into()))?;
            cmp_kernel(op, la, ra)
        }

        DataType::Utf8 => {
            let la = l.as_any().downcast_ref::<StringArray>().unwrap();
            let ra = r
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| FedError::Execution("comparison operand type mismatch".into()))?;
            cmp_kernel(op, la, ra)
        }

        DataType::Boolean => {
            let la = l.as_any().downcast_ref::<BooleanArray>().unwrap();
            let ra = r
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| FedError::Execution("comparison operand type mismatch".into()))?;
            let res = match op {
                BinaryOp::Eq => eq(la, ra),
                BinaryOp::NotEq => neq(la, ra),
                _ => {
                    return Err(FedError::Unsupported(
                        "ordering comparisons not supported for boolean".to_string(),
                    ));
                }
            }
            .map_err(|e| FedError::Execution(format!("cmp kernel failed: {e}")))?;
            Ok(Arc::new(res))
        }

        other => Err(FedError::Unsupported(format!(
            "comparison not supported for {other:?}"
        ))),
    }
}

fn cmp_kernel<A: arrow::array::Datum>(op: BinaryOp, la: &A, ra: &A) -> Result<ArrayRef> {
    let res = match op {
        BinaryOp::Eq => eq(la, ra),
        BinaryOp::NotEq => neq(la, ra),
        BinaryOp::Lt => lt(la, ra),
        BinaryOp::LtEq => lt_eq(la, ra),
        BinaryOp::Gt => gt(la, ra),
        BinaryOp::GtEq => gt_eq(la, ra),
        _ => unreachable!(),
    }
    .map_err(|e| FedError::Execution(format!("cmp kernel failed: {e}")))?;
    Ok(Arc::new(res))
}
