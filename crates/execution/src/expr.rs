//! Logical expression trees shared by the planner and the execution layer.
//!
//! Expressions arrive already resolved against a table schema; column
//! references are by name and must exist in the input batch schema at
//! compile time.

use serde::{Deserialize, Serialize};

/// Scalar literal embedded in an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

/// Binary operator kinds supported by the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

/// Row-level expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference by name.
    Column(String),
    Literal(LiteralValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Shorthand for a column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Shorthand for a binary comparison/arithmetic node.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

}

/// Aggregate call over an input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggExpr {
    /// COUNT(column). A column is always named; COUNT(*) callers pick one.
    Count(String),
    Sum(String),
    Min(String),
    Max(String),
    Avg(String),
}

impl AggExpr {
    /// The input column this aggregate reads.
    pub fn input_column(&self) -> &str {
        match self {
            AggExpr::Count(c)
            | AggExpr::Sum(c)
            | AggExpr::Min(c)
            | AggExpr::Max(c)
            | AggExpr::Avg(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_builder_boxes_operands() {
        let e = Expr::binary(
            Expr::col("a"),
            BinaryOp::Gt,
            Expr::Literal(LiteralValue::Int64(1)),
        );
        match e {
            Expr::BinaryOp { left, op, right } => {
                assert_eq!(*left, Expr::Column("a".to_string()));
                assert_eq!(op, BinaryOp::Gt);
                assert_eq!(*right, Expr::Literal(LiteralValue::Int64(1)));
            }
            other => panic!("expected binary node, got {other:?}"),
        }
    }

    #[test]
    fn aggregates_expose_their_input_column() {
        assert_eq!(AggExpr::Sum("amount".to_string()).input_column(), "amount");
        assert_eq!(AggExpr::Avg("price".to_string()).input_column(), "price");
    }
}
