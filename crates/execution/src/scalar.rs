//! Row-scalar representation used by grouping, sorting, and join operators.
//!
//! Floats are carried as raw bits so scalar keys can be hashed and
//! compared for equality without NaN surprises.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow_schema::DataType;
use fedgrid_common::{FedError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarValue {
    Int64(i64),
    Float64Bits(u64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Int64(v) => {
                0_u8.hash(state);
                v.hash(state);
            }
            Self::Float64Bits(v) => {
                1_u8.hash(state);
                v.hash(state);
            }
            Self::Utf8(v) => {
                2_u8.hash(state);
                v.hash(state);
            }
            Self::Boolean(v) => {
                3_u8.hash(state);
                v.hash(state);
            }
            Self::Null => 4_u8.hash(state),
        }
    }
}

/// Tag-prefixed, length-delimited byte encoding of a composite key.
/// Stable across processes; used as the hash-map key for group-by and distinct.
pub fn encode_group_key(values: &[ScalarValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 16);
    for value in values {
        match value {
            ScalarValue::Null => out.push(0),
            ScalarValue::Int64(v) => {
                out.push(1);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ScalarValue::Float64Bits(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ScalarValue::Boolean(v) => {
                out.push(3);
                out.push(u8::from(*v));
            }
            ScalarValue::Utf8(s) => {
                out.push(4);
                let len = s.len() as u32;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        out.push(0xff);
    }
    out
}

/// Read one row position out of an Arrow array.
pub fn scalar_from_array(array: &ArrayRef, row: usize) -> Result<ScalarValue> {
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    match array.data_type() {
        DataType::Int64 => {
            let a = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| FedError::Execution("expected Int64Array".to_string()))?;
            Ok(ScalarValue::Int64(a.value(row)))
        }
        DataType::Float64 => {
            let a = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| FedError::Execution("expected Float64Array".to_string()))?;
            Ok(ScalarValue::Float64Bits(a.value(row).to_bits()))
        }
        DataType::Utf8 => {
            let a = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| FedError::Execution("expected StringArray".to_string()))?;
            Ok(ScalarValue::Utf8(a.value(row).to_string()))
        }
        DataType::Boolean => {
            let a = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| FedError::Execution("expected BooleanArray".to_string()))?;
            Ok(ScalarValue::Boolean(a.value(row)))
        }
        other => Err(FedError::Unsupported(format!(
            "scalar type not supported yet: {other:?}"
        ))),
    }
}

/// Build an Arrow array of the requested type from a scalar column.
pub fn scalars_to_array(values: &[ScalarValue], dt: &DataType) -> Result<ArrayRef> {
    match dt {
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Int64(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(FedError::Execution(
                            "type mismatch while building Int64 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Float64Bits(x) => b.append_value(f64::from_bits(*x)),
                    ScalarValue::Int64(x) => b.append_value(*x as f64),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(FedError::Execution(
                            "type mismatch while building Float64 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for v in values {
                match v {
                    ScalarValue::Utf8(x) => b.append_value(x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(FedError::Execution(
                            "type mismatch while building Utf8 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Boolean(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(FedError::Execution(
                            "type mismatch while building Boolean array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        other => Err(FedError::Unsupported(format!(
            "output type not supported yet: {other:?}"
        ))),
    }
}

/// Numeric view of a scalar, when it has one.
pub fn as_f64(v: &ScalarValue) -> Option<f64> {
    match v {
        ScalarValue::Int64(x) => Some(*x as f64),
        ScalarValue::Float64Bits(x) => Some(f64::from_bits(*x)),
        _ => None,
    }
}

/// Strict same-type ordering. Nulls never compare.
pub fn scalar_lt(a: &ScalarValue, b: &ScalarValue) -> Result<bool> {
    match (a, b) {
        (ScalarValue::Int64(x), ScalarValue::Int64(y)) => Ok(x < y),
        (ScalarValue::Float64Bits(x), ScalarValue::Float64Bits(y)) => {
            Ok(f64::from_bits(*x) < f64::from_bits(*y))
        }
        (ScalarValue::Utf8(x), ScalarValue::Utf8(y)) => Ok(x < y),
        (ScalarValue::Boolean(x), ScalarValue::Boolean(y)) => Ok((!*x) & *y),
        _ => Err(FedError::Execution(
            "cannot compare values of different types".to_string(),
        )),
    }
}

pub fn scalar_gt(a: &ScalarValue, b: &ScalarValue) -> Result<bool> {
    scalar_lt(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_key_distinguishes_types_and_values() {
        let a = encode_group_key(&[ScalarValue::Int64(1), ScalarValue::Utf8("x".into())]);
        let b = encode_group_key(&[ScalarValue::Int64(1), ScalarValue::Utf8("y".into())]);
        let c = encode_group_key(&[ScalarValue::Int64(1), ScalarValue::Utf8("x".into())]);
        assert_ne!(a, b);
        assert_eq!(a, c);
        // Null vs empty string must not collide.
        let n = encode_group_key(&[ScalarValue::Null]);
        let e = encode_group_key(&[ScalarValue::Utf8(String::new())]);
        assert_ne!(n, e);
    }

    #[test]
    fn scalar_round_trip_int64() {
        let arr: ArrayRef = Arc::new(Int64Array::from(vec![Some(7), None]));
        assert_eq!(scalar_from_array(&arr, 0).unwrap(), ScalarValue::Int64(7));
        assert_eq!(scalar_from_array(&arr, 1).unwrap(), ScalarValue::Null);
        let rebuilt = scalars_to_array(
            &[ScalarValue::Int64(7), ScalarValue::Null],
            &DataType::Int64,
        )
        .unwrap();
        assert_eq!(rebuilt.as_ref(), arr.as_ref());
    }

    #[test]
    fn ordering_rejects_mixed_types() {
        let err = scalar_lt(&ScalarValue::Int64(1), &ScalarValue::Utf8("a".into())).unwrap_err();
        assert!(matches!(err, FedError::Execution(_)));
        assert!(scalar_lt(&ScalarValue::Int64(1), &ScalarValue::Int64(2)).unwrap());
        assert!(scalar_gt(&ScalarValue::Utf8("b".into()), &ScalarValue::Utf8("a".into())).unwrap());
    }
}
