//! Batch-materialized operators for leaf residuals and the central plan.
//!
//! Every operator consumes and produces an [`ExecOutput`]: a schema
//! plus fully materialized batches. Streaming happens at the task and
//! transport boundaries, not inside operators.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, UInt64Array};
use arrow::compute::kernels::take::take;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use fedgrid_common::{FedError, Result};
use fedgrid_execution::{
    as_f64, compile_expr, encode_group_key, scalar_from_array, scalar_gt, scalar_lt,
    scalars_to_array, AggExpr, Expr, ScalarValue,
};
use fedgrid_planner::{avg_count_col_name, AggregateMode, SortKey};

/// Materialized operator output.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl ExecOutput {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// All batches concatenated into one, empty batch when none.
    pub fn concat(&self) -> Result<RecordBatch> {
        if self.batches.is_empty() {
            return Ok(RecordBatch::new_empty(self.schema.clone()));
        }
        concat_batches(&self.schema, &self.batches)
            .map_err(|e| FedError::Execution(format!("batch concat failed: {e}")))
    }
}

pub fn run_filter(child: ExecOutput, predicate: &Expr) -> Result<ExecOutput> {
    let compiled = compile_expr(predicate, &child.schema)?;
    let mut out = Vec::with_capacity(child.batches.len());
    for batch in &child.batches {
        let mask = compiled.evaluate(batch)?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| FedError::Execution("filter must evaluate to boolean".to_string()))?;
        let filtered = filter_record_batch(batch, mask)
            .map_err(|e| FedError::Execution(format!("filter failed: {e}")))?;
        out.push(filtered);
    }
    Ok(ExecOutput::new(child.schema, out))
}

pub fn run_project(child: ExecOutput, exprs: &[(Expr, String)]) -> Result<ExecOutput> {
    let compiled: Vec<_> = exprs
        .iter()
        .map(|(e, _)| compile_expr(e, &child.schema))
        .collect::<Result<Vec<_>>>()?;
    let fields: Vec<Field> = exprs
        .iter()
        .zip(&compiled)
        .map(|((_, alias), c)| Field::new(alias, c.data_type(), true))
        .collect();
    let schema = Arc::new(ArrowSchema::new(fields));

    let mut out = Vec::with_capacity(child.batches.len());
    for batch in &child.batches {
        let arrays: Vec<ArrayRef> = compiled
            .iter()
            .map(|c| c.evaluate(batch))
            .collect::<Result<Vec<_>>>()?;
        let projected = RecordBatch::try_new(schema.clone(), arrays)
            .map_err(|e| FedError::Execution(format!("projection batch failed: {e}")))?;
        out.push(projected);
    }
    Ok(ExecOutput::new(schema, out))
}

pub fn run_limit(child: ExecOutput, n: usize) -> Result<ExecOutput> {
    let mut remaining = n;
    let mut out = Vec::new();
    for batch in &child.batches {
        if remaining == 0 {
            break;
        }
        if batch.num_rows() <= remaining {
            remaining -= batch.num_rows();
            out.push(batch.clone());
        } else {
            out.push(batch.slice(0, remaining));
            remaining = 0;
        }
    }
    Ok(ExecOutput::new(child.schema, out))
}

pub fn run_distinct(child: ExecOutput) -> Result<ExecOutput> {
    let batch = child.concat()?;
    let mut seen: HashMap<Vec<u8>, ()> = HashMap::new();
    let mut keep: Vec<u64> = Vec::new();
    for row in 0..batch.num_rows() {
        let key: Vec<ScalarValue> = batch
            .columns()
            .iter()
            .map(|c| scalar_from_array(c, row))
            .collect::<Result<Vec<_>>>()?;
        let encoded = encode_group_key(&key);
        if seen.insert(encoded, ()).is_none() {
            keep.push(row as u64);
        }
    }
    let taken = take_rows(&batch, &keep)?;
    Ok(ExecOutput::new(child.schema, vec![taken]))
}

pub fn run_sort(child: ExecOutput, keys: &[SortKey]) -> Result<ExecOutput> {
    let batch = child.concat()?;
    let key_arrays: Vec<(ArrayRef, bool)> = keys
        .iter()
        .map(|k| {
            batch
                .schema()
                .index_of(&k.column)
                .map(|i| (batch.column(i).clone(), k.descending))
                .map_err(|e| FedError::Execution(format!("unknown sort column: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut key_rows: Vec<(Vec<ScalarValue>, u64)> = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let k = key_arrays
            .iter()
            .map(|(a, _)| scalar_from_array(a, row))
            .collect::<Result<Vec<_>>>()?;
        key_rows.push((k, row as u64));
    }
    let descending: Vec<bool> = key_arrays.iter().map(|(_, d)| *d).collect();
    key_rows.sort_by(|(a, arow), (b, brow)| {
        for (i, (av, bv)) in a.iter().zip(b.iter()).enumerate() {
            let ord = cmp_scalars(av, bv);
            let ord = if descending[i] { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        // Stable tie-break on the original row position.
        arow.cmp(brow)
    });

    let indices: Vec<u64> = key_rows.into_iter().map(|(_, row)| row).collect();
    let taken = take_rows(&batch, &indices)?;
    Ok(ExecOutput::new(child.schema, vec![taken]))
}

/// Null-first total order for same-typed scalars; mismatched types
/// compare equal so malformed input cannot panic the sort.
fn cmp_scalars(a: &ScalarValue, b: &ScalarValue) -> Ordering {
    match (a, b) {
        (ScalarValue::Null, ScalarValue::Null) => Ordering::Equal,
        (ScalarValue::Null, _) => Ordering::Less,
        (_, ScalarValue::Null) => Ordering::Greater,
        _ => {
            if scalar_lt(a, b).unwrap_or(false) {
                Ordering::Less
            } else if scalar_gt(a, b).unwrap_or(false) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
    }
}

fn take_rows(batch: &RecordBatch, indices: &[u64]) -> Result<RecordBatch> {
    let idx = UInt64Array::from(indices.to_vec());
    let arrays: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|c| {
            take(c, &idx, None).map_err(|e| FedError::Execution(format!("take failed: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(batch.schema(), arrays)
        .map_err(|e| FedError::Execution(format!("take batch failed: {e}")))
}

// ---------------- hash join ----------------

pub fn run_hash_join(
    left: ExecOutput,
    right: ExecOutput,
    on: &[(String, String)],
) -> Result<ExecOutput> {
    let left_batch = left.concat()?;
    let right_batch = right.concat()?;

    let left_keys: Vec<usize> = on
        .iter()
        .map(|(l, _)| {
            left_batch
                .schema()
                .index_of(l)
                .map_err(|e| FedError::Planning(format!("unknown join column: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let right_keys: Vec<usize> = on
        .iter()
        .map(|(_, r)| {
            right_batch
                .schema()
                .index_of(r)
                .map_err(|e| FedError::Planning(format!("unknown join column: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    // Build on the left side.
    let mut build: HashMap<Vec<u8>, Vec<u64>> = HashMap::new();
    for row in 0..left_batch.num_rows() {
        let key: Vec<ScalarValue> = left_keys
            .iter()
            .map(|&i| scalar_from_array(left_batch.column(i), row))
            .collect::<Result<Vec<_>>>()?;
        if key.iter().any(|k| *k == ScalarValue::Null) {
            continue;
        }
        build.entry(encode_group_key(&key)).or_default().push(row as u64);
    }

    let mut left_rows: Vec<u64> = Vec::new();
    let mut right_rows: Vec<u64> = Vec::new();
    for row in 0..right_batch.num_rows() {
        let key: Vec<ScalarValue> = right_keys
            .iter()
            .map(|&i| scalar_from_array(right_batch.column(i), row))
            .collect::<Result<Vec<_>>>()?;
        if key.iter().any(|k| *k == ScalarValue::Null) {
            continue;
        }
        if let Some(matches) = build.get(&encode_group_key(&key)) {
            for &l in matches {
                left_rows.push(l);
                right_rows.push(row as u64);
            }
        }
    }

    let taken_left = take_rows(&left_batch, &left_rows)?;
    let taken_right = take_rows(&right_batch, &right_rows)?;

    let mut fields: Vec<Field> = left
        .schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.extend(right.schema.fields().iter().map(|f| f.as_ref().clone()));
    let schema = Arc::new(ArrowSchema::new(fields));

    let mut arrays: Vec<ArrayRef> = taken_left.columns().to_vec();
    arrays.extend(taken_right.columns().iter().cloned());
    let joined = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| FedError::Execution(format!("join output batch failed: {e}")))?;
    Ok(ExecOutput::new(schema, vec![joined]))
}

// ---------------- hash aggregate ----------------

#[derive(Debug, Clone)]
struct AggSpec {
    expr: AggExpr,
    name: String,
    out_type: DataType,
}

#[derive(Debug, Clone)]
enum AggState {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Min(Option<ScalarValue>),
    Max(Option<ScalarValue>),
    Avg { sum: f64, count: i64 },
}

#[derive(Debug, Clone)]
struct GroupEntry {
    key: Vec<ScalarValue>,
    states: Vec<AggState>,
}

type GroupMap = HashMap<Vec<u8>, GroupEntry>;

/// Aggregation phase as executed. `Partial` emits mergeable state
/// (plus hidden AVG counts), the other two emit client-facing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggPhase {
    /// Leaf side of a split aggregate.
    Partial,
    /// Central merge of partial states.
    Final,
    /// Single-pass aggregation of raw rows.
    Complete,
}

impl From<AggregateMode> for AggPhase {
    fn from(mode: AggregateMode) -> Self {
        match mode {
            AggregateMode::Final => AggPhase::Final,
            AggregateMode::Complete => AggPhase::Complete,
        }
    }
}

pub fn run_hash_aggregate(
    child: ExecOutput,
    group_by: &[String],
    aggr_exprs: &[(AggExpr, String)],
    phase: AggPhase,
) -> Result<ExecOutput> {
    let input_schema = child.schema.clone();
    let specs = build_agg_specs(aggr_exprs, &input_schema, group_by, phase)?;
    let mut groups: GroupMap = HashMap::new();

    for batch in &child.batches {
        accumulate_batch(phase, &specs, group_by, &input_schema, batch, &mut groups)?;
    }

    // A global aggregate with no input still yields one row of zeros.
    if group_by.is_empty() && groups.is_empty() {
        groups.insert(
            encode_group_key(&[]),
            GroupEntry {
                key: vec![],
                states: init_states(&specs),
            },
        );
    }

    build_output(groups, &specs, group_by, &input_schema, phase)
}

fn build_agg_specs(
    aggr_exprs: &[(AggExpr, String)],
    input_schema: &SchemaRef,
    group_by: &[String],
    phase: AggPhase,
) -> Result<Vec<AggSpec>> {
    let mut specs = Vec::with_capacity(aggr_exprs.len());
    for (idx, (expr, name)) in aggr_exprs.iter().enumerate() {
        let out_type = match phase {
            AggPhase::Partial | AggPhase::Complete => match expr {
                AggExpr::Count(_) => DataType::Int64,
                AggExpr::Sum(c) | AggExpr::Min(c) | AggExpr::Max(c) => {
                    column_type(input_schema, c)?
                }
                AggExpr::Avg(_) => DataType::Float64,
            },
            AggPhase::Final => {
                let col_idx = group_by.len() + idx;
                input_schema.field(col_idx).data_type().clone()
            }
        };
        specs.push(AggSpec {
            expr: expr.clone(),
            name: name.clone(),
            out_type,
        });
    }
    Ok(specs)
}

fn column_type(schema: &SchemaRef, name: &str) -> Result<DataType> {
    schema
        .fields()
        .iter()
        .find(|f| f.name() == name)
        .map(|f| f.data_type().clone())
        .ok_or_else(|| FedError::Planning(format!("unknown aggregate column: {name}")))
}

fn init_states(specs: &[AggSpec]) -> Vec<AggState> {
    specs
        .iter()
        .map(|s| match s.expr {
            AggExpr::Count(_) => AggState::Count(0),
            AggExpr::Sum(_) => match s.out_type {
                DataType::Int64 => AggState::SumInt(0),
                _ => AggState::SumFloat(0.0),
            },
            AggExpr::Min(_) => AggState::Min(None),
            AggExpr::Max(_) => AggState::Max(None),
            AggExpr::Avg(_) => AggState::Avg { sum: 0.0, count: 0 },
        })
        .collect()
}

fn accumulate_batch(
    phase: AggPhase,
    specs: &[AggSpec],
    group_by: &[String],
    input_schema: &SchemaRef,
    batch: &RecordBatch,
    groups: &mut GroupMap,
) -> Result<()> {
    let group_arrays: Vec<ArrayRef> = match phase {
        AggPhase::Partial | AggPhase::Complete => group_by
            .iter()
            .map(|c| {
                input_schema
                    .index_of(c)
                    .map(|i| batch.column(i).clone())
                    .map_err(|e| FedError::Execution(format!("unknown group column: {e}")))
            })
            .collect::<Result<Vec<_>>>()?,
        // Partial layout puts group columns first.
        AggPhase::Final => (0..group_by.len()).map(|i| batch.column(i).clone()).collect(),
    };

    let agg_arrays: Vec<ArrayRef> = match phase {
        AggPhase::Partial | AggPhase::Complete => specs
            .iter()
            .map(|s| {
                input_schema
                    .index_of(s.expr.input_column())
                    .map(|i| batch.column(i).clone())
                    .map_err(|e| FedError::Execution(format!("unknown aggregate column: {e}")))
            })
            .collect::<Result<Vec<_>>>()?,
        AggPhase::Final => (0..specs.len())
            .map(|i| batch.column(group_by.len() + i).clone())
            .collect(),
    };

    let avg_count_arrays = if phase == AggPhase::Final {
        let mut map = HashMap::<String, ArrayRef>::new();
        for spec in specs {
            if matches!(spec.expr, AggExpr::Avg(_)) {
                let key = avg_count_col_name(&spec.name);
                if let Ok(i) = input_schema.index_of(&key) {
                    map.insert(spec.name.clone(), batch.column(i).clone());
                }
            }
        }
        map
    } else {
        HashMap::new()
    };

    for row in 0..batch.num_rows() {
        let key = group_arrays
            .iter()
            .map(|a| scalar_from_array(a, row))
            .collect::<Result<Vec<_>>>()?;
        let encoded_key = encode_group_key(&key);
        let state_vec = &mut groups
            .entry(encoded_key)
            .or_insert_with(|| GroupEntry {
                key: key.clone(),
                states: init_states(specs),
            })
            .states;
        for (idx, spec) in specs.iter().enumerate() {
            let value = scalar_from_array(&agg_arrays[idx], row)?;
            update_state(
                &mut state_vec[idx],
                value,
                phase,
                avg_count_arrays.get(&spec.name).map(|a| (a, row)),
            )?;
        }
    }
    Ok(())
}

fn update_state(
    state: &mut AggState,
    value: ScalarValue,
    phase: AggPhase,
    avg_count_src: Option<(&ArrayRef, usize)>,
) -> Result<()> {
    match state {
        AggState::Count(acc) => {
            if phase == AggPhase::Final {
                if let ScalarValue::Int64(v) = value {
                    *acc += v;
                }
            } else if value != ScalarValue::Null {
                *acc += 1;
            }
        }
        AggState::SumInt(acc) => {
            if let ScalarValue::Int64(v) = value {
                *acc += v;
            }
        }
        AggState::SumFloat(acc) => {
            if let Some(v) = as_f64(&value) {
                *acc += v;
            }
        }
        AggState::Min(cur) => {
            if value != ScalarValue::Null {
                match cur {
                    None => *cur = Some(value),
                    Some(existing) => {
                        if scalar_lt(&value, existing)? {
                            *cur = Some(value);
                        }
                    }
                }
            }
        }
        AggState::Max(cur) => {
            if value != ScalarValue::Null {
                match cur {
                    None => *cur = Some(value),
                    Some(existing) => {
                        if scalar_gt(&value, existing)? {
                            *cur = Some(value);
                        }
                    }
                }
            }
        }
        AggState::Avg { sum, count } => match phase {
            AggPhase::Partial | AggPhase::Complete => {
                if let Some(v) = as_f64(&value) {
                    *sum += v;
                    *count += 1;
                }
            }
            AggPhase::Final => {
                if let Some(v) = as_f64(&value) {
                    *sum += v;
                }
                let add_count = if let Some((arr, row)) = avg_count_src {
                    match scalar_from_array(arr, row)? {
                        ScalarValue::Int64(v) => v,
                        _ => 0,
                    }
                } else if value != ScalarValue::Null {
                    1
                } else {
                    0
                };
                *count += add_count;
            }
        },
    }
    Ok(())
}

fn build_output(
    groups: GroupMap,
    specs: &[AggSpec],
    group_by: &[String],
    input_schema: &SchemaRef,
    phase: AggPhase,
) -> Result<ExecOutput> {
    // Key order is arbitrary hash order; sort for deterministic output.
    let mut keys: Vec<Vec<ScalarValue>> = groups.values().map(|e| e.key.clone()).collect();
    keys.sort_by(|a, b| encode_group_key(a).cmp(&encode_group_key(b)));

    let mut fields = Vec::<Field>::new();
    let mut cols = Vec::<Vec<ScalarValue>>::new();

    for (gidx, name) in group_by.iter().enumerate() {
        let dt = match phase {
            AggPhase::Partial | AggPhase::Complete => column_type(input_schema, name)?,
            AggPhase::Final => input_schema.field(gidx).data_type().clone(),
        };
        fields.push(Field::new(name, dt, true));
        let mut values = Vec::with_capacity(keys.len());
        for key in &keys {
            values.push(key[gidx].clone());
        }
        cols.push(values);
    }

    let mut avg_hidden_counts: Vec<(String, Vec<ScalarValue>)> = Vec::new();
    for (aidx, spec) in specs.iter().enumerate() {
        let out_type = match (&spec.expr, phase) {
            (AggExpr::Avg(_), AggPhase::Final | AggPhase::Complete) => DataType::Float64,
            _ => spec.out_type.clone(),
        };
        fields.push(Field::new(&spec.name, out_type, true));
        let mut values = Vec::with_capacity(keys.len());
        let mut hidden_counts = Vec::new();
        for key in &keys {
            let states = groups
                .get(&encode_group_key(key))
                .map(|e| &e.states)
                .ok_or_else(|| FedError::Execution("missing aggregate state".to_string()))?;
            let state = &states[aidx];
            values.push(state_to_scalar(state, phase));
            if matches!(spec.expr, AggExpr::Avg(_)) {
                let c = match state {
                    AggState::Avg { count, .. } => *count,
                    _ => 0,
                };
                hidden_counts.push(ScalarValue::Int64(c));
            }
        }
        cols.push(values);
        if phase == AggPhase::Partial && matches!(spec.expr, AggExpr::Avg(_)) {
            avg_hidden_counts.push((avg_count_col_name(&spec.name), hidden_counts));
        }
    }

    for (name, values) in avg_hidden_counts {
        fields.push(Field::new(&name, DataType::Int64, true));
        cols.push(values);
    }

    let schema = Arc::new(ArrowSchema::new(fields));
    let arrays = cols
        .iter()
        .enumerate()
        .map(|(idx, col)| scalars_to_array(col, schema.field(idx).data_type()))
        .collect::<Result<Vec<_>>>()?;
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| FedError::Execution(format!("aggregate output batch failed: {e}")))?;
    Ok(ExecOutput::new(schema, vec![batch]))
}

fn state_to_scalar(state: &AggState, phase: AggPhase) -> ScalarValue {
    match state {
        AggState::Count(v) => ScalarValue::Int64(*v),
        AggState::SumInt(v) => ScalarValue::Int64(*v),
        AggState::SumFloat(v) => ScalarValue::Float64Bits(v.to_bits()),
        AggState::Min(Some(v)) | AggState::Max(Some(v)) => v.clone(),
        AggState::Min(None) | AggState::Max(None) => ScalarValue::Null,
        AggState::Avg { sum, count } => {
            if phase == AggPhase::Partial {
                ScalarValue::Float64Bits(sum.to_bits())
            } else if *count == 0 {
                ScalarValue::Null
            } else {
                ScalarValue::Float64Bits((sum / (*count as f64)).to_bits())
            }
        }
    }
}

#[cfg(test)]
#[path = "operators_tests.rs"]
mod tests;
