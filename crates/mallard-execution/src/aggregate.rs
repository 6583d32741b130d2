//! Combinable aggregate functions

use crate::expression::{execute_expression, Expression};
use mallard_common::{DataChunk, Error, LogicalType, Result, Value, Vector};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::CountStar => "count_star",
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
        };
        write!(f, "{}", name)
    }
}

/// Running state of one aggregate over one group
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    /// Non-NULL inputs seen (all inputs for `count(*)`)
    count: i64,
    /// Running sum or extreme; NULL until the first input
    value: Value,
}

impl Default for AggregateState {
    fn default() -> Self {
        AggregateState {
            count: 0,
            value: Value::Null,
        }
    }
}

/// An aggregate function applied to an optional input expression
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpression {
    pub function: AggregateFunction,
    pub child: Option<Expression>,
}

impl AggregateExpression {
    pub fn count_star() -> Self {
        AggregateExpression {
            function: AggregateFunction::CountStar,
            child: None,
        }
    }

    pub fn new(function: AggregateFunction, child: Expression) -> Self {
        AggregateExpression {
            function,
            child: Some(child),
        }
    }

    fn child_type(&self) -> LogicalType {
        self.child
            .as_ref()
            .map_or(LogicalType::BigInt, |c| c.return_type())
    }

    pub fn return_type(&self) -> LogicalType {
        match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => LogicalType::BigInt,
            AggregateFunction::Sum if self.child_type().is_integer() => LogicalType::HugeInt,
            AggregateFunction::Sum | AggregateFunction::Avg => LogicalType::Double,
            AggregateFunction::Min | AggregateFunction::Max => self.child_type(),
        }
    }

    /// Folds one input value into `state`
    pub fn update(&self, state: &mut AggregateState, input: &Value) -> Result<()> {
        if self.function == AggregateFunction::CountStar {
            state.count += 1;
            return Ok(());
        }
        if input.is_null() {
            return Ok(());
        }
        state.count += 1;
        state.value = self.fold(&state.value, input)?;
        Ok(())
    }

    /// Merges `source` into `target`
    pub fn combine(&self, target: &mut AggregateState, source: &AggregateState) -> Result<()> {
        target.count += source.count;
        if !source.value.is_null() {
            target.value = self.fold(&target.value, &source.value)?;
        }
        Ok(())
    }

    /// The aggregate result; NULL for an empty input except for counts
    pub fn finalize(&self, state: &AggregateState) -> Result<Value> {
        match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => {
                Ok(Value::BigInt(state.count))
            }
            AggregateFunction::Avg => match state.value.as_f64() {
                Some(sum) if state.count > 0 => Ok(Value::Double(sum / state.count as f64)),
                _ => Ok(Value::Null),
            },
            AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => {
                Ok(state.value.clone())
            }
        }
    }

    fn fold(&self, current: &Value, input: &Value) -> Result<Value> {
        match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => Ok(Value::Null),
            AggregateFunction::Sum if self.return_type() == LogicalType::HugeInt => {
                let current = current.as_i128().unwrap_or(0);
                let input = input.as_i128().ok_or_else(|| self.mismatch(input))?;
                current
                    .checked_add(input)
                    .map(Value::HugeInt)
                    .ok_or_else(|| Error::Overflow {
                        operation: "SUM".to_string(),
                    })
            }
            AggregateFunction::Sum | AggregateFunction::Avg => {
                let current = current.as_f64().unwrap_or(0.0);
                let input = input.as_f64().ok_or_else(|| self.mismatch(input))?;
                Ok(Value::Double(current + input))
            }
            AggregateFunction::Min => Ok(pick(current, input, Ordering::Less)),
            AggregateFunction::Max => Ok(pick(current, input, Ordering::Greater)),
        }
    }

    fn mismatch(&self, input: &Value) -> Error {
        Error::TypeMismatch {
            expected: format!("numeric input for {}", self.function),
            got: format!("{:?}", input),
        }
    }
}

/// `input` if it orders `wanted` relative to `current`, else `current`
fn pick(current: &Value, input: &Value, wanted: Ordering) -> Value {
    if current.is_null() || input.total_cmp(current) == wanted {
        input.clone()
    } else {
        current.clone()
    }
}

/// Input vectors of `aggregates` over `input`; None for `count(*)`
pub(crate) fn evaluate_inputs(
    aggregates: &[AggregateExpression],
    input: &DataChunk,
) -> Result<Vec<Option<Vector>>> {
    aggregates
        .iter()
        .map(|aggregate| {
            aggregate
                .child
                .as_ref()
                .map(|child| execute_expression(child, input))
                .transpose()
        })
        .collect()
}

/// Folds row `row` of the evaluated inputs into one state per aggregate
pub(crate) fn update_row(
    aggregates: &[AggregateExpression],
    states: &mut [AggregateState],
    inputs: &[Option<Vector>],
    row: usize,
) -> Result<()> {
    for ((aggregate, state), input) in aggregates.iter().zip(states.iter_mut()).zip(inputs) {
        let value = input.as_ref().map_or(Value::Null, |v| v.get_value(row));
        aggregate.update(state, &value)?;
    }
    Ok(())
}

pub(crate) fn combine_states(
    aggregates: &[AggregateExpression],
    target: &mut [AggregateState],
    source: &[AggregateState],
) -> Result<()> {
    for ((aggregate, target), source) in aggregates.iter().zip(target.iter_mut()).zip(source) {
        aggregate.combine(target, source)?;
    }
    Ok(())
}

impl fmt::Display for AggregateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.child {
            Some(child) => write!(f, "{}({})", self.function, child),
            None => write!(f, "{}(*)", self.function),
        }
    }
}
