//! Expression evaluation
//!
//! Expressions arrive bound: column references are positions in the input
//! chunk and every node knows its return type. Evaluation works a vector at
//! a time; the per-value kernels below implement SQL NULL semantics.

use mallard_common::{
    ComparisonType, DataChunk, Error, LogicalType, Result, SelectionVector, Value, Vector,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctionType {
    And,
    Or,
}

/// A bound scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column `index` of the input chunk
    ColumnRef {
        index: usize,
        return_type: LogicalType,
    },
    Constant(Value),
    Comparison {
        comparison: ComparisonType,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        conjunction: ConjunctionType,
        children: Vec<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    IsNull(Box<Expression>),
    IsNotNull(Box<Expression>),
    Cast {
        child: Box<Expression>,
        target: LogicalType,
    },
}

impl Expression {
    pub fn column(index: usize, return_type: LogicalType) -> Self {
        Expression::ColumnRef { index, return_type }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn comparison(comparison: ComparisonType, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            comparison,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Expression::Conjunction {
            conjunction: ConjunctionType::And,
            children,
        }
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Conjunction {
            conjunction: ConjunctionType::Or,
            children,
        }
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_null(child: Expression) -> Self {
        Expression::IsNull(Box::new(child))
    }

    pub fn is_not_null(child: Expression) -> Self {
        Expression::IsNotNull(Box::new(child))
    }

    pub fn cast(child: Expression, target: LogicalType) -> Self {
        Expression::Cast {
            child: Box::new(child),
            target,
        }
    }

    /// Type of the values this expression produces
    pub fn return_type(&self) -> LogicalType {
        match self {
            Expression::ColumnRef { return_type, .. } => return_type.clone(),
            Expression::Constant(value) => value.logical_type(),
            Expression::Comparison { .. }
            | Expression::Conjunction { .. }
            | Expression::IsNull(_)
            | Expression::IsNotNull(_) => LogicalType::Boolean,
            Expression::Arithmetic { left, right, .. } => {
                let l = left.return_type();
                let r = right.return_type();
                l.common_supertype(&r).unwrap_or(l)
            }
            Expression::Cast { target, .. } => target.clone(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::ColumnRef { index, .. } => write!(f, "#{}", index),
            Expression::Constant(value) => write!(f, "{}", value),
            Expression::Comparison {
                comparison,
                left,
                right,
            } => write!(f, "({} {} {})", left, comparison, right),
            Expression::Conjunction {
                conjunction,
                children,
            } => {
                let sep = match conjunction {
                    ConjunctionType::And => " AND ",
                    ConjunctionType::Or => " OR ",
                };
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            Expression::Arithmetic { op, left, right } => {
                let symbol = match op {
                    ArithmeticOp::Add => "+",
                    ArithmeticOp::Subtract => "-",
                    ArithmeticOp::Multiply => "*",
                };
                write!(f, "({} {} {})", left, symbol, right)
            }
            Expression::IsNull(child) => write!(f, "({} IS NULL)", child),
            Expression::IsNotNull(child) => write!(f, "({} IS NOT NULL)", child),
            Expression::Cast { child, target } => write!(f, "CAST({} AS {})", child, target),
        }
    }
}

/// Evaluate an expression against a row of values
pub fn evaluate(expr: &Expression, row: &[Value]) -> Result<Value> {
    match expr {
        Expression::ColumnRef { index, .. } => row.get(*index).cloned().ok_or_else(|| {
            Error::Internal(format!(
                "column index {} out of bounds (have {})",
                index,
                row.len()
            ))
        }),
        Expression::Constant(value) => Ok(value.clone()),
        Expression::Comparison {
            comparison,
            left,
            right,
        } => {
            let l = evaluate(left, row)?;
            let r = evaluate(right, row)?;
            comparison_op(&l, *comparison, &r)
        }
        Expression::Conjunction {
            conjunction,
            children,
        } => {
            let mut result = Value::Boolean(*conjunction == ConjunctionType::And);
            for child in children {
                let value = evaluate(child, row)?;
                result = conjunction_op(&result, *conjunction, &value)?;
            }
            Ok(result)
        }
        Expression::Arithmetic { op, left, right } => {
            let l = evaluate(left, row)?;
            let r = evaluate(right, row)?;
            evaluate_arithmetic(&l, *op, &r)
        }
        Expression::IsNull(child) => Ok(Value::Boolean(evaluate(child, row)?.is_null())),
        Expression::IsNotNull(child) => Ok(Value::Boolean(!evaluate(child, row)?.is_null())),
        Expression::Cast { child, target } => evaluate(child, row)?.try_cast(target),
    }
}

/// Evaluate `left <comparison> right`; NULL on either side yields NULL
fn comparison_op(left: &Value, comparison: ComparisonType, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let numeric = |v: &Value| v.as_f64().is_some() || v.as_i128().is_some();
    let comparable =
        (numeric(left) && numeric(right)) || left.logical_type() == right.logical_type();
    if !comparable {
        return Err(Error::TypeMismatch {
            expected: "comparable types".to_string(),
            got: format!("{:?}, {:?}", left, right),
        });
    }
    Ok(Value::Boolean(comparison.matches(left.total_cmp(right))))
}

/// Three-valued AND/OR
fn conjunction_op(left: &Value, conjunction: ConjunctionType, right: &Value) -> Result<Value> {
    let as_bool = |v: &Value| -> Result<Option<bool>> {
        if v.is_null() {
            return Ok(None);
        }
        v.as_bool().map(Some).ok_or_else(|| Error::TypeMismatch {
            expected: "BOOLEAN".to_string(),
            got: format!("{:?}", v),
        })
    };
    let l = as_bool(left)?;
    let r = as_bool(right)?;
    let result = match conjunction {
        ConjunctionType::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        ConjunctionType::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(result.map_or(Value::Null, Value::Boolean))
}

fn evaluate_arithmetic(left: &Value, op: ArithmeticOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match op {
        ArithmeticOp::Add => arithmetic_op(left, right, "+", i128::checked_add, |a, b| a + b),
        ArithmeticOp::Subtract => {
            arithmetic_op(left, right, "-", i128::checked_sub, |a, b| a - b)
        }
        ArithmeticOp::Multiply => {
            arithmetic_op(left, right, "*", i128::checked_mul, |a, b| a * b)
        }
    }
}

/// Perform an arithmetic operation in the common type of both operands.
///
/// Integer results that do not fit the common type are an overflow.
fn arithmetic_op<F, G>(left: &Value, right: &Value, symbol: &str, int_op: F, float_op: G) -> Result<Value>
where
    F: Fn(i128, i128) -> Option<i128>,
    G: Fn(f64, f64) -> f64,
{
    let mismatch = || Error::TypeMismatch {
        expected: "numeric".to_string(),
        got: format!("{:?}, {:?}", left, right),
    };
    let target = left
        .logical_type()
        .common_supertype(&right.logical_type())
        .filter(|t| t.is_numeric())
        .ok_or_else(mismatch)?;
    let overflow = || Error::Overflow {
        operation: format!("{} {} {}", left, symbol, right),
    };

    if target.is_integer() {
        let (l, r) = match (left.as_i128(), right.as_i128()) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(mismatch()),
        };
        let result = int_op(l, r).ok_or_else(overflow)?;
        Value::HugeInt(result).try_cast(&target).map_err(|_| overflow())
    } else {
        match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => Value::Double(float_op(l, r)).try_cast(&target),
            _ => Err(mismatch()),
        }
    }
}

/// Evaluates expressions a chunk at a time
#[derive(Debug, Clone, Default)]
pub struct ExpressionExecutor {
    expressions: Vec<Expression>,
}

impl ExpressionExecutor {
    pub fn new(expressions: Vec<Expression>) -> Self {
        ExpressionExecutor { expressions }
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// Computes every expression over `input` into the matching column of
    /// `result`
    pub fn execute(&self, input: &DataChunk, result: &mut DataChunk) -> Result<()> {
        if result.column_count() != self.expressions.len() {
            return Err(Error::Internal(format!(
                "{} expressions cannot fill a chunk of {} columns",
                self.expressions.len(),
                result.column_count()
            )));
        }
        for (i, expr) in self.expressions.iter().enumerate() {
            let vector = execute_expression(expr, input)?;
            result.column_mut(i).reference(&vector);
        }
        result.set_cardinality(input.size());
        Ok(())
    }

    /// Evaluates the first expression as a predicate over `input`, writing
    /// the rows for which it is true into `sel`; returns their count
    pub fn select(&self, input: &DataChunk, sel: &mut SelectionVector) -> Result<usize> {
        let predicate = self
            .expressions
            .first()
            .ok_or_else(|| Error::Internal("select without a predicate".to_string()))?;
        select(predicate, input, sel)
    }
}

/// Computes `expr` for every row of `input`.
///
/// Column references alias the input vector; constants produce a constant
/// vector.
pub fn execute_expression(expr: &Expression, input: &DataChunk) -> Result<Vector> {
    let count = input.size();
    match expr {
        Expression::ColumnRef { index, .. } => {
            if *index >= input.column_count() {
                return Err(Error::Internal(format!(
                    "column index {} out of bounds (have {})",
                    index,
                    input.column_count()
                )));
            }
            Ok(input.column(*index).clone())
        }
        Expression::Constant(value) => Ok(Vector::constant(value.clone())),
        Expression::Comparison {
            comparison,
            left,
            right,
        } => {
            let l = execute_expression(left, input)?;
            let r = execute_expression(right, input)?;
            binary_loop(&l, &r, count, LogicalType::Boolean, |a, b| {
                comparison_op(a, *comparison, b)
            })
        }
        Expression::Conjunction {
            conjunction,
            children,
        } => {
            let mut iter = children.iter();
            let first = iter
                .next()
                .ok_or_else(|| Error::Internal("conjunction without children".to_string()))?;
            let mut result = execute_expression(first, input)?;
            for child in iter {
                let next = execute_expression(child, input)?;
                result = binary_loop(&result, &next, count, LogicalType::Boolean, |a, b| {
                    conjunction_op(a, *conjunction, b)
                })?;
            }
            Ok(result)
        }
        Expression::Arithmetic { op, left, right } => {
            let l = execute_expression(left, input)?;
            let r = execute_expression(right, input)?;
            binary_loop(&l, &r, count, expr.return_type(), |a, b| {
                evaluate_arithmetic(a, *op, b)
            })
        }
        Expression::IsNull(child) => {
            let v = execute_expression(child, input)?;
            unary_loop(&v, count, LogicalType::Boolean, |a| Ok(Value::Boolean(a.is_null())))
        }
        Expression::IsNotNull(child) => {
            let v = execute_expression(child, input)?;
            unary_loop(&v, count, LogicalType::Boolean, |a| Ok(Value::Boolean(!a.is_null())))
        }
        Expression::Cast { child, target } => {
            let v = execute_expression(child, input)?;
            if v.logical_type() == target {
                return Ok(v);
            }
            unary_loop(&v, count, target.clone(), |a| a.try_cast(target))
        }
    }
}

/// Rows of `input` for which `predicate` is true; NULL counts as false
pub fn select(predicate: &Expression, input: &DataChunk, sel: &mut SelectionVector) -> Result<usize> {
    let result = execute_expression(predicate, input)?;
    let data = result.orrify(input.size());
    let mut approved = 0;
    for row in 0..input.size() {
        if let Value::Boolean(true) = data.get_value(row) {
            sel.set_index(approved, row);
            approved += 1;
        }
    }
    Ok(approved)
}

fn unary_loop<F>(input: &Vector, count: usize, return_type: LogicalType, op: F) -> Result<Vector>
where
    F: Fn(&Value) -> Result<Value>,
{
    if input.is_constant() {
        return Ok(Vector::typed_constant(return_type, op(&input.get_value(0))?));
    }
    let mut result = Vector::new(return_type);
    let data = input.orrify(count);
    for row in 0..count {
        result.set_value(row, &op(&data.get_value(row))?)?;
    }
    Ok(result)
}

fn binary_loop<F>(
    left: &Vector,
    right: &Vector,
    count: usize,
    return_type: LogicalType,
    op: F,
) -> Result<Vector>
where
    F: Fn(&Value, &Value) -> Result<Value>,
{
    if left.is_constant() && right.is_constant() {
        let value = op(&left.get_value(0), &right.get_value(0))?;
        return Ok(Vector::typed_constant(return_type, value));
    }
    let mut result = Vector::new(return_type);
    let l = left.orrify(count);
    let r = right.orrify(count);
    for row in 0..count {
        result.set_value(row, &op(&l.get_value(row), &r.get_value(row))?)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(rows: &[(Option<i32>, i64)]) -> DataChunk {
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|&(a, b)| vec![Value::from(a), Value::BigInt(b)])
            .collect();
        DataChunk::from_rows(&[LogicalType::Integer, LogicalType::BigInt], &rows).unwrap()
    }

    fn col0() -> Expression {
        Expression::column(0, LogicalType::Integer)
    }

    #[test]
    fn test_constant() {
        let result = evaluate(&Expression::constant(42), &[]).unwrap();
        assert_eq!(result, Value::Integer(42));
    }

    #[test]
    fn test_add() {
        let expr = Expression::arithmetic(
            ArithmeticOp::Add,
            Expression::constant(1),
            Expression::constant(2i64),
        );
        assert_eq!(expr.return_type(), LogicalType::BigInt);
        assert_eq!(evaluate(&expr, &[]).unwrap(), Value::BigInt(3));
    }

    #[test]
    fn test_overflow() {
        let expr = Expression::arithmetic(
            ArithmeticOp::Multiply,
            Expression::constant(i32::MAX),
            Expression::constant(2),
        );
        assert!(matches!(evaluate(&expr, &[]), Err(Error::Overflow { .. })));
    }

    #[test]
    fn test_comparison() {
        let expr = Expression::comparison(
            ComparisonType::LessThan,
            Expression::constant(1),
            Expression::constant(2.5),
        );
        assert_eq!(evaluate(&expr, &[]).unwrap(), Value::Boolean(true));

        let bad = Expression::comparison(
            ComparisonType::Equal,
            Expression::constant(1),
            Expression::constant("a"),
        );
        assert!(evaluate(&bad, &[]).is_err());
    }

    #[test]
    fn test_three_valued_logic() {
        let null = Expression::Constant(Value::Null);
        let f = Expression::constant(false);
        let t = Expression::constant(true);
        assert_eq!(
            evaluate(&Expression::and(vec![null.clone(), f]), &[]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            evaluate(&Expression::and(vec![null.clone(), t.clone()]), &[]).unwrap(),
            Value::Null
        );
        assert_eq!(
            evaluate(&Expression::or(vec![null, t]), &[]).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_execute_projection() {
        let input = chunk(&[(Some(1), 10), (None, 20), (Some(3), 30)]);
        let executor = ExpressionExecutor::new(vec![
            Expression::arithmetic(
                ArithmeticOp::Multiply,
                col0(),
                Expression::column(1, LogicalType::BigInt),
            ),
            Expression::is_null(col0()),
            Expression::cast(col0(), LogicalType::Double),
        ]);
        let mut result = DataChunk::new(&[
            LogicalType::BigInt,
            LogicalType::Boolean,
            LogicalType::Double,
        ]);
        executor.execute(&input, &mut result).unwrap();
        assert_eq!(result.size(), 3);
        assert_eq!(
            result.to_rows(),
            vec![
                vec![Value::BigInt(10), Value::Boolean(false), Value::Double(1.0)],
                vec![Value::Null, Value::Boolean(true), Value::Null],
                vec![Value::BigInt(90), Value::Boolean(false), Value::Double(3.0)],
            ]
        );
    }

    #[test]
    fn test_column_ref_aliases_input() {
        let input = chunk(&[(Some(1), 10)]);
        let vector = execute_expression(&col0(), &input).unwrap();
        assert!(vector.shares_buffer(input.column(0)));
    }

    #[test]
    fn test_select_skips_null() {
        let input = chunk(&[(Some(7), 0), (None, 0), (Some(2), 0), (Some(9), 0)]);
        let predicate = Expression::comparison(
            ComparisonType::GreaterThan,
            col0(),
            Expression::constant(5),
        );
        let mut sel = SelectionVector::new(input.size());
        let approved = select(&predicate, &input, &mut sel).unwrap();
        assert_eq!(approved, 2);
        assert_eq!(&sel.as_slice()[..2], &[0, 3]);
    }
}
