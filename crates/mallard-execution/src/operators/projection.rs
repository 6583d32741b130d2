//! Projection

use crate::context::ExecutionContext;
use crate::expression::{Expression, ExpressionExecutor};
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, LogicalType, Result};
use std::any::Any;
use std::sync::Arc;

/// Computes one output column per expression over the child rows
pub struct Projection {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
    executor: ExpressionExecutor,
}

impl Projection {
    pub fn new(child: Arc<dyn PhysicalOperator>, expressions: Vec<Expression>) -> Self {
        Projection {
            children: vec![child],
            types: expressions.iter().map(|e| e.return_type()).collect(),
            executor: ExpressionExecutor::new(expressions),
        }
    }
}

impl PhysicalOperator for Projection {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Projection
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let (child_chunk, child_state) = state.child_parts()?;
        self.children[0].get_chunk(context, child_chunk, child_state)?;
        if child_chunk.is_empty() {
            return Ok(());
        }
        self.executor.execute(child_chunk, chunk)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let expressions: Vec<String> = self
            .executor
            .expressions()
            .iter()
            .map(|e| e.to_string())
            .collect();
        expressions.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ArithmeticOp;
    use crate::operators::test_util::{collect, int_scan, test_client};
    use mallard_common::Value;

    #[test]
    fn test_projection_computes_columns() {
        let projection = Projection::new(
            int_scan(&[1, 2]),
            vec![
                Expression::arithmetic(
                    ArithmeticOp::Add,
                    Expression::column(0, LogicalType::Integer),
                    Expression::constant(10),
                ),
                Expression::constant("x"),
            ],
        );
        assert_eq!(projection.types(), &[LogicalType::Integer, LogicalType::Varchar]);
        let rows = collect(&test_client(1), &projection).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(11), Value::Varchar("x".to_string())],
                vec![Value::Integer(12), Value::Varchar("x".to_string())],
            ]
        );
    }
}
