//! Row filter

use crate::context::ExecutionContext;
use crate::expression::{select, Expression};
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, LogicalType, Result, SelectionVector, STANDARD_VECTOR_SIZE};
use std::any::Any;
use std::sync::Arc;

/// Passes on the rows of its child for which the predicate is true.
/// Surviving rows are sliced, never copied.
pub struct Filter {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
    predicate: Expression,
}

impl Filter {
    pub fn new(child: Arc<dyn PhysicalOperator>, predicate: Expression) -> Self {
        Filter {
            types: child.types().to_vec(),
            children: vec![child],
            predicate,
        }
    }
}

impl PhysicalOperator for Filter {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Filter
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
        let mut sel = SelectionVector::new(STANDARD_VECTOR_SIZE);
        // skip chunks without a single match
        loop {
            self.children[0].get_chunk(context, child_chunk, child_state)?;
            if child_chunk.is_empty() {
                return Ok(());
            }
            let count = select(&self.predicate, child_chunk, &mut sel)?;
            if count == 0 {
                continue;
            }
            chunk.reference(child_chunk);
            if count < child_chunk.size() {
                chunk.slice(&sel, count);
            }
            return Ok(());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        self.predicate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::{collect, int_scan, test_client};
    use mallard_common::{ComparisonType, Value};

    #[test]
    fn test_filter_keeps_matching_rows() {
        let predicate = Expression::and(vec![
            Expression::comparison(
                ComparisonType::GreaterThan,
                Expression::column(0, LogicalType::Integer),
                Expression::constant(5),
            ),
            Expression::comparison(
                ComparisonType::LessThanOrEqual,
                Expression::column(0, LogicalType::Integer),
                Expression::constant(20),
            ),
        ]);
        let filter = Filter::new(int_scan(&[1, 6, 15, 25, 20, 3]), predicate);
        let rows = collect(&test_client(1), &filter).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(6)],
                vec![Value::Integer(15)],
                vec![Value::Integer(20)],
            ]
        );
    }

    #[test]
    fn test_filter_without_matches_is_empty() {
        let predicate = Expression::is_null(Expression::column(0, LogicalType::Integer));
        let filter = Filter::new(int_scan(&[1, 2, 3]), predicate);
        assert!(collect(&test_client(1), &filter).unwrap().is_empty());
    }
}
