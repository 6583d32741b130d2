//! UNION ALL of two inputs

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, Error, LogicalType, Result};
use std::any::Any;
use std::sync::Arc;

/// Streams the top input to its end, then the bottom one
pub struct Union {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
}

struct UnionProgress {
    top: OperatorState,
    bottom: OperatorState,
    top_done: bool,
}

impl Union {
    pub fn new(top: Arc<dyn PhysicalOperator>, bottom: Arc<dyn PhysicalOperator>) -> Result<Self> {
        if top.types().len() != bottom.types().len() {
            return Err(Error::InvalidArguments(format!(
                "union of {} and {} columns",
                top.types().len(),
                bottom.types().len()
            )));
        }
        Ok(Union {
            types: top.types().to_vec(),
            children: vec![top, bottom],
        })
    }
}

impl PhysicalOperator for Union {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Union
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(None)?.with_local(UnionProgress {
            top: self.children[0].get_operator_state()?,
            bottom: self.children[1].get_operator_state()?,
            top_done: false,
        }))
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let progress = state.local_mut::<UnionProgress>()?;
        if !progress.top_done {
            self.children[0].get_chunk(context, chunk, &mut progress.top)?;
            if !chunk.is_empty() {
                return Ok(());
            }
            progress.top_done = true;
        }
        self.children[1].get_chunk(context, chunk, &mut progress.bottom)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::{collect, int_scan, test_client};
    use mallard_common::Value;

    #[test]
    fn test_union_streams_both_inputs() {
        let union = Union::new(int_scan(&[1, 2]), int_scan(&[3])).unwrap();
        let rows = collect(&test_client(1), &union).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1)],
                vec![Value::Integer(2)],
                vec![Value::Integer(3)],
            ]
        );
    }

    #[test]
    fn test_union_with_empty_top() {
        let union = Union::new(int_scan(&[]), int_scan(&[9])).unwrap();
        let rows = collect(&test_client(1), &union).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(9)]]);
    }
}
