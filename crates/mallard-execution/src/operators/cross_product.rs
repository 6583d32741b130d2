//! Cross product

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{ChunkCollection, DataChunk, LogicalType, Result, Vector};
use std::any::Any;
use std::sync::Arc;

/// Pairs every left row with every right row.
///
/// The right input is materialized on the first pull. Each output chunk
/// holds one left row, as constant vectors, next to one chunk of the right
/// input.
pub struct CrossProduct {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
}

#[derive(Default)]
struct CrossProductProgress {
    right: ChunkCollection,
    materialized: bool,
    left_position: usize,
    right_position: usize,
}

impl CrossProduct {
    pub fn new(left: Arc<dyn PhysicalOperator>, right: Arc<dyn PhysicalOperator>) -> Self {
        let mut types = left.types().to_vec();
        types.extend_from_slice(right.types());
        CrossProduct {
            children: vec![left, right],
            types,
        }
    }

    fn materialize_right(
        &self,
        context: &mut ExecutionContext,
        right: &mut ChunkCollection,
    ) -> Result<()> {
        let child = &self.children[1];
        let mut state = child.get_operator_state()?;
        let mut chunk = DataChunk::new(child.types());
        loop {
            child.get_chunk(context, &mut chunk, &mut state)?;
            if chunk.is_empty() {
                return Ok(());
            }
            right.append(&chunk)?;
        }
    }
}

impl PhysicalOperator for CrossProduct {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::CrossProduct
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(self.children.first())?.with_local(CrossProductProgress::default()))
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let (progress, left_chunk, left_state) = state.parts::<CrossProductProgress>()?;
        let left = &self.children[0];
        if !progress.materialized {
            self.materialize_right(context, &mut progress.right)?;
            progress.materialized = true;
            if progress.right.is_empty() {
                return Ok(());
            }
            left.get_chunk(context, left_chunk, left_state)?;
            left_chunk.normalify();
        }
        if progress.right.is_empty() || progress.left_position >= left_chunk.size() {
            return Ok(());
        }

        let right_chunk = progress.right.chunk(progress.right_position);
        let left_columns = left_chunk.column_count();
        for i in 0..left_columns {
            let value = left_chunk.get_value(i, progress.left_position);
            let constant = Vector::typed_constant(self.types[i].clone(), value);
            chunk.column_mut(i).reference(&constant);
        }
        for (i, vector) in right_chunk.data.iter().enumerate() {
            chunk.column_mut(left_columns + i).reference(vector);
        }
        chunk.set_cardinality(right_chunk.size());

        // next left row; after the last one, the next right chunk
        progress.left_position += 1;
        if progress.left_position >= left_chunk.size() {
            progress.left_position = 0;
            progress.right_position += 1;
            if progress.right_position >= progress.right.chunk_count() {
                // every right chunk paired with this left chunk: pull the next one
                progress.right_position = 0;
                left.get_chunk(context, left_chunk, left_state)?;
                left_chunk.normalify();
            }
        }
        Ok(())
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
    fn test_empty_right_produces_nothing() {
        let cross = CrossProduct::new(int_scan(&[1, 2, 3]), int_scan(&[]));
        let client = test_client(1);
        let mut context =
            ExecutionContext::new(client, crate::context::TaskContext::default());
        let mut state = cross.get_operator_state().unwrap();
        let mut chunk = DataChunk::new(cross.types());
        cross.get_chunk(&mut context, &mut chunk, &mut state).unwrap();
        assert!(chunk.is_empty());
        assert!(state.finished);
    }

    #[test]
    fn test_every_pair_once() {
        let cross = CrossProduct::new(int_scan(&[1, 2, 3]), int_scan(&[10, 20]));
        let mut rows = collect(&test_client(1), &cross).unwrap();
        rows.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
        let expected: Vec<Vec<Value>> = [1, 2, 3]
            .iter()
            .flat_map(|&l| [10, 20].map(|r| vec![Value::Integer(l), Value::Integer(r)]))
            .collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_empty_left_produces_nothing() {
        let cross = CrossProduct::new(int_scan(&[]), int_scan(&[1]));
        assert!(collect(&test_client(1), &cross).unwrap().is_empty());
    }
}
