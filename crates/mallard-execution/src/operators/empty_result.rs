//! Operator producing no rows

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, LogicalType, Result};
use std::any::Any;

pub struct EmptyResult {
    types: Vec<LogicalType>,
}

impl EmptyResult {
    pub fn new(types: Vec<LogicalType>) -> Self {
        EmptyResult { types }
    }
}

impl PhysicalOperator for EmptyResult {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::EmptyResult
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn get_chunk_internal(
        &self,
        _context: &mut ExecutionContext,
        _chunk: &mut DataChunk,
        _state: &mut OperatorState,
    ) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
