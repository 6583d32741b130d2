//! Execution of a stored plan

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, LogicalType, Result};
use std::any::Any;
use std::sync::Arc;

/// Runs a previously prepared plan in place of this node
pub struct Execute {
    plan: Arc<dyn PhysicalOperator>,
}

impl Execute {
    pub fn new(plan: Arc<dyn PhysicalOperator>) -> Self {
        Execute { plan }
    }

    pub fn plan(&self) -> &Arc<dyn PhysicalOperator> {
        &self.plan
    }
}

impl PhysicalOperator for Execute {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Execute
    }

    fn types(&self) -> &[LogicalType] {
        self.plan.types()
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        self.plan.get_operator_state()
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        self.plan.get_chunk(context, chunk, state)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
