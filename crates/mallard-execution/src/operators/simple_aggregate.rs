//! Aggregation without groups

use crate::aggregate::{combine_states, evaluate_inputs, update_row, AggregateExpression, AggregateState};
use crate::context::{ClientContext, ExecutionContext};
use crate::operator::{
    downcast_global, downcast_local, GlobalSinkState, LocalSinkState, OperatorState, ParallelMode,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use mallard_common::{DataChunk, LogicalType, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Computes `aggregates` over the whole input and emits exactly one row,
/// also for an empty input.
pub struct SimpleAggregate {
    children: Vec<Arc<dyn PhysicalOperator>>,
    aggregates: Vec<AggregateExpression>,
    types: Vec<LogicalType>,
    slot: SinkStateSlot,
}

struct SimpleAggregateState {
    states: Mutex<Vec<AggregateState>>,
}

impl SimpleAggregate {
    pub fn new(child: Arc<dyn PhysicalOperator>, aggregates: Vec<AggregateExpression>) -> Self {
        SimpleAggregate {
            children: vec![child],
            types: aggregates.iter().map(|a| a.return_type()).collect(),
            aggregates,
            slot: SinkStateSlot::default(),
        }
    }

    fn empty_states(&self) -> Vec<AggregateState> {
        vec![AggregateState::default(); self.aggregates.len()]
    }
}

impl PhysicalOperator for SimpleAggregate {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::SimpleAggregate
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(None)?.with_local(false))
    }

    fn get_chunk_internal(
        &self,
        _context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let emitted = state.local_mut::<bool>()?;
        if *emitted {
            return Ok(());
        }
        let gstate = self.slot.get()?;
        let states = downcast_global::<SimpleAggregateState>(&gstate)?.states.lock();
        for (i, (aggregate, state)) in self.aggregates.iter().zip(states.iter()).enumerate() {
            chunk.set_value(i, 0, &aggregate.finalize(state)?)?;
        }
        chunk.set_cardinality(1);
        *emitted = true;
        Ok(())
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let aggregates: Vec<String> = self.aggregates.iter().map(|a| a.to_string()).collect();
        aggregates.join(", ")
    }
}

impl SinkOperator for SimpleAggregate {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        Ok(Arc::new(SimpleAggregateState {
            states: Mutex::new(self.empty_states()),
        }))
    }

    fn get_local_sink_state(&self, _context: &ExecutionContext) -> Result<LocalSinkState> {
        Ok(Box::new(self.empty_states()))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        _gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        let states = downcast_local::<Vec<AggregateState>>(lstate)?;
        let inputs = evaluate_inputs(&self.aggregates, input)?;
        for row in 0..input.size() {
            update_row(&self.aggregates, states, &inputs, row)?;
        }
        Ok(())
    }

    fn combine(
        &self,
        _context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
    ) -> Result<()> {
        let local = downcast_local::<Vec<AggregateState>>(lstate)?;
        let global = downcast_global::<SimpleAggregateState>(gstate)?;
        combine_states(&self.aggregates, &mut global.states.lock(), local)
    }

    fn parallel_mode(&self) -> ParallelMode {
        ParallelMode::Parallel
    }

    fn sink_slot(&self) -> &SinkStateSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunction;
    use crate::expression::Expression;
    use crate::operators::test_util::{int_scan, run_plan, test_client};
    use mallard_common::Value;

    fn aggregates() -> Vec<AggregateExpression> {
        let column = Expression::column(0, LogicalType::Integer);
        vec![
            AggregateExpression::count_star(),
            AggregateExpression::new(AggregateFunction::Min, column.clone()),
            AggregateExpression::new(AggregateFunction::Max, column.clone()),
            AggregateExpression::new(AggregateFunction::Avg, column),
        ]
    }

    #[test]
    fn test_single_row_result() {
        let aggregate = SimpleAggregate::new(int_scan(&[4, 8, 3]), aggregates());
        let rows = run_plan(&test_client(1), Arc::new(aggregate)).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::BigInt(3),
                Value::Integer(3),
                Value::Integer(8),
                Value::Double(5.0),
            ]]
        );
    }

    #[test]
    fn test_empty_input_yields_one_row() {
        let aggregate = SimpleAggregate::new(int_scan(&[]), aggregates());
        let rows = run_plan(&test_client(1), Arc::new(aggregate)).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::BigInt(0), Value::Null, Value::Null, Value::Null]]
        );
    }
}
