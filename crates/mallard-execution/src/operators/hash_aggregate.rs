//! Grouped aggregation

use crate::aggregate::{combine_states, evaluate_inputs, update_row, AggregateExpression, AggregateState};
use crate::context::{ClientContext, ExecutionContext};
use crate::expression::{execute_expression, Expression};
use crate::operator::{
    downcast_global, downcast_local, GlobalSinkState, LocalSinkState, OperatorState, ParallelMode,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use mallard_common::{ChunkCollection, DataChunk, Error, LogicalType, Result, Value, STANDARD_VECTOR_SIZE};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, OnceLock};

type GroupTable = HashMap<Vec<Value>, Vec<AggregateState>>;

#[derive(Default)]
struct HashAggregateGlobalState {
    groups: Mutex<GroupTable>,
    result: OnceLock<ChunkCollection>,
}

/// Every task aggregates into its own table; `combine` merges the tables
#[derive(Default)]
struct HashAggregateLocalState {
    groups: GroupTable,
}

/// `GROUP BY groups` computing `aggregates` per group. Output columns are
/// the groups followed by the aggregates, in no particular row order.
pub struct HashAggregate {
    children: Vec<Arc<dyn PhysicalOperator>>,
    groups: Vec<Expression>,
    aggregates: Vec<AggregateExpression>,
    types: Vec<LogicalType>,
    slot: SinkStateSlot,
}

impl HashAggregate {
    pub fn new(
        child: Arc<dyn PhysicalOperator>,
        groups: Vec<Expression>,
        aggregates: Vec<AggregateExpression>,
    ) -> Self {
        let types = groups
            .iter()
            .map(|g| g.return_type())
            .chain(aggregates.iter().map(|a| a.return_type()))
            .collect();
        HashAggregate {
            children: vec![child],
            groups,
            aggregates,
            types,
            slot: SinkStateSlot::default(),
        }
    }
}

impl PhysicalOperator for HashAggregate {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::HashGroupBy
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(None)?.with_local(0usize))
    }

    fn get_chunk_internal(
        &self,
        _context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let gstate = self.slot.get()?;
        let result = downcast_global::<HashAggregateGlobalState>(&gstate)?
            .result
            .get()
            .ok_or_else(|| Error::Internal("aggregate read before it was finalized".to_string()))?;
        let next = state.local_mut::<usize>()?;
        if *next < result.chunk_count() {
            chunk.reference(result.chunk(*next));
            *next += 1;
        }
        Ok(())
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let groups: Vec<String> = self.groups.iter().map(|g| g.to_string()).collect();
        let aggregates: Vec<String> = self.aggregates.iter().map(|a| a.to_string()).collect();
        format!("[{}] {}", groups.join(", "), aggregates.join(", "))
    }
}

impl SinkOperator for HashAggregate {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        Ok(Arc::new(HashAggregateGlobalState::default()))
    }

    fn get_local_sink_state(&self, _context: &ExecutionContext) -> Result<LocalSinkState> {
        Ok(Box::new(HashAggregateLocalState::default()))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        _gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        let local = downcast_local::<HashAggregateLocalState>(lstate)?;
        let keys = self
            .groups
            .iter()
            .map(|g| execute_expression(g, input))
            .collect::<Result<Vec<_>>>()?;
        let inputs = evaluate_inputs(&self.aggregates, input)?;
        for row in 0..input.size() {
            let key: Vec<Value> = keys.iter().map(|k| k.get_value(row)).collect();
            let states = local
                .groups
                .entry(key)
                .or_insert_with(|| vec![AggregateState::default(); self.aggregates.len()]);
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
        let local = downcast_local::<HashAggregateLocalState>(lstate)?;
        let global = downcast_global::<HashAggregateGlobalState>(gstate)?;
        let mut groups = global.groups.lock();
        for (key, states) in local.groups.drain() {
            match groups.entry(key) {
                Entry::Occupied(mut entry) => {
                    combine_states(&self.aggregates, entry.get_mut(), &states)?
                }
                Entry::Vacant(entry) => {
                    entry.insert(states);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, _client: &ClientContext, gstate: &GlobalSinkState) -> Result<()> {
        let global = downcast_global::<HashAggregateGlobalState>(gstate)?;
        let groups = std::mem::take(&mut *global.groups.lock());
        let mut rows = Vec::with_capacity(groups.len());
        for (key, states) in groups {
            let mut row = key;
            for (aggregate, state) in self.aggregates.iter().zip(&states) {
                row.push(aggregate.finalize(state)?);
            }
            rows.push(row);
        }
        let mut result = ChunkCollection::new();
        for part in rows.chunks(STANDARD_VECTOR_SIZE) {
            result.append(&DataChunk::from_rows(&self.types, part)?)?;
        }
        global
            .result
            .set(result)
            .map_err(|_| Error::Internal("aggregate finalized twice".to_string()))
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
    use crate::operators::test_util::{run_plan, scan_of, sorted, test_client};

    #[test]
    fn test_group_by_with_null_group() {
        let types = [LogicalType::Varchar, LogicalType::Integer];
        let rows = vec![
            vec![Value::from("a"), Value::Integer(1)],
            vec![Value::from("b"), Value::Integer(5)],
            vec![Value::from("a"), Value::Integer(3)],
            vec![Value::Null, Value::Integer(7)],
            vec![Value::from("b"), Value::Null],
        ];
        let aggregate = HashAggregate::new(
            scan_of(&types, &rows),
            vec![Expression::column(0, LogicalType::Varchar)],
            vec![
                AggregateExpression::count_star(),
                AggregateExpression::new(
                    AggregateFunction::Sum,
                    Expression::column(1, LogicalType::Integer),
                ),
            ],
        );
        assert_eq!(
            aggregate.types(),
            &[LogicalType::Varchar, LogicalType::BigInt, LogicalType::HugeInt]
        );
        let result = sorted(run_plan(&test_client(2), Arc::new(aggregate)).unwrap());
        assert_eq!(
            result,
            vec![
                vec![Value::Null, Value::BigInt(1), Value::HugeInt(7)],
                vec![Value::from("a"), Value::BigInt(2), Value::HugeInt(4)],
                vec![Value::from("b"), Value::BigInt(2), Value::HugeInt(5)],
            ]
        );
    }

    #[test]
    fn test_empty_input_has_no_groups() {
        let aggregate = HashAggregate::new(
            scan_of(&[LogicalType::Integer], &[]),
            vec![Expression::column(0, LogicalType::Integer)],
            vec![AggregateExpression::count_star()],
        );
        assert!(run_plan(&test_client(1), Arc::new(aggregate)).unwrap().is_empty());
    }
}
