//! Duplicate eliminated join
//!
//! Used for correlated subqueries: the left input is materialized once, the
//! distinct values of its correlated columns are handed to the delim scans
//! inside the right side of the join, and the join then runs against the
//! materialized left input.

use crate::context::{ClientContext, ExecutionContext};
use crate::operator::{
    downcast_global, operator_id, GlobalSinkState, LocalSinkState, OperatorState,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use crate::operators::SharedCollection;
use hashbrown::HashSet;
use mallard_common::{
    ChunkCollection, DataChunk, Error, LogicalType, Result, Value, STANDARD_VECTOR_SIZE,
};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct DelimJoinGlobalState {
    lhs: Mutex<ChunkCollection>,
    /// Distinct correlated values in first-seen order
    distinct: Mutex<(HashSet<Vec<Value>>, Vec<Vec<Value>>)>,
}

pub struct DelimJoin {
    children: Vec<Arc<dyn PhysicalOperator>>,
    join: Arc<dyn PhysicalOperator>,
    /// Scanned by the left side of `join`
    lhs_data: SharedCollection,
    /// Scanned by the delim scans inside `join`
    delim_data: SharedCollection,
    delim_columns: Vec<usize>,
    delim_types: Vec<LogicalType>,
    delim_scans: Vec<usize>,
    slot: SinkStateSlot,
}

impl DelimJoin {
    pub fn new(
        lhs: Arc<dyn PhysicalOperator>,
        join: Arc<dyn PhysicalOperator>,
        lhs_data: SharedCollection,
        delim_data: SharedCollection,
        delim_columns: Vec<usize>,
        delim_scans: &[Arc<dyn PhysicalOperator>],
    ) -> Result<Self> {
        let delim_types = delim_columns
            .iter()
            .map(|&c| {
                lhs.types().get(c).cloned().ok_or_else(|| {
                    Error::InvalidArguments(format!("delim column {} out of range", c))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(scan) = delim_scans
            .iter()
            .find(|s| s.kind() != PhysicalOperatorType::DelimScan)
        {
            return Err(Error::InvalidArguments(format!(
                "{} registered as delim scan",
                scan.kind()
            )));
        }
        Ok(DelimJoin {
            children: vec![lhs],
            join,
            lhs_data,
            delim_data,
            delim_columns,
            delim_types,
            delim_scans: delim_scans.iter().map(|s| operator_id(s.as_ref())).collect(),
            slot: SinkStateSlot::default(),
        })
    }

    /// The join producing the output
    pub fn join(&self) -> &Arc<dyn PhysicalOperator> {
        &self.join
    }

    /// Identities of the scans reading the distinct values
    pub fn delim_scans(&self) -> &[usize] {
        &self.delim_scans
    }
}

impl PhysicalOperator for DelimJoin {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::DelimJoin
    }

    fn types(&self) -> &[LogicalType] {
        self.join.types()
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        self.join.get_operator_state()
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        self.join.get_chunk(context, chunk, state)
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let columns: Vec<String> = self.delim_columns.iter().map(|c| format!("#{}", c)).collect();
        columns.join(", ")
    }
}

impl SinkOperator for DelimJoin {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        Ok(Arc::new(DelimJoinGlobalState::default()))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        _lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        let global = downcast_global::<DelimJoinGlobalState>(gstate)?;
        global.lhs.lock().append(input)?;
        let mut distinct = global.distinct.lock();
        let (seen, rows) = &mut *distinct;
        for row in 0..input.size() {
            let key: Vec<Value> = self
                .delim_columns
                .iter()
                .map(|&c| input.get_value(c, row))
                .collect();
            if seen.insert(key.clone()) {
                rows.push(key);
            }
        }
        Ok(())
    }

    fn finalize(&self, _client: &ClientContext, gstate: &GlobalSinkState) -> Result<()> {
        let global = downcast_global::<DelimJoinGlobalState>(gstate)?;
        let lhs = std::mem::take(&mut *global.lhs.lock());
        let (_, rows) = std::mem::take(&mut *global.distinct.lock());
        let mut distinct = ChunkCollection::new();
        for part in rows.chunks(STANDARD_VECTOR_SIZE) {
            distinct.append(&DataChunk::from_rows(&self.delim_types, part)?)?;
        }
        debug!(rows = lhs.count(), distinct = distinct.count(), "delim join input materialized");
        *self.lhs_data.write() = lhs;
        *self.delim_data.write() = distinct;
        Ok(())
    }

    fn sink_slot(&self) -> &SinkStateSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::expression::{ArithmeticOp, Expression};
    use crate::operators::test_util::{scan_of, sorted, test_client};
    use crate::operators::{ChunkScan, HashJoin, JoinCondition, JoinType, Projection};
    use parking_lot::RwLock;

    #[test]
    fn test_join_against_distinct_keys() {
        let types = vec![LogicalType::Integer, LogicalType::Varchar];
        let lhs = scan_of(
            &types,
            &[
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(2), Value::from("b")],
                vec![Value::Integer(1), Value::from("c")],
            ],
        );
        let lhs_data: SharedCollection = Arc::new(RwLock::new(ChunkCollection::new()));
        let delim_data: SharedCollection = Arc::new(RwLock::new(ChunkCollection::new()));
        let delim_scan: Arc<dyn PhysicalOperator> = Arc::new(ChunkScan::delim_scan(
            vec![LogicalType::Integer],
            Arc::clone(&delim_data),
        ));
        let correlated = Projection::new(
            Arc::clone(&delim_scan),
            vec![
                Expression::column(0, LogicalType::Integer),
                Expression::arithmetic(
                    ArithmeticOp::Multiply,
                    Expression::column(0, LogicalType::Integer),
                    Expression::constant(10),
                ),
            ],
        );
        let join = HashJoin::new(
            Arc::new(ChunkScan::shared(types, Arc::clone(&lhs_data))),
            Arc::new(correlated),
            vec![JoinCondition::new(0, 0)],
            JoinType::Inner,
        )
        .unwrap();
        let delim = DelimJoin::new(
            lhs,
            Arc::new(join),
            lhs_data,
            Arc::clone(&delim_data),
            vec![0],
            &[delim_scan],
        )
        .unwrap();

        let mut executor = Executor::new(test_client(2));
        executor.initialize(Arc::new(delim)).unwrap();
        assert_eq!(executor.graph().delim_dependencies.len(), 1);
        assert_eq!(executor.pipelines().len(), 2);
        assert_eq!(delim_data.read().count(), 2);

        let mut rows = Vec::new();
        loop {
            let chunk = executor.fetch_chunk().unwrap();
            if chunk.is_empty() {
                break;
            }
            rows.extend(chunk.to_rows());
        }
        let rows: Vec<Vec<Value>> = sorted(rows)
            .into_iter()
            .map(|r| vec![r[1].clone(), r[3].clone()])
            .collect();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Integer(10)],
                vec![Value::from("c"), Value::Integer(10)],
                vec![Value::from("b"), Value::Integer(20)],
            ]
        );
    }

    #[test]
    fn test_rejects_non_delim_scan() {
        let data: SharedCollection = Arc::new(RwLock::new(ChunkCollection::new()));
        let lhs = scan_of(&[LogicalType::Integer], &[]);
        let not_delim: Arc<dyn PhysicalOperator> =
            Arc::new(ChunkScan::shared(vec![LogicalType::Integer], Arc::clone(&data)));
        let result = DelimJoin::new(
            Arc::clone(&lhs),
            Arc::clone(&lhs),
            Arc::clone(&data),
            data,
            vec![0],
            &[not_delim],
        );
        assert!(result.is_err());
    }
}
