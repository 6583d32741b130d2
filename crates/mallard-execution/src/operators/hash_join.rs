//! Hash join on equality conditions
//!
//! The right input is the build side: the join sinks it into a hash table in
//! its own pipeline, and the left input is probed through `get_chunk` once
//! that pipeline finished.

use crate::context::{ClientContext, ExecutionContext};
use crate::operator::{
    downcast_global, downcast_local, GlobalSinkState, LocalSinkState, OperatorState, ParallelMode,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use hashbrown::HashMap;
use mallard_common::{
    ChunkCollection, DataChunk, Error, LogicalType, Result, SelectionVector, Value,
    STANDARD_VECTOR_SIZE,
};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    /// Every left row, with NULLs where nothing matched
    Left,
    /// Left rows with at least one match
    Semi,
    /// Left rows without a match
    Anti,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Semi => "SEMI",
            JoinType::Anti => "ANTI",
        };
        write!(f, "{}", name)
    }
}

/// `left.column(left) = right.column(right)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: usize,
    pub right: usize,
}

impl JoinCondition {
    pub fn new(left: usize, right: usize) -> Self {
        JoinCondition { left, right }
    }
}

struct JoinHashTable {
    payload: ChunkCollection,
    /// Join key to the payload rows carrying it
    index: HashMap<Vec<Value>, Vec<usize>>,
}

#[derive(Default)]
struct HashJoinGlobalState {
    collected: Mutex<ChunkCollection>,
    table: OnceLock<JoinHashTable>,
}

#[derive(Default)]
struct HashJoinLocalState {
    collected: ChunkCollection,
}

/// Matches of the current left chunk not emitted yet
#[derive(Default)]
struct ProbeProgress {
    matches: Vec<(usize, Option<usize>)>,
    position: usize,
}

pub struct HashJoin {
    children: Vec<Arc<dyn PhysicalOperator>>,
    conditions: Vec<JoinCondition>,
    join_type: JoinType,
    key_types: Vec<LogicalType>,
    types: Vec<LogicalType>,
    slot: SinkStateSlot,
}

impl HashJoin {
    pub fn new(
        left: Arc<dyn PhysicalOperator>,
        right: Arc<dyn PhysicalOperator>,
        conditions: Vec<JoinCondition>,
        join_type: JoinType,
    ) -> Result<Self> {
        if conditions.is_empty() {
            return Err(Error::InvalidArguments(
                "hash join needs at least one condition".to_string(),
            ));
        }
        let mut key_types = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            let (l, r) = match (
                left.types().get(condition.left),
                right.types().get(condition.right),
            ) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(Error::InvalidArguments(format!(
                        "join condition #{} = #{} out of range",
                        condition.left, condition.right
                    )))
                }
            };
            let key_type = l.common_supertype(r).ok_or_else(|| Error::TypeMismatch {
                expected: l.to_string(),
                got: r.to_string(),
            })?;
            key_types.push(key_type);
        }

        let mut types = left.types().to_vec();
        if matches!(join_type, JoinType::Inner | JoinType::Left) {
            types.extend_from_slice(right.types());
        }
        Ok(HashJoin {
            children: vec![left, right],
            conditions,
            join_type,
            key_types,
            types,
            slot: SinkStateSlot::default(),
        })
    }

    /// The join key of `row`, None if any part of it is NULL
    fn key(&self, chunk: &DataChunk, row: usize, left: bool) -> Result<Option<Vec<Value>>> {
        let mut key = Vec::with_capacity(self.conditions.len());
        for (condition, key_type) in self.conditions.iter().zip(&self.key_types) {
            let column = if left { condition.left } else { condition.right };
            let value = chunk.get_value(column, row);
            if value.is_null() {
                return Ok(None);
            }
            key.push(value.try_cast(key_type)?);
        }
        Ok(Some(key))
    }

    fn probe(&self, table: &JoinHashTable, left: &DataChunk) -> Result<Vec<(usize, Option<usize>)>> {
        let mut matches = Vec::new();
        for row in 0..left.size() {
            let found = match self.key(left, row, true)? {
                Some(key) => table.index.get(&key),
                None => None,
            };
            match (self.join_type, found) {
                (JoinType::Inner | JoinType::Left, Some(rows)) => {
                    matches.extend(rows.iter().map(|&r| (row, Some(r))));
                }
                (JoinType::Left, None) | (JoinType::Semi, Some(_)) | (JoinType::Anti, None) => {
                    matches.push((row, None));
                }
                _ => {}
            }
        }
        Ok(matches)
    }
}

impl PhysicalOperator for HashJoin {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::HashJoin
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(self.children.first())?.with_local(ProbeProgress::default()))
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let gstate = self.slot.get()?;
        let table = downcast_global::<HashJoinGlobalState>(&gstate)?
            .table
            .get()
            .ok_or_else(|| Error::Internal("hash join probed before the build".to_string()))?;
        let (progress, left_chunk, left_state) = state.parts::<ProbeProgress>()?;

        while progress.position >= progress.matches.len() {
            self.children[0].get_chunk(context, left_chunk, left_state)?;
            if left_chunk.is_empty() {
                return Ok(());
            }
            progress.matches = self.probe(table, left_chunk)?;
            progress.position = 0;
        }

        let end = (progress.position + STANDARD_VECTOR_SIZE).min(progress.matches.len());
        let batch = &progress.matches[progress.position..end];
        let sel = SelectionVector::from_indices(batch.iter().map(|&(l, _)| l as u32).collect());
        let left_columns = left_chunk.column_count();
        for i in 0..left_columns {
            let column = chunk.column_mut(i);
            column.reference(left_chunk.column(i));
            column.slice(&sel, batch.len());
        }
        if self.types.len() > left_columns {
            for (row, &(_, right_row)) in batch.iter().enumerate() {
                for j in 0..self.types.len() - left_columns {
                    let value = match right_row {
                        Some(r) => table.payload.get_value(j, r),
                        None => Value::Null,
                    };
                    chunk.set_value(left_columns + j, row, &value)?;
                }
            }
        }
        chunk.set_cardinality(batch.len());
        progress.position = end;
        Ok(())
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let conditions: Vec<String> = self
            .conditions
            .iter()
            .map(|c| format!("#{} = #{}", c.left, c.right))
            .collect();
        format!("{} {}", self.join_type, conditions.join(" AND "))
    }
}

impl SinkOperator for HashJoin {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        Ok(Arc::new(HashJoinGlobalState::default()))
    }

    fn get_local_sink_state(&self, _context: &ExecutionContext) -> Result<LocalSinkState> {
        Ok(Box::new(HashJoinLocalState::default()))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        _gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        downcast_local::<HashJoinLocalState>(lstate)?
            .collected
            .append(input)
    }

    fn combine(
        &self,
        _context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
    ) -> Result<()> {
        let local = downcast_local::<HashJoinLocalState>(lstate)?;
        downcast_global::<HashJoinGlobalState>(gstate)?
            .collected
            .lock()
            .merge(&local.collected)
    }

    fn finalize(&self, _client: &ClientContext, gstate: &GlobalSinkState) -> Result<()> {
        let global = downcast_global::<HashJoinGlobalState>(gstate)?;
        let payload = std::mem::take(&mut *global.collected.lock());
        let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (chunk_idx, chunk) in payload.chunks().iter().enumerate() {
            for row in 0..chunk.size() {
                // NULL keys never match
                if let Some(key) = self.key(chunk, row, false)? {
                    index
                        .entry(key)
                        .or_default()
                        .push(chunk_idx * STANDARD_VECTOR_SIZE + row);
                }
            }
        }
        debug!(rows = payload.count(), keys = index.len(), "hash join build finished");
        global
            .table
            .set(JoinHashTable { payload, index })
            .map_err(|_| Error::Internal("hash join finalized twice".to_string()))
    }

    fn parallel_mode(&self) -> ParallelMode {
        ParallelMode::Parallel
    }

    fn sink_child(&self) -> usize {
        1
    }

    fn sink_slot(&self) -> &SinkStateSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::{int_scan, run_plan, scan_of, sorted, test_client};

    fn join(left: &[i32], right: &[Vec<Value>], join_type: JoinType) -> Vec<Vec<Value>> {
        let right = scan_of(&[LogicalType::BigInt, LogicalType::Varchar], right);
        let join = HashJoin::new(int_scan(left), right, vec![JoinCondition::new(0, 0)], join_type)
            .unwrap();
        sorted(run_plan(&test_client(2), Arc::new(join)).unwrap())
    }

    fn named(key: i64, name: &str) -> Vec<Value> {
        vec![Value::BigInt(key), Value::Varchar(name.to_string())]
    }

    #[test]
    fn test_inner_join_with_duplicates() {
        let rows = join(
            &[1, 2, 3],
            &[named(2, "a"), named(2, "b"), named(4, "c")],
            JoinType::Inner,
        );
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(2), Value::BigInt(2), Value::Varchar("a".to_string())],
                vec![Value::Integer(2), Value::BigInt(2), Value::Varchar("b".to_string())],
            ]
        );
    }

    #[test]
    fn test_left_join_pads_with_null() {
        let rows = join(&[1, 2], &[named(2, "a")], JoinType::Left);
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1), Value::Null, Value::Null],
                vec![Value::Integer(2), Value::BigInt(2), Value::Varchar("a".to_string())],
            ]
        );
    }

    #[test]
    fn test_semi_and_anti() {
        let build = [named(2, "a"), named(2, "b"), vec![Value::Null, Value::Null]];
        let semi = join(&[1, 2, 3], &build, JoinType::Semi);
        assert_eq!(semi, vec![vec![Value::Integer(2)]]);
        let anti = join(&[1, 2, 3], &build, JoinType::Anti);
        assert_eq!(anti, vec![vec![Value::Integer(1)], vec![Value::Integer(3)]]);
    }

    #[test]
    fn test_fan_out_spans_chunks() {
        let right: Vec<Vec<Value>> = (0..600).map(|i| named(1, &i.to_string())).collect();
        let rows = join(&[1, 1], &right, JoinType::Inner);
        assert_eq!(rows.len(), 1200);
    }

    #[test]
    fn test_incompatible_keys_rejected() {
        let right = scan_of(&[LogicalType::Varchar], &[vec![Value::Varchar("x".to_string())]]);
        assert!(HashJoin::new(int_scan(&[1]), right, vec![JoinCondition::new(0, 0)], JoinType::Inner).is_err());
    }
}
