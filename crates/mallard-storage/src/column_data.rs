//! Column storage: an ordered list of segments holding one column

use crate::block::BlockId;
use crate::buffer_manager::{BufferHandle, BufferManager};
use crate::numeric_segment::NumericSegment;
use crate::table_filter::TableFilter;
use mallard_common::{
    Error, LogicalType, Result, RowId, SelectionVector, Vector, STANDARD_VECTOR_SIZE,
};
use mallard_transaction::Transaction;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Position of a scan within one column
#[derive(Default)]
pub struct ColumnScanState {
    pub(crate) segment: Option<Arc<NumericSegment>>,
    pub(crate) segment_index: usize,
    /// Vector within the current segment
    pub vector_index: usize,
    /// Pin of the current segment's block
    pub(crate) handle: Option<BufferHandle>,
}

/// Location of a persisted segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentSegment {
    pub block_id: BlockId,
    pub row_start: RowId,
    pub tuple_count: usize,
}

pub struct ColumnData {
    manager: Arc<BufferManager>,
    logical_type: LogicalType,
    segments: RwLock<Vec<Arc<NumericSegment>>>,
}

/// Index of the segment holding `row`, segments being sorted by start row
fn segment_index(segments: &[Arc<NumericSegment>], row: RowId) -> Option<usize> {
    let idx = segments.partition_point(|s| s.row_start <= row);
    if idx == 0 {
        return None;
    }
    let segment = &segments[idx - 1];
    (row < segment.row_start + segment.max_tuple_count() as RowId).then_some(idx - 1)
}

impl ColumnData {
    pub fn new(manager: Arc<BufferManager>, logical_type: LogicalType) -> Self {
        ColumnData {
            manager,
            logical_type,
            segments: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a column from persisted segments
    pub fn load(
        manager: Arc<BufferManager>,
        logical_type: LogicalType,
        persisted: &[PersistentSegment],
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(persisted.len());
        for info in persisted {
            let segment = NumericSegment::new(
                manager.clone(),
                logical_type.clone(),
                info.row_start,
                Some(info.block_id),
            )?;
            segment.restore(info.tuple_count)?;
            segments.push(Arc::new(segment));
        }
        Ok(ColumnData {
            manager,
            logical_type,
            segments: RwLock::new(segments),
        })
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn row_count(&self) -> usize {
        self.segments
            .read()
            .last()
            .map_or(0, |s| s.row_start as usize + s.tuple_count())
    }

    /// Appends the first `count` rows of `vector`, starting a new segment
    /// whenever the current one runs full
    pub fn append(&self, vector: &Vector, count: usize) -> Result<()> {
        let mut segments = self.segments.write();
        let mut offset = 0;
        while offset < count {
            let segment = match segments.last() {
                Some(last) if !last.is_full() => last.clone(),
                last => {
                    let row_start =
                        last.map_or(0, |s| s.row_start + s.tuple_count() as RowId);
                    let segment = Arc::new(NumericSegment::new(
                        self.manager.clone(),
                        self.logical_type.clone(),
                        row_start,
                        None,
                    )?);
                    debug!(
                        row_start,
                        segment = segments.len(),
                        column_type = %self.logical_type,
                        "new column segment"
                    );
                    segments.push(segment.clone());
                    segment
                }
            };
            offset += segment.append(vector, offset, count - offset)?;
        }
        Ok(())
    }

    /// Positions `state` at global vector `vector_index` and pins its block
    pub fn initialize_scan(&self, state: &mut ColumnScanState, vector_index: usize) -> Result<()> {
        let segments = self.segments.read();
        state.handle = None;
        state.segment = None;
        state.vector_index = 0;
        let row = (vector_index * STANDARD_VECTOR_SIZE) as RowId;
        match segment_index(&segments, row) {
            Some(idx) => {
                let segment = segments[idx].clone();
                state.segment_index = idx;
                state.vector_index = (row - segment.row_start) as usize / STANDARD_VECTOR_SIZE;
                segment.initialize_scan(state)?;
                state.segment = Some(segment);
            }
            None => state.segment_index = segments.len(),
        }
        Ok(())
    }

    /// Moves `state` to the next vector, crossing into the next segment
    pub fn next(&self, state: &mut ColumnScanState) -> Result<()> {
        let Some(max_vector_count) = state.segment.as_ref().map(|s| s.max_vector_count()) else {
            return Ok(());
        };
        state.vector_index += 1;
        if state.vector_index < max_vector_count {
            return Ok(());
        }
        state.segment_index += 1;
        state.vector_index = 0;
        state.handle = None;
        state.segment = self.segments.read().get(state.segment_index).cloned();
        if let Some(segment) = state.segment.clone() {
            segment.initialize_scan(state)?;
        }
        Ok(())
    }

    fn current(state: &ColumnScanState) -> Result<&Arc<NumericSegment>> {
        state
            .segment
            .as_ref()
            .ok_or_else(|| Error::Internal("column scan past the last segment".to_string()))
    }

    /// Reads the current vector as `transaction` sees it
    pub fn scan_vector(
        &self,
        transaction: &Transaction,
        state: &ColumnScanState,
        result: &mut Vector,
    ) -> Result<()> {
        Self::current(state)?.scan(state, state.vector_index, transaction, result)
    }

    /// Reads the current vector as `transaction` sees it and advances
    pub fn scan(
        &self,
        transaction: &Transaction,
        state: &mut ColumnScanState,
        result: &mut Vector,
    ) -> Result<()> {
        self.scan_vector(transaction, state, result)?;
        self.next(state)
    }

    /// Reads the base data of the current vector without advancing
    pub fn fetch_base_data(&self, state: &ColumnScanState, result: &mut Vector) -> Result<()> {
        Self::current(state)?.fetch_base_data(state, state.vector_index, result)
    }

    pub fn select(
        &self,
        state: &ColumnScanState,
        transaction: &Transaction,
        result: &mut Vector,
        sel: &mut SelectionVector,
        approved_tuple_count: &mut usize,
        filters: &[TableFilter],
    ) -> Result<()> {
        Self::current(state)?.select(state, transaction, result, sel, approved_tuple_count, filters)
    }

    pub fn filter_fetch_base_data(
        &self,
        state: &ColumnScanState,
        transaction: &Transaction,
        result: &mut Vector,
        sel: &SelectionVector,
        approved_tuple_count: usize,
    ) -> Result<()> {
        Self::current(state)?.filter_fetch_base_data(
            state,
            transaction,
            result,
            sel,
            approved_tuple_count,
        )
    }

    /// Whether the current segment's statistics admit rows passing `filters`
    pub fn check_zonemap(&self, state: &ColumnScanState, filters: &[TableFilter]) -> bool {
        state
            .segment
            .as_ref()
            .map_or(false, |s| s.statistics().check_zonemap(filters))
    }

    pub fn fetch_row(
        &self,
        transaction: &Transaction,
        row_id: RowId,
        result: &mut Vector,
        result_idx: usize,
    ) -> Result<()> {
        let segment = {
            let segments = self.segments.read();
            segment_index(&segments, row_id)
                .map(|idx| segments[idx].clone())
                .ok_or_else(|| Error::InvalidArguments(format!("row {} does not exist", row_id)))?
        };
        segment.fetch_row(transaction, row_id, result, result_idx)
    }

    /// Overwrites `row_ids` (any order, no duplicates) with the matching
    /// rows of `update`
    pub fn update(&self, transaction: &Transaction, update: &Vector, row_ids: &[RowId]) -> Result<()> {
        let got = update.logical_type().physical_type();
        if got != self.logical_type.physical_type() {
            return Err(Error::TypeMismatch {
                expected: self.logical_type.physical_type().to_string(),
                got: got.to_string(),
            });
        }
        let mut order: Vec<usize> = (0..row_ids.len()).collect();
        order.sort_by_key(|&i| row_ids[i]);
        if let Some(pair) = order.windows(2).find(|w| row_ids[w[0]] == row_ids[w[1]]) {
            return Err(Error::InvalidArguments(format!(
                "row {} is updated twice",
                row_ids[pair[0]]
            )));
        }

        let segments = self.segments.read().clone();
        let mut start = 0;
        while start < order.len() {
            let first = row_ids[order[start]];
            let segment = segment_index(&segments, first)
                .map(|idx| &segments[idx])
                .ok_or_else(|| Error::InvalidArguments(format!("row {} does not exist", first)))?;
            let vector_index = (first - segment.row_start) as usize / STANDARD_VECTOR_SIZE;
            let vector_end = segment.row_start + ((vector_index + 1) * STANDARD_VECTOR_SIZE) as RowId;
            let mut end = start;
            while end < order.len() && row_ids[order[end]] < vector_end {
                end += 1;
            }

            let mut values = Vector::new(self.logical_type.clone());
            let mut ids = Vec::with_capacity(end - start);
            for (k, &i) in order[start..end].iter().enumerate() {
                values.copy_from(update, i, k, 1)?;
                ids.push(row_ids[i]);
            }
            segment.update(transaction, &values, &ids)?;
            start = end;
        }
        Ok(())
    }

    /// Writes every segment's block and returns where they were stored
    pub fn checkpoint(&self) -> Result<Vec<PersistentSegment>> {
        self.segments
            .read()
            .iter()
            .map(|segment| {
                Ok(PersistentSegment {
                    block_id: segment.checkpoint()?,
                    row_start: segment.row_start,
                    tuple_count: segment.tuple_count(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric_segment::NULLMASK_SIZE;
    use mallard_common::Value;
    use mallard_transaction::TransactionManager;

    /// Two vectors of BIGINT per block
    const BLOCK: usize = 2 * (NULLMASK_SIZE + 8 * STANDARD_VECTOR_SIZE);

    fn bigints(range: std::ops::Range<i64>) -> Vector {
        let values: Vec<Value> = range.map(Value::BigInt).collect();
        Vector::from_values(LogicalType::BigInt, &values).unwrap()
    }

    fn column(rows: i64) -> ColumnData {
        let manager = Arc::new(BufferManager::new(BLOCK, None));
        let column = ColumnData::new(manager, LogicalType::BigInt);
        column.append(&bigints(0..rows), rows as usize).unwrap();
        column
    }

    #[test]
    fn test_append_creates_segments() {
        let column = column(5000);
        assert_eq!(column.row_count(), 5000);
        assert_eq!(column.segment_count(), 3);
    }

    #[test]
    fn test_scan_crosses_segments() {
        let column = column(5000);
        let tx = TransactionManager::new().begin();
        let mut state = ColumnScanState::default();
        column.initialize_scan(&mut state, 1).unwrap();

        let mut result = Vector::new(LogicalType::BigInt);
        column.scan(&tx, &mut state, &mut result).unwrap();
        assert_eq!(result.get_value(0), Value::BigInt(1024));
        assert_eq!(state.segment_index, 1);
        assert_eq!(state.vector_index, 0);

        column.scan(&tx, &mut state, &mut result).unwrap();
        assert_eq!(result.get_value(0), Value::BigInt(2048));
    }

    #[test]
    fn test_update_routes_unsorted_ids() {
        let column = column(5000);
        let transactions = TransactionManager::new();
        let tx = transactions.begin();
        let values = Vector::from_values(
            LogicalType::BigInt,
            &[Value::BigInt(-1), Value::BigInt(-2), Value::BigInt(-3)],
        )
        .unwrap();
        column.update(&tx, &values, &[4500, 3, 2100]).unwrap();
        // three different vectors
        assert_eq!(tx.undo_count(), 3);

        let mut result = Vector::new(LogicalType::BigInt);
        column.fetch_row(&tx, 3, &mut result, 0).unwrap();
        column.fetch_row(&tx, 2100, &mut result, 1).unwrap();
        column.fetch_row(&tx, 4500, &mut result, 2).unwrap();
        assert_eq!(
            result.to_values(3),
            vec![Value::BigInt(-2), Value::BigInt(-3), Value::BigInt(-1)]
        );

        transactions.rollback(&tx).unwrap();
        let reader = transactions.begin();
        column.fetch_row(&reader, 4500, &mut result, 0).unwrap();
        assert_eq!(result.get_value(0), Value::BigInt(4500));
    }

    #[test]
    fn test_update_rejects_duplicates() {
        let column = column(10);
        let tx = TransactionManager::new().begin();
        let values = bigints(0..2);
        assert!(matches!(
            column.update(&tx, &values, &[5, 5]),
            Err(Error::InvalidArguments(_))
        ));
        assert!(column.update(&tx, &values, &[5, 50]).is_err());
    }

    #[test]
    fn test_checkpoint_and_load() {
        let manager = Arc::new(BufferManager::new(BLOCK, None));
        let column = ColumnData::new(manager.clone(), LogicalType::BigInt);
        column.append(&bigints(0..3000), 3000).unwrap();
        let persisted = column.checkpoint().unwrap();
        assert_eq!(persisted.len(), 2);

        let loaded = ColumnData::load(manager, LogicalType::BigInt, &persisted).unwrap();
        assert_eq!(loaded.row_count(), 3000);
        let tx = TransactionManager::new().begin();
        let mut result = Vector::new(LogicalType::BigInt);
        loaded.fetch_row(&tx, 2999, &mut result, 0).unwrap();
        assert_eq!(result.get_value(0), Value::BigInt(2999));
    }
}
