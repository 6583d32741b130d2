//! Table storage: one `ColumnData` per column plus the scan machinery used
//! by table scans, including filter pushdown and parallel partitioning

use crate::buffer_manager::BufferManager;
use crate::column_data::{ColumnData, ColumnScanState, PersistentSegment};
use crate::table_filter::{FilterShape, TableFilter};
use mallard_common::{
    DataChunk, Error, LogicalType, Result, RowId, SelectionVector, Vector, STANDARD_VECTOR_SIZE,
};
use mallard_transaction::Transaction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Vectors handed to one parallel scan task at a time
pub const PARALLEL_SCAN_VECTOR_COUNT: usize = 4;

fn vector_count(rows: usize) -> usize {
    (rows + STANDARD_VECTOR_SIZE - 1) / STANDARD_VECTOR_SIZE
}

/// Cursor shared by the tasks of a parallel table scan
#[derive(Debug)]
pub struct ParallelScanState {
    next_vector: AtomicUsize,
    max_vector: usize,
    max_row: usize,
}

/// State of one scan over a vector range of a table
pub struct TableScanState {
    column_ids: Vec<usize>,
    /// Table columns read: the projection followed by filter-only columns
    needed: Vec<usize>,
    column_scans: Vec<ColumnScanState>,
    /// Filters per position in `needed`, constants cast to the column type
    filters: Vec<(usize, Vec<TableFilter>)>,
    /// Every filter group has a shape segment selects accept
    selectable: bool,
    /// Vectors of filter-only columns
    scratch: Vec<Vector>,
    vector_index: usize,
    max_vector: usize,
    max_row: usize,
}

impl TableScanState {
    pub fn column_ids(&self) -> &[usize] {
        &self.column_ids
    }

    /// Returns true once every vector of the range was read
    pub fn is_exhausted(&self) -> bool {
        self.vector_index >= self.max_vector
    }
}

pub struct DataTable {
    types: Vec<LogicalType>,
    columns: Vec<ColumnData>,
    row_count: AtomicUsize,
    append_lock: Mutex<()>,
}

impl DataTable {
    /// Creates an empty table; only fixed-width column types are stored
    pub fn new(manager: Arc<BufferManager>, types: Vec<LogicalType>) -> Result<Self> {
        for ty in &types {
            if ty.physical_type().fixed_width().is_none() {
                return Err(Error::invalid_type(ty, "table columns must have a fixed width"));
            }
        }
        let columns = types
            .iter()
            .map(|ty| ColumnData::new(manager.clone(), ty.clone()))
            .collect();
        Ok(DataTable {
            types,
            columns,
            row_count: AtomicUsize::new(0),
            append_lock: Mutex::new(()),
        })
    }

    /// Rebuilds a table from the output of [`DataTable::checkpoint`]
    pub fn load(
        manager: Arc<BufferManager>,
        types: Vec<LogicalType>,
        persisted: &[Vec<PersistentSegment>],
    ) -> Result<Self> {
        if persisted.len() != types.len() {
            return Err(Error::CorruptedBlock(format!(
                "{} persisted columns for {} column types",
                persisted.len(),
                types.len()
            )));
        }
        let columns = types
            .iter()
            .zip(persisted)
            .map(|(ty, segments)| ColumnData::load(manager.clone(), ty.clone(), segments))
            .collect::<Result<Vec<_>>>()?;
        let row_count = columns.first().map_or(0, |c| c.row_count());
        if columns.iter().any(|c| c.row_count() != row_count) {
            return Err(Error::CorruptedBlock(
                "persisted columns differ in length".to_string(),
            ));
        }
        Ok(DataTable {
            types,
            columns,
            row_count: AtomicUsize::new(row_count),
            append_lock: Mutex::new(()),
        })
    }

    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::Acquire)
    }

    pub fn column(&self, idx: usize) -> Result<&ColumnData> {
        self.columns.get(idx).ok_or_else(|| {
            Error::InvalidArguments(format!(
                "column {} out of range for a table of {} columns",
                idx,
                self.columns.len()
            ))
        })
    }

    /// Appends all rows of `chunk`
    pub fn append(&self, chunk: &DataChunk) -> Result<()> {
        if chunk.column_count() != self.columns.len() {
            return Err(Error::InvalidArguments(format!(
                "appending {} columns to a table of {} columns",
                chunk.column_count(),
                self.columns.len()
            )));
        }
        for (vector, ty) in chunk.data.iter().zip(&self.types) {
            let got = vector.logical_type().physical_type();
            if got != ty.physical_type() {
                return Err(Error::TypeMismatch {
                    expected: ty.physical_type().to_string(),
                    got: got.to_string(),
                });
            }
        }
        if chunk.is_empty() {
            return Ok(());
        }
        let _guard = self.append_lock.lock();
        for (column, vector) in self.columns.iter().zip(&chunk.data) {
            column.append(vector, chunk.size())?;
        }
        self.row_count.fetch_add(chunk.size(), Ordering::AcqRel);
        Ok(())
    }

    /// Builds a scan state reading `column_ids` of the rows visible now,
    /// keeping only rows that pass every filter. The state covers no
    /// vectors until a range is assigned.
    pub fn create_scan_state(
        &self,
        column_ids: &[usize],
        filters: &[TableFilter],
    ) -> Result<TableScanState> {
        for &col in column_ids {
            self.column(col)?;
        }
        let mut needed = column_ids.to_vec();
        let mut scratch = Vec::new();
        let mut grouped: Vec<(usize, Vec<TableFilter>)> = Vec::new();
        for filter in filters {
            let column = self.column(filter.column_index)?;
            let cast = filter.cast_to(column.logical_type())?;
            let pos = match needed.iter().position(|&c| c == filter.column_index) {
                Some(pos) => pos,
                None => {
                    needed.push(filter.column_index);
                    scratch.push(Vector::new(column.logical_type().clone()));
                    needed.len() - 1
                }
            };
            match grouped.iter_mut().find(|(p, _)| *p == pos) {
                Some((_, group)) => group.push(cast),
                None => grouped.push((pos, vec![cast])),
            }
        }
        let selectable = grouped
            .iter()
            .all(|(_, group)| FilterShape::classify(group).is_ok());
        let max_row = self.row_count();

        Ok(TableScanState {
            column_ids: column_ids.to_vec(),
            column_scans: needed.iter().map(|_| ColumnScanState::default()).collect(),
            needed,
            filters: grouped,
            selectable,
            scratch,
            vector_index: 0,
            max_vector: 0,
            max_row,
        })
    }

    /// Creates a scan state covering the whole table
    pub fn initialize_scan(
        &self,
        column_ids: &[usize],
        filters: &[TableFilter],
    ) -> Result<TableScanState> {
        let mut state = self.create_scan_state(column_ids, filters)?;
        let max_vector = vector_count(state.max_row);
        self.initialize_scan_range(&mut state, 0, max_vector)?;
        Ok(state)
    }

    /// Restricts `state` to vectors `start_vector..end_vector`
    pub fn initialize_scan_range(
        &self,
        state: &mut TableScanState,
        start_vector: usize,
        end_vector: usize,
    ) -> Result<()> {
        let end_vector = end_vector.min(vector_count(state.max_row));
        for (pos, &col) in state.needed.iter().enumerate() {
            self.columns[col].initialize_scan(&mut state.column_scans[pos], start_vector)?;
        }
        state.vector_index = start_vector;
        state.max_vector = end_vector;
        Ok(())
    }

    /// Fills `result` (initialized with the projected types) with the next
    /// non-empty batch; an empty `result` means the range is exhausted
    pub fn scan(
        &self,
        transaction: &Transaction,
        state: &mut TableScanState,
        result: &mut DataChunk,
    ) -> Result<()> {
        result.reset();
        while state.vector_index < state.max_vector {
            let count = (state.max_row - state.vector_index * STANDARD_VECTOR_SIZE)
                .min(STANDARD_VECTOR_SIZE);
            let approved = self.scan_vector(transaction, state, result, count)?;
            for (pos, &col) in state.needed.iter().enumerate() {
                self.columns[col].next(&mut state.column_scans[pos])?;
            }
            state.vector_index += 1;
            if approved > 0 {
                result.set_cardinality(approved);
                return Ok(());
            }
            result.reset();
        }
        Ok(())
    }

    /// Reads the current vector of every needed column and applies the
    /// filters; returns the number of surviving rows
    fn scan_vector(
        &self,
        transaction: &Transaction,
        state: &mut TableScanState,
        result: &mut DataChunk,
        count: usize,
    ) -> Result<usize> {
        let TableScanState {
            column_ids,
            needed,
            column_scans,
            filters,
            selectable,
            scratch,
            ..
        } = state;
        let projected = column_ids.len();

        if filters.is_empty() {
            for (pos, &col) in needed.iter().enumerate() {
                self.columns[col].scan_vector(transaction, &column_scans[pos], result.column_mut(pos))?;
            }
            return Ok(count);
        }

        for (pos, group) in filters.iter() {
            if !self.columns[needed[*pos]].check_zonemap(&column_scans[*pos], group) {
                return Ok(0);
            }
        }

        // segments check the update versions under the same lock they read
        // the values with
        if *selectable {
            let mut sel = SelectionVector::incremental(count);
            let mut approved = count;
            for (pos, group) in filters.iter() {
                let target = if *pos < projected {
                    result.column_mut(*pos)
                } else {
                    &mut scratch[*pos - projected]
                };
                self.columns[needed[*pos]].select(
                    &column_scans[*pos],
                    transaction,
                    target,
                    &mut sel,
                    &mut approved,
                    group,
                )?;
                if approved == 0 {
                    return Ok(0);
                }
            }
            for pos in 0..projected {
                let vector = result.column_mut(pos);
                if filters.iter().any(|(p, _)| *p == pos) {
                    vector.slice(&sel, approved);
                } else {
                    self.columns[needed[pos]].filter_fetch_base_data(
                        &column_scans[pos],
                        transaction,
                        vector,
                        &sel,
                        approved,
                    )?;
                }
            }
            return Ok(approved);
        }

        // filters segments cannot evaluate: read everything, then filter
        // row by row
        for (pos, &col) in needed.iter().enumerate() {
            let target = if pos < projected {
                result.column_mut(pos)
            } else {
                &mut scratch[pos - projected]
            };
            self.columns[col].scan_vector(transaction, &column_scans[pos], target)?;
        }
        let mut sel = SelectionVector::new(count);
        let mut approved = 0;
        for row in 0..count {
            let passes = filters.iter().all(|(pos, group)| {
                let vector = if *pos < projected {
                    result.column(*pos)
                } else {
                    &scratch[*pos - projected]
                };
                let value = vector.get_value(row);
                group.iter().all(|f| f.matches(&value))
            });
            if passes {
                sel.set_index(approved, row);
                approved += 1;
            }
        }
        if approved > 0 && approved < count {
            for pos in 0..projected {
                result.column_mut(pos).slice(&sel, approved);
            }
        }
        Ok(approved)
    }

    /// Cursor for a parallel scan over the rows visible now
    pub fn init_parallel_state(&self) -> ParallelScanState {
        let max_row = self.row_count();
        ParallelScanState {
            next_vector: AtomicUsize::new(0),
            max_vector: vector_count(max_row),
            max_row,
        }
    }

    /// Assigns the next `PARALLEL_SCAN_VECTOR_COUNT` vectors to `state`;
    /// returns false once the table is exhausted
    pub fn parallel_state_next(
        &self,
        parallel: &ParallelScanState,
        state: &mut TableScanState,
    ) -> Result<bool> {
        let start = parallel
            .next_vector
            .fetch_add(PARALLEL_SCAN_VECTOR_COUNT, Ordering::AcqRel);
        if start >= parallel.max_vector {
            return Ok(false);
        }
        state.max_row = parallel.max_row;
        self.initialize_scan_range(state, start, start + PARALLEL_SCAN_VECTOR_COUNT)?;
        Ok(true)
    }

    /// Number of tasks a parallel scan of the table can keep busy
    pub fn max_threads(&self) -> usize {
        let vectors = vector_count(self.row_count());
        ((vectors + PARALLEL_SCAN_VECTOR_COUNT - 1) / PARALLEL_SCAN_VECTOR_COUNT).max(1)
    }

    /// Reads `row_ids` of `column_ids` as `transaction` sees them
    pub fn fetch(
        &self,
        transaction: &Transaction,
        column_ids: &[usize],
        row_ids: &[RowId],
        result: &mut DataChunk,
    ) -> Result<()> {
        if row_ids.len() > STANDARD_VECTOR_SIZE {
            return Err(Error::InvalidArguments(format!(
                "cannot fetch {} rows into one chunk",
                row_ids.len()
            )));
        }
        result.reset();
        for (i, &col) in column_ids.iter().enumerate() {
            let column = self.column(col)?;
            for (row, &row_id) in row_ids.iter().enumerate() {
                column.fetch_row(transaction, row_id, result.column_mut(i), row)?;
            }
        }
        result.set_cardinality(row_ids.len());
        Ok(())
    }

    /// Overwrites `row_ids` of column `column` with `values`
    pub fn update(
        &self,
        transaction: &Transaction,
        column: usize,
        row_ids: &[RowId],
        values: &Vector,
    ) -> Result<()> {
        self.column(column)?.update(transaction, values, row_ids)
    }

    /// Writes every column and returns the persisted segment lists
    pub fn checkpoint(&self) -> Result<Vec<Vec<PersistentSegment>>> {
        let _guard = self.append_lock.lock();
        self.columns.iter().map(|c| c.checkpoint()).collect()
    }
}
