//! Uncompressed storage segment for fixed-width columns
//!
//! A segment owns one block. The block is split into `max_vector_count`
//! vectors, each laid out as a null bitmap (`STANDARD_VECTOR_SIZE / 8`
//! bytes, bit set = NULL) followed by `STANDARD_VECTOR_SIZE` packed values.
//!
//! Updates happen in place. The previous values of the updated rows are kept
//! in the vector's `VersionChain`, so readers whose snapshot predates the
//! update overlay them onto the base data and a rollback can restore them.

use crate::block::BlockId;
use crate::buffer_manager::{BufferHandle, BufferManager};
use crate::column_data::ColumnScanState;
use crate::encode::NumericType;
use crate::statistics::SegmentStatistics;
use crate::table_filter::{FilterShape, TableFilter};
use mallard_common::vector::UnifiedVectorData;
use mallard_common::{
    Error, LogicalType, PhysicalType, Result, RowId, SelectionVector, Vector, STANDARD_VECTOR_SIZE,
};
use mallard_transaction::{
    Timestamp, Transaction, TransactionId, UpdateInfo, VersionChain, VersionedStorage,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Bytes of the null bitmap in front of every vector
pub const NULLMASK_SIZE: usize = STANDARD_VECTOR_SIZE / 8;

/// Fill state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Empty,
    Appending,
    Full,
}

/// Mutable segment state, guarded by the segment lock
struct SegmentData {
    tuple_count: usize,
    /// One chain per vector slot
    versions: Vec<VersionChain>,
    stats: SegmentStatistics,
}

impl SegmentData {
    fn has_versions(&self, vector_index: usize) -> bool {
        self.versions
            .get(vector_index)
            .map_or(false, |chain| !chain.is_empty())
    }

    fn vector_count(&self, vector_index: usize) -> usize {
        self.tuple_count
            .saturating_sub(vector_index * STANDARD_VECTOR_SIZE)
            .min(STANDARD_VECTOR_SIZE)
    }
}

pub struct NumericSegment {
    manager: Arc<BufferManager>,
    logical_type: LogicalType,
    physical_type: PhysicalType,
    /// First row id stored in this segment
    pub row_start: RowId,
    block_id: BlockId,
    type_size: usize,
    vector_size: usize,
    max_vector_count: usize,
    lock: RwLock<SegmentData>,
}

fn is_null_at(nullmask: &[u8], idx: usize) -> bool {
    (nullmask[idx / 8] >> (idx % 8)) & 1 == 1
}

fn set_null_at(nullmask: &mut [u8], idx: usize, is_null: bool) {
    if is_null {
        nullmask[idx / 8] |= 1 << (idx % 8);
    } else {
        nullmask[idx / 8] &= !(1 << (idx % 8));
    }
}

impl NumericSegment {
    /// Create a segment for `logical_type` starting at `row_start`.
    ///
    /// Without a block id a fresh zeroed block is allocated, so every null
    /// bit starts cleared. With one, the persisted block is registered and
    /// the row count has to be restored with [`NumericSegment::restore`].
    pub fn new(
        manager: Arc<BufferManager>,
        logical_type: LogicalType,
        row_start: RowId,
        block_id: Option<BlockId>,
    ) -> Result<Self> {
        let physical_type = logical_type.physical_type();
        let type_size = physical_type.fixed_width().ok_or_else(|| {
            Error::invalid_type(&logical_type, "numeric segments hold fixed-width types only")
        })?;
        let vector_size = NULLMASK_SIZE + type_size * STANDARD_VECTOR_SIZE;
        let max_vector_count = manager.block_size() / vector_size;
        if max_vector_count == 0 {
            return Err(Error::Config(format!(
                "block size {} cannot hold a single {} vector",
                manager.block_size(),
                logical_type
            )));
        }
        let stats = SegmentStatistics::new(physical_type)?;

        let block_id = match block_id {
            None => manager.register_memory(manager.block_size())?,
            Some(id) => manager.register_block(id)?,
        };

        Ok(NumericSegment {
            manager,
            logical_type,
            physical_type,
            row_start,
            block_id,
            type_size,
            vector_size,
            max_vector_count,
            lock: RwLock::new(SegmentData {
                tuple_count: 0,
                versions: vec![VersionChain::new(); max_vector_count],
                stats,
            }),
        })
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn tuple_count(&self) -> usize {
        self.lock.read().tuple_count
    }

    /// Number of rows that fit into the block
    pub fn max_tuple_count(&self) -> usize {
        self.max_vector_count * STANDARD_VECTOR_SIZE
    }

    pub fn max_vector_count(&self) -> usize {
        self.max_vector_count
    }

    pub fn is_full(&self) -> bool {
        self.tuple_count() >= self.max_tuple_count()
    }

    pub fn state(&self) -> SegmentState {
        match self.tuple_count() {
            0 => SegmentState::Empty,
            n if n >= self.max_tuple_count() => SegmentState::Full,
            _ => SegmentState::Appending,
        }
    }

    /// Snapshot of the segment statistics
    pub fn statistics(&self) -> SegmentStatistics {
        self.lock.read().stats.clone()
    }

    /// Number of rows stored in vector `vector_index`
    pub fn vector_count(&self, vector_index: usize) -> usize {
        self.lock.read().vector_count(vector_index)
    }

    /// Number of update nodes on vector `vector_index`
    pub fn chain_length(&self, vector_index: usize) -> usize {
        self.lock
            .read()
            .versions
            .get(vector_index)
            .map_or(0, |chain| chain.len())
    }

    /// Sets the row count of a segment loaded from a persisted block and
    /// recomputes its statistics from the block contents
    pub fn restore(&self, tuple_count: usize) -> Result<()> {
        if tuple_count > self.max_tuple_count() {
            return Err(Error::CorruptedBlock(format!(
                "block {} cannot hold {} rows",
                self.block_id, tuple_count
            )));
        }
        let mut data = self.lock.write();
        data.tuple_count = tuple_count;
        self.rebuild_statistics(&mut data)
    }

    /// Writes the block out and returns its persistent id
    pub fn checkpoint(&self) -> Result<BlockId> {
        let _data = self.lock.read();
        self.manager.write_block(self.block_id)
    }

    fn row_offset(&self, row_id: RowId) -> Result<usize> {
        row_id
            .checked_sub(self.row_start)
            .map(|offset| offset as usize)
            .ok_or_else(|| {
                Error::InvalidArguments(format!(
                    "row {} lies before segment start {}",
                    row_id, self.row_start
                ))
            })
    }

    fn check_type(&self, vector: &Vector) -> Result<()> {
        let got = vector.logical_type().physical_type();
        if got != self.physical_type {
            return Err(Error::TypeMismatch {
                expected: self.physical_type.to_string(),
                got: got.to_string(),
            });
        }
        Ok(())
    }

    /// Runs `f` on the bytes of vector `vector_index`, pinning the block
    /// unless the scan state already holds a pin
    fn with_vector<R>(
        &self,
        handle: Option<&BufferHandle>,
        vector_index: usize,
        f: impl FnOnce(&[u8]) -> Result<R>,
    ) -> Result<R> {
        let owned;
        let handle = match handle {
            Some(handle) => handle,
            None => {
                owned = self.manager.pin(self.block_id)?;
                &owned
            }
        };
        let block = handle.read();
        let start = vector_index * self.vector_size;
        f(&block.data[start..start + self.vector_size])
    }

    /// Appends `count` rows of `source` starting at `offset`.
    ///
    /// Returns the number of rows that fit; fewer than `count` means the
    /// segment is full.
    pub fn append(&self, source: &Vector, offset: usize, count: usize) -> Result<usize> {
        self.check_type(source)?;
        let mut guard = self.lock.write();
        let data = &mut *guard;
        let handle = self.manager.pin(self.block_id)?;
        let mut block = handle.write();
        let unified = source.orrify(offset + count);

        let mut appended = 0;
        while appended < count {
            let vector_index = data.tuple_count / STANDARD_VECTOR_SIZE;
            if vector_index == self.max_vector_count {
                break;
            }
            let current = data.tuple_count - vector_index * STANDARD_VECTOR_SIZE;
            let append_count = (STANDARD_VECTOR_SIZE - current).min(count - appended);
            let start = vector_index * self.vector_size;
            let vector = &mut block.data[start..start + self.vector_size];
            crate::dispatch_numeric!(self.physical_type, T => append_loop::<T>(
                vector,
                &mut data.stats,
                &unified,
                current,
                offset + appended,
                append_count,
            ))?;
            data.tuple_count += append_count;
            appended += append_count;
        }
        if data.tuple_count == self.max_tuple_count() {
            debug!(
                row_start = self.row_start,
                tuple_count = data.tuple_count,
                "segment full"
            );
        }
        Ok(appended)
    }

    /// Pins the block for the duration of a scan
    pub fn initialize_scan(&self, state: &mut ColumnScanState) -> Result<()> {
        state.handle = Some(self.manager.pin(self.block_id)?);
        Ok(())
    }

    /// Reads vector `vector_index` as `transaction` sees it
    pub fn scan(
        &self,
        state: &ColumnScanState,
        vector_index: usize,
        transaction: &Transaction,
        result: &mut Vector,
    ) -> Result<()> {
        let data = self.lock.read();
        self.fetch_base_locked(&data, state.handle.as_ref(), vector_index, result)?;
        self.fetch_updates_locked(&data, transaction, vector_index, result)
    }

    /// Copies the committed-or-not base values of a vector, ignoring versions
    pub fn fetch_base_data(
        &self,
        state: &ColumnScanState,
        vector_index: usize,
        result: &mut Vector,
    ) -> Result<()> {
        let data = self.lock.read();
        self.fetch_base_locked(&data, state.handle.as_ref(), vector_index, result)
    }

    /// Overlays the undo values `transaction` must see onto `result`
    pub fn fetch_update_data(
        &self,
        transaction: &Transaction,
        vector_index: usize,
        result: &mut Vector,
    ) -> Result<()> {
        let data = self.lock.read();
        self.fetch_updates_locked(&data, transaction, vector_index, result)
    }

    fn fetch_base_locked(
        &self,
        data: &SegmentData,
        handle: Option<&BufferHandle>,
        vector_index: usize,
        result: &mut Vector,
    ) -> Result<()> {
        self.check_type(result)?;
        result.reinitialize();
        let count = data.vector_count(vector_index);
        if count == 0 {
            return Ok(());
        }
        self.with_vector(handle, vector_index, |vector| {
            crate::dispatch_numeric!(self.physical_type, T => fetch_base::<T>(vector, count, result))
        })
    }

    fn fetch_updates_locked(
        &self,
        data: &SegmentData,
        transaction: &Transaction,
        vector_index: usize,
        result: &mut Vector,
    ) -> Result<()> {
        let Some(chain) = data.versions.get(vector_index) else {
            return Ok(());
        };
        chain.updates_for_transaction(transaction, |info| {
            crate::dispatch_numeric!(self.physical_type, T => apply_undo::<T>(info, result))
        })
    }

    /// Narrows `sel` to the rows of the current vector that pass `filters`
    /// as `transaction` sees them.
    ///
    /// Accepts one comparison or a lower/upper bound pair. Passing rows are
    /// written to `result` at their own position, so `result` has to be
    /// sliced with `sel` afterwards. NULL rows never pass.
    pub fn select(
        &self,
        state: &ColumnScanState,
        transaction: &Transaction,
        result: &mut Vector,
        sel: &mut SelectionVector,
        approved_tuple_count: &mut usize,
        filters: &[TableFilter],
    ) -> Result<()> {
        self.check_type(result)?;
        let shape = FilterShape::classify(filters)?;
        result.reinitialize();
        let data = self.lock.read();
        if data.has_versions(state.vector_index) {
            return self.select_versioned(
                &data,
                state,
                transaction,
                result,
                sel,
                approved_tuple_count,
                filters,
            );
        }
        self.with_vector(state.handle.as_ref(), state.vector_index, |vector| {
            crate::dispatch_numeric!(self.physical_type, T => {
                match shape {
                    FilterShape::Single(filter) => {
                        let constant = typed_constant::<T>(filter, &self.logical_type)?;
                        let comparison = filter.comparison;
                        select_loop::<T>(vector, result, sel, approved_tuple_count, |v| {
                            comparison.matches(v.total_cmp(&constant))
                        })
                    }
                    FilterShape::Between { lower, upper } => {
                        let low = typed_constant::<T>(lower, &self.logical_type)?;
                        let high = typed_constant::<T>(upper, &self.logical_type)?;
                        let (low_cmp, high_cmp) = (lower.comparison, upper.comparison);
                        select_loop::<T>(vector, result, sel, approved_tuple_count, |v| {
                            low_cmp.matches(v.total_cmp(&low))
                                && high_cmp.matches(v.total_cmp(&high))
                        })
                    }
                }
            })
        })
    }

    /// Gathers rows `sel[0..approved_tuple_count]` of the current vector
    /// into the first rows of `result`, as `transaction` sees them
    pub fn filter_fetch_base_data(
        &self,
        state: &ColumnScanState,
        transaction: &Transaction,
        result: &mut Vector,
        sel: &SelectionVector,
        approved_tuple_count: usize,
    ) -> Result<()> {
        self.check_type(result)?;
        result.reinitialize();
        let data = self.lock.read();
        if data.has_versions(state.vector_index) {
            let mut visible = Vector::with_capacity(self.logical_type.clone(), STANDARD_VECTOR_SIZE);
            self.fetch_base_locked(&data, state.handle.as_ref(), state.vector_index, &mut visible)?;
            self.fetch_updates_locked(&data, transaction, state.vector_index, &mut visible)?;
            for i in 0..approved_tuple_count {
                result.set_value(i, &visible.get_value(sel.get_index(i)))?;
            }
            return Ok(());
        }
        self.with_vector(state.handle.as_ref(), state.vector_index, |vector| {
            crate::dispatch_numeric!(self.physical_type, T => {
                filter_fetch::<T>(vector, sel, approved_tuple_count, result)
            })
        })
    }

    /// `select` over a vector with update nodes: materializes the rows
    /// `transaction` sees, then filters them value by value. Runs under the
    /// caller's read lock so no update can slip in between.
    #[allow(clippy::too_many_arguments)]
    fn select_versioned(
        &self,
        data: &SegmentData,
        state: &ColumnScanState,
        transaction: &Transaction,
        result: &mut Vector,
        sel: &mut SelectionVector,
        approved_tuple_count: &mut usize,
        filters: &[TableFilter],
    ) -> Result<()> {
        let filters = filters
            .iter()
            .map(|f| f.cast_to(&self.logical_type))
            .collect::<Result<Vec<_>>>()?;
        self.fetch_base_locked(data, state.handle.as_ref(), state.vector_index, result)?;
        self.fetch_updates_locked(data, transaction, state.vector_index, result)?;
        let mut new_sel = SelectionVector::new(*approved_tuple_count);
        let mut result_count = 0;
        for i in 0..*approved_tuple_count {
            let src = sel.get_index(i);
            let value = result.get_value(src);
            if filters.iter().all(|f| f.matches(&value)) {
                new_sel.set_index(result_count, src);
                result_count += 1;
            }
        }
        *sel = new_sel;
        *approved_tuple_count = result_count;
        Ok(())
    }

    /// Reads a single row as `transaction` sees it into `result[result_idx]`
    pub fn fetch_row(
        &self,
        transaction: &Transaction,
        row_id: RowId,
        result: &mut Vector,
        result_idx: usize,
    ) -> Result<()> {
        self.check_type(result)?;
        let offset = self.row_offset(row_id)?;
        let data = self.lock.read();
        if offset >= data.tuple_count {
            return Err(Error::InvalidArguments(format!(
                "row {} is not stored in this segment",
                row_id
            )));
        }
        let vector_index = offset / STANDARD_VECTOR_SIZE;
        let tuple = offset % STANDARD_VECTOR_SIZE;
        self.with_vector(None, vector_index, |vector| {
            crate::dispatch_numeric!(self.physical_type, T => {
                fetch_row_base::<T>(vector, tuple, result, result_idx)
            })
        })?;
        data.versions[vector_index].updates_for_transaction(transaction, |info| {
            crate::dispatch_numeric!(self.physical_type, T => {
                fetch_row_undo::<T>(info, tuple as u32, result, result_idx)
            })
        })
    }

    /// Overwrites rows `row_ids` with `update[0..row_ids.len()]` on behalf
    /// of `transaction`.
    ///
    /// All ids must fall into one vector and be strictly ascending. The
    /// first update of a transaction on a vector creates its `UpdateInfo`
    /// node and registers it with the transaction; later ones merge into it.
    pub fn update(
        self: &Arc<Self>,
        transaction: &Transaction,
        update: &Vector,
        row_ids: &[RowId],
    ) -> Result<()> {
        self.check_type(update)?;
        let Some(&first) = row_ids.first() else {
            return Ok(());
        };
        let vector_index = self.row_offset(first)? / STANDARD_VECTOR_SIZE;
        let vector_start = vector_index * STANDARD_VECTOR_SIZE;

        let mut tuples: Vec<u32> = Vec::with_capacity(row_ids.len());
        for &row_id in row_ids {
            let offset = self.row_offset(row_id)?;
            if offset < vector_start || offset >= vector_start + STANDARD_VECTOR_SIZE {
                return Err(Error::InvalidArguments(
                    "rows of one segment update must share a vector".to_string(),
                ));
            }
            let tuple = (offset - vector_start) as u32;
            if tuples.last().map_or(false, |&prev| tuple <= prev) {
                return Err(Error::InvalidArguments(
                    "update row ids must be sorted and unique".to_string(),
                ));
            }
            tuples.push(tuple);
        }

        let mut guard = self.lock.write();
        let data = &mut *guard;
        if tuples
            .last()
            .map_or(false, |&t| vector_start + t as usize >= data.tuple_count)
        {
            return Err(Error::InvalidArguments(format!(
                "update beyond the {} rows of the segment",
                data.tuple_count
            )));
        }
        let chain = &mut data.versions[vector_index];
        if let Some(tuple) = chain.conflicting_row(transaction, &tuples) {
            return Err(Error::WriteConflict(
                self.row_start + (vector_start + tuple as usize) as RowId,
            ));
        }

        let handle = self.manager.pin(self.block_id)?;
        let mut block = handle.write();
        let start = vector_index * self.vector_size;
        let vector = &mut block.data[start..start + self.vector_size];
        let source = update.orrify(row_ids.len());
        let stats = &mut data.stats;

        match chain.find_mut(transaction.transaction_id) {
            Some(info) => {
                crate::dispatch_numeric!(self.physical_type, T => {
                    merge_update_loop::<T>(vector, stats, info, &source, &tuples)
                })?;
            }
            None => {
                let mut info = UpdateInfo::new(transaction);
                crate::dispatch_numeric!(self.physical_type, T => {
                    update_loop::<T>(vector, stats, &mut info, &source, &tuples)
                })?;
                chain.push_front(info);
                transaction.register_update(Arc::clone(self) as Arc<dyn VersionedStorage>, vector_index);
            }
        }
        Ok(())
    }

    /// Recomputes min/max/has_null over the base data and every retained
    /// undo value, so the statistics cover every version a reader can see
    fn rebuild_statistics(&self, data: &mut SegmentData) -> Result<()> {
        let handle = self.manager.pin(self.block_id)?;
        let block = handle.read();
        let stats = crate::dispatch_numeric!(self.physical_type, T => {
            collect_statistics::<T>(
                self.physical_type,
                &block.data,
                self.vector_size,
                data.tuple_count,
                &data.versions,
            )
        })?;
        data.stats = stats;
        Ok(())
    }
}

impl VersionedStorage for NumericSegment {
    fn commit_update(
        &self,
        vector_index: usize,
        transaction_id: TransactionId,
        commit_id: Timestamp,
    ) -> Result<()> {
        let mut data = self.lock.write();
        let info = data
            .versions
            .get_mut(vector_index)
            .and_then(|chain| chain.find_mut(transaction_id))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "no update of transaction {} on vector {}",
                    transaction_id, vector_index
                ))
            })?;
        info.version_number = commit_id;
        Ok(())
    }

    fn rollback_update(&self, vector_index: usize, transaction_id: TransactionId) -> Result<()> {
        let mut guard = self.lock.write();
        let data = &mut *guard;
        let Some(info) = data
            .versions
            .get_mut(vector_index)
            .and_then(|chain| chain.remove(transaction_id))
        else {
            return Ok(());
        };

        {
            let handle = self.manager.pin(self.block_id)?;
            let mut block = handle.write();
            let start = vector_index * self.vector_size;
            let (nullmask, values) =
                block.data[start..start + self.vector_size].split_at_mut(NULLMASK_SIZE);
            let width = self.type_size;
            for (i, &tuple) in info.tuples.iter().enumerate() {
                let t = tuple as usize;
                values[t * width..(t + 1) * width].copy_from_slice(info.value_bytes(i, width));
                set_null_at(nullmask, t, info.nulls[i]);
            }
        }
        debug!(
            row_start = self.row_start,
            vector_index,
            transaction_id,
            rows = info.n(),
            "rolled back segment update"
        );
        self.rebuild_statistics(data)
    }

    fn cleanup_update(&self, vector_index: usize, transaction_id: TransactionId) -> Result<()> {
        let mut data = self.lock.write();
        if let Some(chain) = data.versions.get_mut(vector_index) {
            chain.remove(transaction_id);
        }
        Ok(())
    }
}

impl Drop for NumericSegment {
    fn drop(&mut self) {
        self.manager.unregister(self.block_id);
    }
}

fn typed_constant<T: NumericType>(filter: &TableFilter, logical_type: &LogicalType) -> Result<T> {
    let cast = filter.cast_to(logical_type)?;
    T::from_value(&cast.constant).ok_or_else(|| {
        Error::invalid_type(logical_type, format!("filter constant {}", cast.constant))
    })
}

fn append_loop<T: NumericType>(
    vector: &mut [u8],
    stats: &mut SegmentStatistics,
    source: &UnifiedVectorData<'_>,
    target_offset: usize,
    offset: usize,
    count: usize,
) -> Result<()> {
    let source_data = source.data::<T>()?;
    let (nullmask, data) = vector.split_at_mut(NULLMASK_SIZE);
    let mut range: Option<(T, T)> = None;
    for i in 0..count {
        let src = source.index(offset + i);
        let target = target_offset + i;
        if source.validity.is_valid(src) {
            let value = source_data[src];
            value.write_at(data, target);
            set_null_at(nullmask, target, false);
            range = Some(match range {
                None => (value, value),
                Some((min, max)) => (
                    if value.total_cmp(&min) == Ordering::Less { value } else { min },
                    if value.total_cmp(&max) == Ordering::Greater { value } else { max },
                ),
            });
        } else {
            T::default().write_at(data, target);
            set_null_at(nullmask, target, true);
            stats.has_null = true;
        }
    }
    if let Some((min, max)) = range {
        stats.update_range(min, max);
    }
    Ok(())
}

fn fetch_base<T: NumericType>(vector: &[u8], count: usize, result: &mut Vector) -> Result<()> {
    let (nullmask, data) = vector.split_at(NULLMASK_SIZE);
    let (result_data, validity) = result.data_mut::<T>()?;
    for i in 0..count {
        result_data[i] = T::read_at(data, i);
        if is_null_at(nullmask, i) {
            validity.set(i, false);
        }
    }
    Ok(())
}

fn apply_undo<T: NumericType>(info: &UpdateInfo, result: &mut Vector) -> Result<()> {
    let (result_data, validity) = result.data_mut::<T>()?;
    for (i, &tuple) in info.tuples.iter().enumerate() {
        let t = tuple as usize;
        result_data[t] = T::read_at(&info.tuple_data, i);
        validity.set(t, !info.nulls[i]);
    }
    Ok(())
}

fn fetch_row_base<T: NumericType>(
    vector: &[u8],
    tuple: usize,
    result: &mut Vector,
    result_idx: usize,
) -> Result<()> {
    let (nullmask, data) = vector.split_at(NULLMASK_SIZE);
    let (result_data, validity) = result.data_mut::<T>()?;
    result_data[result_idx] = T::read_at(data, tuple);
    validity.set(result_idx, !is_null_at(nullmask, tuple));
    Ok(())
}

fn fetch_row_undo<T: NumericType>(
    info: &UpdateInfo,
    tuple: u32,
    result: &mut Vector,
    result_idx: usize,
) -> Result<()> {
    if let Some(pos) = info.position_of(tuple) {
        let (result_data, validity) = result.data_mut::<T>()?;
        result_data[result_idx] = T::read_at(&info.tuple_data, pos);
        validity.set(result_idx, !info.nulls[pos]);
    }
    Ok(())
}

fn select_loop<T: NumericType>(
    vector: &[u8],
    result: &mut Vector,
    sel: &mut SelectionVector,
    approved_tuple_count: &mut usize,
    predicate: impl Fn(T) -> bool,
) -> Result<()> {
    let (nullmask, data) = vector.split_at(NULLMASK_SIZE);
    let (result_data, _) = result.data_mut::<T>()?;
    let mut new_sel = SelectionVector::new(*approved_tuple_count);
    let mut result_count = 0;
    for i in 0..*approved_tuple_count {
        let src = sel.get_index(i);
        if is_null_at(nullmask, src) {
            continue;
        }
        let value = T::read_at(data, src);
        if predicate(value) {
            result_data[src] = value;
            new_sel.set_index(result_count, src);
            result_count += 1;
        }
    }
    *sel = new_sel;
    *approved_tuple_count = result_count;
    Ok(())
}

fn filter_fetch<T: NumericType>(
    vector: &[u8],
    sel: &SelectionVector,
    approved_tuple_count: usize,
    result: &mut Vector,
) -> Result<()> {
    let (nullmask, data) = vector.split_at(NULLMASK_SIZE);
    let (result_data, validity) = result.data_mut::<T>()?;
    for i in 0..approved_tuple_count {
        let src = sel.get_index(i);
        result_data[i] = T::read_at(data, src);
        if is_null_at(nullmask, src) {
            validity.set(i, false);
        }
    }
    Ok(())
}

/// Writes update row `i` into base slot `tuple`
fn write_new_value<T: NumericType>(
    nullmask: &mut [u8],
    data: &mut [u8],
    stats: &mut SegmentStatistics,
    source: &UnifiedVectorData<'_>,
    source_data: &[T],
    i: usize,
    tuple: usize,
) {
    let src = source.index(i);
    if source.validity.is_valid(src) {
        let value = source_data[src];
        value.write_at(data, tuple);
        set_null_at(nullmask, tuple, false);
        stats.update(value);
    } else {
        set_null_at(nullmask, tuple, true);
        stats.has_null = true;
    }
}

/// Moves the base value of `tuple` into the undo buffers
fn save_base_value<T: NumericType>(
    nullmask: &[u8],
    data: &[u8],
    tuple: usize,
    undo_data: &mut Vec<u8>,
    undo_nulls: &mut Vec<bool>,
) {
    T::read_at(data, tuple).encode(undo_data);
    undo_nulls.push(is_null_at(nullmask, tuple));
}

fn update_loop<T: NumericType>(
    vector: &mut [u8],
    stats: &mut SegmentStatistics,
    info: &mut UpdateInfo,
    source: &UnifiedVectorData<'_>,
    tuples: &[u32],
) -> Result<()> {
    let source_data = source.data::<T>()?;
    let (nullmask, data) = vector.split_at_mut(NULLMASK_SIZE);
    info.tuples = tuples.to_vec();
    info.tuple_data = Vec::with_capacity(tuples.len() * T::WIDTH);
    info.nulls = Vec::with_capacity(tuples.len());
    for (i, &tuple) in tuples.iter().enumerate() {
        let t = tuple as usize;
        save_base_value::<T>(nullmask, data, t, &mut info.tuple_data, &mut info.nulls);
        write_new_value(nullmask, data, stats, source, source_data, i, t);
    }
    Ok(())
}

/// Folds a second update of the same transaction into its node.
///
/// Rows in both keep their oldest undo value, rows only in the new update
/// save the current base value, and rows only in the node are kept as is.
fn merge_update_loop<T: NumericType>(
    vector: &mut [u8],
    stats: &mut SegmentStatistics,
    info: &mut UpdateInfo,
    source: &UnifiedVectorData<'_>,
    tuples: &[u32],
) -> Result<()> {
    let source_data = source.data::<T>()?;
    let (nullmask, data) = vector.split_at_mut(NULLMASK_SIZE);
    let old_tuples = std::mem::take(&mut info.tuples);
    let old_data = std::mem::take(&mut info.tuple_data);
    let old_nulls = std::mem::take(&mut info.nulls);

    let capacity = tuples.len() + old_tuples.len();
    let mut merged = Vec::with_capacity(capacity);
    let mut merged_data = Vec::with_capacity(capacity * T::WIDTH);
    let mut merged_nulls = Vec::with_capacity(capacity);

    let (mut i, mut j) = (0, 0);
    loop {
        let order = match (tuples.get(i), old_tuples.get(j)) {
            (Some(new), Some(old)) => new.cmp(old),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                let t = tuples[i] as usize;
                merged.push(tuples[i]);
                merged_data.extend_from_slice(&old_data[j * T::WIDTH..(j + 1) * T::WIDTH]);
                merged_nulls.push(old_nulls[j]);
                write_new_value(nullmask, data, stats, source, source_data, i, t);
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                let t = tuples[i] as usize;
                merged.push(tuples[i]);
                save_base_value::<T>(nullmask, data, t, &mut merged_data, &mut merged_nulls);
                write_new_value(nullmask, data, stats, source, source_data, i, t);
                i += 1;
            }
            Ordering::Greater => {
                merged.push(old_tuples[j]);
                merged_data.extend_from_slice(&old_data[j * T::WIDTH..(j + 1) * T::WIDTH]);
                merged_nulls.push(old_nulls[j]);
                j += 1;
            }
        }
    }

    info.tuples = merged;
    info.tuple_data = merged_data;
    info.nulls = merged_nulls;
    Ok(())
}

fn collect_statistics<T: NumericType>(
    physical_type: PhysicalType,
    block: &[u8],
    vector_size: usize,
    tuple_count: usize,
    versions: &[VersionChain],
) -> Result<SegmentStatistics> {
    let mut stats = SegmentStatistics::new(physical_type)?;
    for (vector_index, chain) in versions.iter().enumerate() {
        let start = vector_index * vector_size;
        let (nullmask, data) = block[start..start + vector_size].split_at(NULLMASK_SIZE);
        let count = tuple_count
            .saturating_sub(vector_index * STANDARD_VECTOR_SIZE)
            .min(STANDARD_VECTOR_SIZE);
        for i in 0..count {
            if is_null_at(nullmask, i) {
                stats.has_null = true;
            } else {
                stats.update(T::read_at(data, i));
            }
        }
        for info in chain.iter() {
            for (i, &is_null) in info.nulls.iter().enumerate() {
                if is_null {
                    stats.has_null = true;
                } else {
                    stats.update(T::read_at(&info.tuple_data, i));
                }
            }
        }
    }
    Ok(stats)
}
