//! Scan of a stored table with pushed-down filters

use crate::context::ExecutionContext;
use crate::operator::{operator_id, OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{DataChunk, LogicalType, Result};
use mallard_storage::{DataTable, TableFilter, TableScanState};
use std::any::Any;
use std::sync::Arc;

/// Reads `column_ids` of the rows of a table visible to the running
/// transaction.
///
/// When the pipeline runs in parallel, every task finds the shared cursor
/// in its `TaskContext` and claims vector ranges from it until the table is
/// exhausted.
pub struct TableScan {
    table: Arc<DataTable>,
    column_ids: Vec<usize>,
    filters: Vec<TableFilter>,
    types: Vec<LogicalType>,
}

struct TableScanProgress {
    scan: TableScanState,
    has_range: bool,
}

impl TableScan {
    pub fn new(
        table: Arc<DataTable>,
        column_ids: Vec<usize>,
        filters: Vec<TableFilter>,
    ) -> Result<Self> {
        let types = column_ids
            .iter()
            .map(|&col| Ok(table.column(col)?.logical_type().clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(TableScan {
            table,
            column_ids,
            filters,
            types,
        })
    }

    pub fn table(&self) -> &Arc<DataTable> {
        &self.table
    }
}

impl PhysicalOperator for TableScan {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::TableScan
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        let scan = self
            .table
            .create_scan_state(&self.column_ids, &self.filters)?;
        Ok(OperatorState::new(None)?.with_local(TableScanProgress {
            scan,
            has_range: false,
        }))
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let transaction = context.client.transaction();
        let parallel = context.task.task_info.get(&operator_id(self)).cloned();
        let progress = state.local_mut::<TableScanProgress>()?;
        loop {
            if !progress.has_range || progress.scan.is_exhausted() {
                let assigned = match &parallel {
                    Some(parallel) => self.table.parallel_state_next(parallel, &mut progress.scan)?,
                    None if !progress.has_range => {
                        self.table
                            .initialize_scan_range(&mut progress.scan, 0, usize::MAX)?;
                        true
                    }
                    None => false,
                };
                if !assigned {
                    return Ok(());
                }
                progress.has_range = true;
            }
            self.table.scan(&transaction, &mut progress.scan, chunk)?;
            if !chunk.is_empty() {
                return Ok(());
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let columns: Vec<String> = self.column_ids.iter().map(|c| c.to_string()).collect();
        columns.join(", ")
    }
}
