//! Mallard Storage - Versioned columnar storage
//!
//! Columns are stored as lists of fixed-capacity segments, each owning one
//! block obtained from the `BufferManager`. Segments support appends,
//! in-place MVCC updates with undo chains, and filter pushdown.

pub mod block;
pub mod buffer_manager;
pub mod column_data;
pub mod data_table;
pub mod encode;
pub mod numeric_segment;
pub mod statistics;
pub mod table_filter;

pub use block::{Block, BlockId, MAXIMUM_BLOCK};
pub use buffer_manager::{BufferHandle, BufferManager};
pub use column_data::{ColumnData, ColumnScanState, PersistentSegment};
pub use data_table::{DataTable, ParallelScanState, TableScanState, PARALLEL_SCAN_VECTOR_COUNT};
pub use encode::NumericType;
pub use numeric_segment::{NumericSegment, SegmentState};
pub use statistics::SegmentStatistics;
pub use table_filter::TableFilter;
