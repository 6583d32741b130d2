//! Mallard - an embeddable analytical database engine
//!
//! Mallard executes physical plans over versioned columnar storage:
//! - Vectorized, pull-based operators
//! - Pipelines scheduled in parallel on a shared worker pool
//! - Numeric column segments with MVCC updates and zonemap filtering
//!
//! # Example
//!
//! ```rust
//! use mallard::execution::operators::TableScan;
//! use mallard::{Database, LogicalType, Value};
//! use std::sync::Arc;
//!
//! let db = Database::new().unwrap();
//! let table = db.create_table(vec![LogicalType::Integer]).unwrap();
//! let mut conn = db.connect();
//! conn.append(&table, &[vec![Value::Integer(1)], vec![Value::Integer(2)]]).unwrap();
//!
//! let scan = TableScan::new(table, vec![0], vec![]).unwrap();
//! let result = conn.query(Arc::new(scan)).unwrap();
//! assert_eq!(result.row_count(), 2);
//! ```

pub use mallard_common as common;
pub use mallard_execution as execution;
pub use mallard_storage as storage;
pub use mallard_transaction as transaction;

pub use mallard_common::{Config, DataChunk, Error, LogicalType, Result, RowId, Value};

use mallard_common::{ChunkCollection, Vector, STANDARD_VECTOR_SIZE};
use mallard_execution::{ClientContext, DatabaseInstance, Executor, PhysicalOperator};
use mallard_storage::DataTable;
use std::sync::Arc;
use tracing::debug;

/// An in-memory database; every connection shares its worker pool,
/// buffer manager and transaction manager
pub struct Database {
    instance: Arc<DatabaseInstance>,
}

impl Database {
    /// Create a database with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Database {
            instance: DatabaseInstance::new(config)?,
        })
    }

    pub fn instance(&self) -> &Arc<DatabaseInstance> {
        &self.instance
    }

    /// Open a new connection with its own transaction state
    pub fn connect(&self) -> Connection {
        Connection::new(Arc::clone(&self.instance))
    }

    /// Create an empty table backed by this database's buffer manager
    pub fn create_table(&self, types: Vec<LogicalType>) -> Result<Arc<DataTable>> {
        let table = DataTable::new(Arc::clone(&self.instance.buffer_manager), types)?;
        Ok(Arc::new(table))
    }
}

/// Interrupts the running query of a connection from another thread
#[derive(Clone)]
pub struct InterruptHandle {
    client: Arc<ClientContext>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.client.interrupt();
    }
}

/// A client session.
///
/// Without an explicit `begin`, every statement runs in its own transaction
/// that is committed on success and rolled back on failure.
pub struct Connection {
    client: Arc<ClientContext>,
    executor: Executor,
    explicit_transaction: bool,
}

impl Connection {
    fn new(instance: Arc<DatabaseInstance>) -> Self {
        let client = ClientContext::new(instance);
        Connection {
            executor: Executor::new(Arc::clone(&client)),
            client,
            explicit_transaction: false,
        }
    }

    pub fn client(&self) -> &Arc<ClientContext> {
        &self.client
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            client: Arc::clone(&self.client),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.explicit_transaction
    }

    /// Start an explicit transaction spanning the following statements
    pub fn begin(&mut self) -> Result<()> {
        if self.explicit_transaction {
            return Err(Error::TransactionAborted(
                "cannot start a transaction within a transaction".to_string(),
            ));
        }
        self.client.transaction();
        self.explicit_transaction = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.explicit_transaction {
            return Err(Error::TransactionAborted("no transaction is active".to_string()));
        }
        self.explicit_transaction = false;
        self.client.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.explicit_transaction {
            return Err(Error::TransactionAborted("no transaction is active".to_string()));
        }
        self.explicit_transaction = false;
        self.client.rollback()
    }

    /// Execute a physical plan and materialize its result
    pub fn query(&mut self, plan: Arc<dyn PhysicalOperator>) -> Result<QueryResult> {
        self.run(|conn| {
            conn.executor.initialize(plan)?;
            let types = conn.executor.types();
            let mut chunks = ChunkCollection::new();
            loop {
                let chunk = conn.executor.fetch_chunk()?;
                if chunk.is_empty() {
                    break;
                }
                chunks.append(&chunk)?;
            }
            conn.executor.reset();
            debug!(rows = chunks.count(), "query finished");
            Ok(QueryResult { types, chunks })
        })
    }

    /// Append rows to `table`
    pub fn append(&mut self, table: &DataTable, rows: &[Vec<Value>]) -> Result<()> {
        self.run(|_| {
            for part in rows.chunks(STANDARD_VECTOR_SIZE) {
                table.append(&DataChunk::from_rows(table.types(), part)?)?;
            }
            Ok(())
        })
    }

    /// Overwrite `row_ids` of column `column` in `table` with `values`
    pub fn update(
        &mut self,
        table: &DataTable,
        column: usize,
        row_ids: &[RowId],
        values: &[Value],
    ) -> Result<()> {
        if row_ids.len() != values.len() {
            return Err(Error::InvalidArguments(format!(
                "{} row ids for {} values",
                row_ids.len(),
                values.len()
            )));
        }
        let column_type = table.column(column)?.logical_type().clone();
        self.run(|conn| {
            let transaction = conn.client.transaction();
            for (ids, part) in row_ids
                .chunks(STANDARD_VECTOR_SIZE)
                .zip(values.chunks(STANDARD_VECTOR_SIZE))
            {
                let vector = Vector::from_values(column_type.clone(), part)?;
                table.update(&transaction, column, ids, &vector)?;
            }
            Ok(())
        })
    }

    /// Runs `statement` inside the active transaction, wrapping it in its
    /// own transaction when none was started explicitly
    fn run<T>(&mut self, statement: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = statement(self);
        if self.explicit_transaction {
            return result;
        }
        match result {
            Ok(value) => {
                self.client.commit()?;
                Ok(value)
            }
            Err(error) => {
                self.executor.reset();
                self.client.rollback()?;
                Err(error)
            }
        }
    }
}

/// Materialized result of a query
#[derive(Debug, Clone)]
pub struct QueryResult {
    types: Vec<LogicalType>,
    chunks: ChunkCollection,
}

impl QueryResult {
    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    pub fn row_count(&self) -> usize {
        self.chunks.count()
    }

    pub fn column_count(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[DataChunk] {
        self.chunks.chunks()
    }

    pub fn get_value(&self, column: usize, row: usize) -> Value {
        self.chunks.get_value(column, row)
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<Value> {
        if self.is_empty() || self.types.is_empty() {
            return None;
        }
        Some(self.get_value(0, 0))
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.chunks
            .chunks()
            .iter()
            .flat_map(|chunk| chunk.to_rows())
            .collect()
    }

    /// Format result as a table string, one header line of column types
    pub fn to_table_string(&self) -> String {
        if self.types.is_empty() {
            return String::new();
        }
        let header: Vec<String> = self.types.iter().map(|t| t.to_string()).collect();
        let rows: Vec<Vec<String>> = self
            .rows()
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
        for row in &rows {
            for (width, value) in widths.iter_mut().zip(row) {
                *width = (*width).max(value.len());
            }
        }

        let format_line = |cells: &[String]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, &width)| format!("{:width$}", cell, width = width))
                .collect();
            padded.join(" | ")
        };
        let mut output = format_line(&header);
        output.push('\n');
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        output.push_str(&separator.join("-+-"));
        output.push('\n');
        for row in &rows {
            output.push_str(&format_line(row));
            output.push('\n');
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mallard_execution::operators::{ChunkScan, TableScan};

    fn int_rows(values: &[i32]) -> Vec<Vec<Value>> {
        values.iter().map(|&v| vec![Value::Integer(v)]).collect()
    }

    #[test]
    fn test_query_collection() {
        let db = Database::with_config(Config::single_threaded()).unwrap();
        let mut conn = db.connect();
        let chunk = DataChunk::from_rows(&[LogicalType::Integer], &int_rows(&[3, 4])).unwrap();
        let mut collection = ChunkCollection::new();
        collection.append(&chunk).unwrap();
        let scan = ChunkScan::new(vec![LogicalType::Integer], collection);

        let result = conn.query(Arc::new(scan)).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.column_count(), 1);
        assert_eq!(result.scalar(), Some(Value::Integer(3)));
        assert_eq!(result.rows(), int_rows(&[3, 4]));
    }

    #[test]
    fn test_auto_commit() {
        let db = Database::with_config(Config::single_threaded()).unwrap();
        let table = db.create_table(vec![LogicalType::Integer]).unwrap();
        let mut conn = db.connect();
        conn.append(&table, &int_rows(&[1, 2, 3])).unwrap();
        conn.update(&table, 0, &[1], &[Value::Integer(20)]).unwrap();
        assert!(conn.client().active_transaction().is_none());
        assert_eq!(db.instance().transaction_manager.active_count(), 0);

        let mut other = db.connect();
        let scan = TableScan::new(Arc::clone(&table), vec![0], vec![]).unwrap();
        let result = other.query(Arc::new(scan)).unwrap();
        assert_eq!(result.rows(), int_rows(&[1, 20, 3]));
    }

    #[test]
    fn test_transaction_statements_checked() {
        let db = Database::with_config(Config::single_threaded()).unwrap();
        let mut conn = db.connect();
        assert!(conn.commit().is_err());
        assert!(conn.rollback().is_err());
        conn.begin().unwrap();
        assert!(conn.in_transaction());
        assert!(conn.begin().is_err());
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_update_length_mismatch() {
        let db = Database::with_config(Config::single_threaded()).unwrap();
        let table = db.create_table(vec![LogicalType::Integer]).unwrap();
        let mut conn = db.connect();
        conn.append(&table, &int_rows(&[1])).unwrap();
        assert!(matches!(
            conn.update(&table, 0, &[0], &[]),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_table_string() {
        let db = Database::with_config(Config::single_threaded()).unwrap();
        let mut conn = db.connect();
        let mut collection = ChunkCollection::new();
        collection
            .append(&DataChunk::from_rows(&[LogicalType::Integer], &int_rows(&[7])).unwrap())
            .unwrap();
        let result = conn
            .query(Arc::new(ChunkScan::new(vec![LogicalType::Integer], collection)))
            .unwrap();
        let rendered = result.to_table_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].trim(), "7");
    }
}
