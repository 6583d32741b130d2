//! DataChunk - A batch of vectors for processing

use crate::error::{Error, Result};
use crate::types::LogicalType;
use crate::value::Value;
use crate::vector::{SelectionVector, Vector};
use crate::STANDARD_VECTOR_SIZE;

/// A batch of column vectors sharing one cardinality.
///
/// A chunk with cardinality 0 returned from a pull signals end of stream.
#[derive(Debug, Clone, Default)]
pub struct DataChunk {
    /// The column vectors
    pub data: Vec<Vector>,
    /// Number of valid rows in this chunk (up to STANDARD_VECTOR_SIZE)
    count: usize,
}

impl DataChunk {
    /// Create a new data chunk with the given column types
    pub fn new(types: &[LogicalType]) -> Self {
        let mut chunk = DataChunk::default();
        chunk.initialize(types);
        chunk
    }

    /// Create an empty data chunk with no columns
    pub fn empty() -> Self {
        DataChunk::default()
    }

    /// Allocates one flat vector per type, dropping any previous columns
    pub fn initialize(&mut self, types: &[LogicalType]) {
        self.data = types.iter().map(|t| Vector::new(t.clone())).collect();
        self.count = 0;
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.data.len()
    }

    /// Get the number of rows
    pub fn size(&self) -> usize {
        self.count
    }

    /// Check if this chunk is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Set the row count without touching the vectors
    pub fn set_cardinality(&mut self, count: usize) {
        debug_assert!(count <= STANDARD_VECTOR_SIZE);
        self.count = count;
    }

    /// Get a reference to a column vector
    pub fn column(&self, idx: usize) -> &Vector {
        &self.data[idx]
    }

    /// Get a mutable reference to a column vector
    pub fn column_mut(&mut self, idx: usize) -> &mut Vector {
        &mut self.data[idx]
    }

    /// Reset this chunk for reuse: cardinality 0 and writable flat vectors
    pub fn reset(&mut self) {
        for vector in &mut self.data {
            vector.reinitialize();
        }
        self.count = 0;
    }

    /// Makes every column an alias of the matching column of `other`
    pub fn reference(&mut self, other: &DataChunk) {
        if self.data.len() != other.data.len() {
            self.data = other.data.clone();
        } else {
            for (target, source) in self.data.iter_mut().zip(&other.data) {
                target.reference(source);
            }
        }
        self.count = other.count;
    }

    /// Appends rows of `other` after the current rows, up to the chunk
    /// capacity; returns how many rows were copied
    pub fn append(&mut self, other: &DataChunk) -> Result<usize> {
        if other.count == 0 {
            return Ok(0);
        }
        if self.column_count() != other.column_count() {
            return Err(Error::Internal(format!(
                "cannot append chunk with {} columns to chunk with {} columns",
                other.column_count(),
                self.column_count()
            )));
        }
        let added = other.count.min(STANDARD_VECTOR_SIZE.saturating_sub(self.count));
        if added == 0 {
            return Ok(0);
        }
        for (target, source) in self.data.iter_mut().zip(&other.data) {
            target.copy_from(source, 0, self.count, added)?;
        }
        self.count += added;
        Ok(added)
    }

    /// Copies rows `offset..other.size()` of `other` into this chunk,
    /// replacing its contents
    pub fn copy_from(&mut self, other: &DataChunk, offset: usize) -> Result<()> {
        self.reset();
        let count = other.count.saturating_sub(offset);
        for (target, source) in self.data.iter_mut().zip(&other.data) {
            target.copy_from(source, offset, 0, count)?;
        }
        self.count = count;
        Ok(())
    }

    /// Restricts every column to the rows `sel[0..count]`
    pub fn slice(&mut self, sel: &SelectionVector, count: usize) {
        for vector in &mut self.data {
            vector.slice(sel, count);
        }
        self.count = count;
    }

    /// Makes all columns `count`-row flat vectors
    pub fn normalify(&mut self) {
        for vector in &mut self.data {
            vector.normalify(self.count);
        }
    }

    pub fn get_value(&self, column: usize, row: usize) -> Value {
        self.data[column].get_value(row)
    }

    pub fn set_value(&mut self, column: usize, row: usize, value: &Value) -> Result<()> {
        self.data[column].set_value(row, value)
    }

    /// Create a DataChunk from row-based data
    pub fn from_rows(types: &[LogicalType], rows: &[Vec<Value>]) -> Result<Self> {
        if rows.len() > STANDARD_VECTOR_SIZE {
            return Err(Error::InvalidArguments(format!(
                "a chunk holds at most {} rows, got {}",
                STANDARD_VECTOR_SIZE,
                rows.len()
            )));
        }
        let mut chunk = DataChunk::new(types);
        for (row_idx, row) in rows.iter().enumerate() {
            chunk.set_row(row_idx, row)?;
        }
        chunk.count = rows.len();
        Ok(chunk)
    }

    /// Convert to row-based representation
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.count).map(|row| self.get_row(row)).collect()
    }

    /// Get a single row
    pub fn get_row(&self, row_idx: usize) -> Vec<Value> {
        self.data.iter().map(|v| v.get_value(row_idx)).collect()
    }

    /// Set a single row
    pub fn set_row(&mut self, row_idx: usize, values: &[Value]) -> Result<()> {
        for (vector, value) in self.data.iter_mut().zip(values) {
            vector.set_value(row_idx, value)?;
        }
        Ok(())
    }

    /// Get types of all columns
    pub fn types(&self) -> Vec<LogicalType> {
        self.data.iter().map(|v| v.logical_type().clone()).collect()
    }
}
