//! ChunkCollection - an append-only, in-memory list of data chunks

use crate::chunk::DataChunk;
use crate::error::{Error, Result};
use crate::types::LogicalType;
use crate::value::Value;
use crate::STANDARD_VECTOR_SIZE;
use std::cmp::Ordering;

/// Sort direction of one sort column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Ascending,
    Descending,
}

/// Materialized rows stored as a list of chunks.
///
/// Every chunk except the last one is completely filled, so row `i` lives
/// in chunk `i / STANDARD_VECTOR_SIZE`.
#[derive(Debug, Clone, Default)]
pub struct ChunkCollection {
    chunks: Vec<DataChunk>,
    types: Vec<LogicalType>,
    count: usize,
}

impl ChunkCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    pub fn chunk(&self, idx: usize) -> &DataChunk {
        &self.chunks[idx]
    }

    pub fn chunks(&self) -> &[DataChunk] {
        &self.chunks
    }

    /// Appends the rows of `new_chunk`, first topping up the last chunk
    pub fn append(&mut self, new_chunk: &DataChunk) -> Result<()> {
        if new_chunk.size() == 0 {
            return Ok(());
        }
        if self.chunks.is_empty() {
            self.types = new_chunk.types();
        } else if self.types.len() != new_chunk.column_count() {
            return Err(Error::Internal(format!(
                "appending chunk with {} columns to collection with {} columns",
                new_chunk.column_count(),
                self.types.len()
            )));
        }

        let offset = match self.chunks.last_mut() {
            Some(last) => last.append(new_chunk)?,
            None => 0,
        };
        if offset < new_chunk.size() {
            let mut chunk = DataChunk::new(&self.types);
            chunk.copy_from(new_chunk, offset)?;
            self.chunks.push(chunk);
        }
        self.count += new_chunk.size();
        Ok(())
    }

    /// Appends every chunk of `other`
    pub fn merge(&mut self, other: &ChunkCollection) -> Result<()> {
        for chunk in &other.chunks {
            self.append(chunk)?;
        }
        Ok(())
    }

    pub fn get_value(&self, column: usize, index: usize) -> Value {
        self.chunks[index / STANDARD_VECTOR_SIZE].get_value(column, index % STANDARD_VECTOR_SIZE)
    }

    pub fn set_value(&mut self, column: usize, index: usize, value: &Value) -> Result<()> {
        self.chunks[index / STANDARD_VECTOR_SIZE].set_value(
            column,
            index % STANDARD_VECTOR_SIZE,
            value,
        )
    }

    pub fn get_row(&self, index: usize) -> Vec<Value> {
        self.chunks[index / STANDARD_VECTOR_SIZE].get_row(index % STANDARD_VECTOR_SIZE)
    }

    /// Removes all rows, keeping the types
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.count = 0;
    }

    /// Returns the row permutation that orders the collection by `columns`.
    ///
    /// NULLs sort before every other value in ascending order.
    pub fn sort(&self, columns: &[(usize, OrderType)]) -> Vec<usize> {
        let keys: Vec<Vec<Value>> = (0..self.count)
            .map(|row| columns.iter().map(|&(col, _)| self.get_value(col, row)).collect())
            .collect();
        let mut order: Vec<usize> = (0..self.count).collect();
        order.sort_by(|&a, &b| {
            for (i, &(_, order_type)) in columns.iter().enumerate() {
                let ord = keys[a][i].total_cmp(&keys[b][i]);
                let ord = match order_type {
                    OrderType::Ascending => ord,
                    OrderType::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        order
    }

    /// Fills `target` with up to one vector of rows taken from `order`
    /// starting at `start_offset`; returns the number of rows written
    pub fn materialize_sorted_chunk(
        &self,
        target: &mut DataChunk,
        order: &[usize],
        start_offset: usize,
    ) -> Result<usize> {
        target.reset();
        let count = order.len().saturating_sub(start_offset).min(STANDARD_VECTOR_SIZE);
        for i in 0..count {
            let row = order[start_offset + i];
            let chunk = &self.chunks[row / STANDARD_VECTOR_SIZE];
            for (target_vec, source_vec) in target.data.iter_mut().zip(&chunk.data) {
                target_vec.copy_from(source_vec, row % STANDARD_VECTOR_SIZE, i, 1)?;
            }
        }
        target.set_cardinality(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(range: std::ops::Range<i32>) -> DataChunk {
        let rows: Vec<Vec<Value>> = range.map(|v| vec![Value::Integer(v)]).collect();
        DataChunk::from_rows(&[LogicalType::Integer], &rows).unwrap()
    }

    #[test]
    fn test_append_tops_up_last_chunk() {
        let mut collection = ChunkCollection::new();
        collection.append(&chunk_of(0..1000)).unwrap();
        collection.append(&chunk_of(1000..1100)).unwrap();
        assert_eq!(collection.count(), 1100);
        assert_eq!(collection.chunk_count(), 2);
        assert_eq!(collection.chunk(0).size(), STANDARD_VECTOR_SIZE);
        assert_eq!(collection.chunk(1).size(), 1100 - STANDARD_VECTOR_SIZE);
        assert_eq!(collection.get_value(0, 1050), Value::Integer(1050));
    }

    #[test]
    fn test_empty_append_is_ignored() {
        let mut collection = ChunkCollection::new();
        collection.append(&DataChunk::new(&[LogicalType::Integer])).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.chunk_count(), 0);
    }

    #[test]
    fn test_sort_and_materialize() {
        let rows = vec![
            vec![Value::Integer(3)],
            vec![Value::Null],
            vec![Value::Integer(1)],
        ];
        let mut collection = ChunkCollection::new();
        collection
            .append(&DataChunk::from_rows(&[LogicalType::Integer], &rows).unwrap())
            .unwrap();

        let order = collection.sort(&[(0, OrderType::Descending)]);
        assert_eq!(order, vec![0, 2, 1]);

        let mut target = DataChunk::new(&[LogicalType::Integer]);
        let n = collection.materialize_sorted_chunk(&mut target, &order, 1).unwrap();
        assert_eq!(n, 2);
        assert_eq!(target.to_rows(), vec![vec![Value::Integer(1)], vec![Value::Null]]);
    }
}
