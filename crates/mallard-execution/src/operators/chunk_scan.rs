//! Scan over materialized chunks

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use mallard_common::{ChunkCollection, DataChunk, LogicalType, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

/// A collection written by one operator and scanned by another
pub type SharedCollection = Arc<RwLock<ChunkCollection>>;

/// Emits the chunks of a collection in order, aliasing instead of copying.
///
/// The same operator reads the materialized input of a delim join
/// (`DELIM_SCAN`) and the working table of a recursive CTE
/// (`RECURSIVE_CTE_SCAN`).
pub struct ChunkScan {
    kind: PhysicalOperatorType,
    types: Vec<LogicalType>,
    collection: SharedCollection,
}

impl ChunkScan {
    pub fn new(types: Vec<LogicalType>, collection: ChunkCollection) -> Self {
        Self::shared(types, Arc::new(RwLock::new(collection)))
    }

    pub fn shared(types: Vec<LogicalType>, collection: SharedCollection) -> Self {
        ChunkScan {
            kind: PhysicalOperatorType::ChunkScan,
            types,
            collection,
        }
    }

    /// Scan of the distinct join keys collected by a delim join
    pub fn delim_scan(types: Vec<LogicalType>, collection: SharedCollection) -> Self {
        ChunkScan {
            kind: PhysicalOperatorType::DelimScan,
            types,
            collection,
        }
    }

    /// Scan of the working table of a recursive CTE
    pub fn cte_scan(types: Vec<LogicalType>, collection: SharedCollection) -> Self {
        ChunkScan {
            kind: PhysicalOperatorType::RecursiveCteScan,
            types,
            collection,
        }
    }

    pub fn collection(&self) -> &SharedCollection {
        &self.collection
    }
}

impl PhysicalOperator for ChunkScan {
    fn kind(&self) -> PhysicalOperatorType {
        self.kind
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(None)?.with_local(0usize))
    }

    fn get_chunk_internal(
        &self,
        _context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let next = state.local_mut::<usize>()?;
        let collection = self.collection.read();
        if *next < collection.chunk_count() {
            chunk.reference(collection.chunk(*next));
            *next += 1;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        format!("{} rows", self.collection.read().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ClientContext, DatabaseInstance, TaskContext};
    use mallard_common::{Config, Value, STANDARD_VECTOR_SIZE};

    #[test]
    fn test_scan_emits_every_chunk_once() {
        let mut collection = ChunkCollection::new();
        let rows: Vec<Vec<Value>> = (0..1500).map(|v| vec![Value::Integer(v)]).collect();
        for part in rows.chunks(STANDARD_VECTOR_SIZE) {
            collection
                .append(&DataChunk::from_rows(&[LogicalType::Integer], part).unwrap())
                .unwrap();
        }
        let scan = ChunkScan::new(vec![LogicalType::Integer], collection);

        let client = ClientContext::new(DatabaseInstance::new(Config::single_threaded()).unwrap());
        let mut context = ExecutionContext::new(client, TaskContext::default());
        let mut state = scan.get_operator_state().unwrap();
        let mut chunk = DataChunk::new(scan.types());
        let mut sizes = Vec::new();
        loop {
            scan.get_chunk(&mut context, &mut chunk, &mut state).unwrap();
            if chunk.is_empty() {
                break;
            }
            sizes.push(chunk.size());
        }
        assert_eq!(sizes, vec![STANDARD_VECTOR_SIZE, 1500 - STANDARD_VECTOR_SIZE]);
        assert!(state.finished);
        scan.get_chunk(&mut context, &mut chunk, &mut state).unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_interrupted_scan_fails() {
        let scan = ChunkScan::new(vec![LogicalType::Integer], ChunkCollection::new());
        let client = ClientContext::new(DatabaseInstance::new(Config::single_threaded()).unwrap());
        client.interrupt();
        let mut context = ExecutionContext::new(client, TaskContext::default());
        let mut state = scan.get_operator_state().unwrap();
        let mut chunk = DataChunk::new(scan.types());
        assert!(matches!(
            scan.get_chunk(&mut context, &mut chunk, &mut state),
            Err(mallard_common::Error::Interrupted)
        ));
    }
}
