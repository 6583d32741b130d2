//! Uniform row sample

use crate::context::{ClientContext, ExecutionContext};
use crate::operator::{
    downcast_global, GlobalSinkState, LocalSinkState, OperatorState, ParallelMode,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use mallard_common::{ChunkCollection, DataChunk, Error, LogicalType, Result, Value, STANDARD_VECTOR_SIZE};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::sync::{Arc, OnceLock};

struct Reservoir {
    rng: StdRng,
    rows: Vec<Vec<Value>>,
    seen: usize,
}

struct SampleGlobalState {
    reservoir: Mutex<Reservoir>,
    result: OnceLock<ChunkCollection>,
}

/// Keeps a uniform random sample of at most `sample_size` input rows
/// (reservoir sampling). A fixed seed makes a sequential run repeatable.
pub struct ReservoirSample {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
    sample_size: usize,
    seed: Option<u64>,
    slot: SinkStateSlot,
}

impl ReservoirSample {
    pub fn new(child: Arc<dyn PhysicalOperator>, sample_size: usize, seed: Option<u64>) -> Self {
        ReservoirSample {
            types: child.types().to_vec(),
            children: vec![child],
            sample_size,
            seed,
            slot: SinkStateSlot::default(),
        }
    }
}

impl PhysicalOperator for ReservoirSample {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::ReservoirSample
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
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
        let gstate = self.slot.get()?;
        let result = downcast_global::<SampleGlobalState>(&gstate)?
            .result
            .get()
            .ok_or_else(|| Error::Internal("sample read before it was finalized".to_string()))?;
        let next = state.local_mut::<usize>()?;
        if *next < result.chunk_count() {
            chunk.reference(result.chunk(*next));
            *next += 1;
        }
        Ok(())
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        format!("{} rows", self.sample_size)
    }
}

impl SinkOperator for ReservoirSample {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Arc::new(SampleGlobalState {
            reservoir: Mutex::new(Reservoir {
                rng,
                rows: Vec::with_capacity(self.sample_size.min(STANDARD_VECTOR_SIZE)),
                seen: 0,
            }),
            result: OnceLock::new(),
        }))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        _lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        let global = downcast_global::<SampleGlobalState>(gstate)?;
        let mut reservoir = global.reservoir.lock();
        for row in 0..input.size() {
            reservoir.seen += 1;
            if reservoir.rows.len() < self.sample_size {
                reservoir.rows.push(input.get_row(row));
                continue;
            }
            let seen = reservoir.seen;
            let slot = reservoir.rng.gen_range(0..seen);
            if slot < self.sample_size {
                reservoir.rows[slot] = input.get_row(row);
            }
        }
        Ok(())
    }

    fn finalize(&self, _client: &ClientContext, gstate: &GlobalSinkState) -> Result<()> {
        let global = downcast_global::<SampleGlobalState>(gstate)?;
        let rows = std::mem::take(&mut global.reservoir.lock().rows);
        let mut result = ChunkCollection::new();
        for part in rows.chunks(STANDARD_VECTOR_SIZE) {
            result.append(&DataChunk::from_rows(&self.types, part)?)?;
        }
        global
            .result
            .set(result)
            .map_err(|_| Error::Internal("sample finalized twice".to_string()))
    }

    fn parallel_mode(&self) -> ParallelMode {
        ParallelMode::Parallel
    }

    fn sink_slot(&self) -> &SinkStateSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::{run_plan, scan_of, test_client};

    fn numbers(n: i32) -> Arc<dyn PhysicalOperator> {
        let rows: Vec<Vec<Value>> = (0..n).map(|v| vec![Value::Integer(v)]).collect();
        scan_of(&[LogicalType::Integer], &rows)
    }

    #[test]
    fn test_sample_size_and_membership() {
        let sample = ReservoirSample::new(numbers(5000), 100, Some(42));
        let rows = run_plan(&test_client(2), Arc::new(sample)).unwrap();
        assert_eq!(rows.len(), 100);
        let mut values: Vec<i64> = rows.iter().map(|r| r[0].as_i64().unwrap()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 100);
        assert!(values.iter().all(|&v| (0..5000).contains(&v)));
    }

    #[test]
    fn test_small_input_is_kept_whole() {
        let sample = ReservoirSample::new(numbers(10), 100, None);
        let rows = run_plan(&test_client(1), Arc::new(sample)).unwrap();
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn test_seeded_sample_is_repeatable() {
        let run = || {
            let sample = ReservoirSample::new(numbers(2000), 10, Some(7));
            run_plan(&test_client(1), Arc::new(sample)).unwrap()
        };
        assert_eq!(run(), run());
    }
}
