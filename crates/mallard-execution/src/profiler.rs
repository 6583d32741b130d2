//! Per-operator timing and cardinality counters

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorTiming {
    pub name: String,
    /// Wall time spent inside the operator, children included
    pub time: Duration,
    pub chunks: usize,
    pub elements: usize,
}

impl OperatorTiming {
    fn merge(&mut self, other: &OperatorTiming) {
        self.time += other.time;
        self.chunks += other.chunks;
        self.elements += other.elements;
    }
}

/// Counters of one thread, keyed by operator identity
#[derive(Debug, Default)]
pub struct OperatorProfiler {
    timings: HashMap<usize, OperatorTiming>,
}

impl OperatorProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one `get_chunk` call of operator `id`
    pub fn record(&mut self, id: usize, name: impl FnOnce() -> String, time: Duration, elements: usize) {
        let entry = self.timings.entry(id).or_insert_with(|| OperatorTiming {
            name: name(),
            ..Default::default()
        });
        entry.time += time;
        entry.chunks += 1;
        entry.elements += elements;
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }
}

/// Counters of a whole query, merged from the thread profilers
#[derive(Debug, Default)]
pub struct QueryProfiler {
    timings: Mutex<HashMap<usize, OperatorTiming>>,
}

impl QueryProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the counters of `profiler` into this profiler
    pub fn flush(&self, profiler: &mut OperatorProfiler) {
        if profiler.is_empty() {
            return;
        }
        let mut timings = self.timings.lock();
        for (id, timing) in profiler.timings.drain() {
            timings
                .entry(id)
                .and_modify(|t| t.merge(&timing))
                .or_insert(timing);
        }
    }

    pub fn reset(&self) {
        self.timings.lock().clear();
    }

    /// Counters of every operator that ran, sorted by name
    pub fn operator_timings(&self) -> Vec<OperatorTiming> {
        let mut result: Vec<OperatorTiming> = self.timings.lock().values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Counters of the operator with identity `id`
    pub fn timing_of(&self, id: usize) -> Option<OperatorTiming> {
        self.timings.lock().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_merges_threads() {
        let query = QueryProfiler::new();
        let mut a = OperatorProfiler::new();
        let mut b = OperatorProfiler::new();
        a.record(1, || "FILTER".to_string(), Duration::from_millis(2), 10);
        b.record(1, || "FILTER".to_string(), Duration::from_millis(3), 5);
        b.record(2, || "PROJECTION".to_string(), Duration::from_millis(1), 5);

        query.flush(&mut a);
        query.flush(&mut b);
        assert!(a.is_empty() && b.is_empty());

        let filter = query.timing_of(1).unwrap();
        assert_eq!(filter.chunks, 2);
        assert_eq!(filter.elements, 15);
        assert_eq!(filter.time, Duration::from_millis(5));
        assert_eq!(query.operator_timings().len(), 2);

        query.reset();
        assert!(query.operator_timings().is_empty());
    }
}
