//! Recursive common table expressions
//!
//! The non-recursive (top) side seeds the working table. Every iteration then
//! re-runs the pipelines inside the recursive (bottom) side against the
//! working table and streams the bottom output, which becomes the working
//! table of the next iteration. Recursion stops at the first iteration that
//! produces no new rows.

use crate::context::ExecutionContext;
use crate::operator::{OperatorState, PhysicalOperator, PhysicalOperatorType};
use crate::operators::SharedCollection;
use crate::pipeline::Pipeline;
use hashbrown::HashSet;
use mallard_common::{ChunkCollection, DataChunk, Error, LogicalType, Result, SelectionVector, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

pub struct RecursiveCte {
    children: Vec<Arc<dyn PhysicalOperator>>,
    types: Vec<LogicalType>,
    union_all: bool,
    /// Read by the RECURSIVE_CTE_SCAN operators of the bottom side
    working_table: SharedCollection,
    /// Pipelines of the bottom side, in dependency order
    pipelines: Mutex<Vec<Arc<Pipeline>>>,
}

struct CteProgress {
    top: OperatorState,
    bottom: Option<OperatorState>,
    /// Rows of the running iteration
    intermediate: ChunkCollection,
    recursing: bool,
    initialized: bool,
    /// Every row emitted so far, for UNION without ALL
    seen: HashSet<Vec<Value>>,
}

impl RecursiveCte {
    pub fn new(
        top: Arc<dyn PhysicalOperator>,
        bottom: Arc<dyn PhysicalOperator>,
        union_all: bool,
        working_table: SharedCollection,
    ) -> Result<Self> {
        if top.types().len() != bottom.types().len() {
            return Err(Error::InvalidArguments(format!(
                "recursive CTE over {} and {} columns",
                top.types().len(),
                bottom.types().len()
            )));
        }
        Ok(RecursiveCte {
            types: top.types().to_vec(),
            children: vec![top, bottom],
            union_all,
            working_table,
            pipelines: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_pipelines(&self, pipelines: Vec<Arc<Pipeline>>) {
        *self.pipelines.lock() = pipelines;
    }

    pub(crate) fn clear_pipelines(&self) {
        self.pipelines.lock().clear();
    }

    /// Drops the rows of `chunk` emitted before; keeps everything under
    /// UNION ALL
    fn deduplicate(&self, chunk: &mut DataChunk, seen: &mut HashSet<Vec<Value>>) {
        if self.union_all {
            return;
        }
        let fresh: Vec<u32> = (0..chunk.size())
            .filter(|&row| seen.insert(chunk.get_row(row)))
            .map(|row| row as u32)
            .collect();
        if fresh.len() == chunk.size() {
            return;
        }
        let count = fresh.len();
        chunk.slice(&SelectionVector::from_indices(fresh), count);
    }

    /// Runs the bottom side pipelines against the current working table and
    /// restarts the bottom stream
    fn start_iteration(&self, progress: &mut CteProgress) -> Result<()> {
        let pipelines = self.pipelines.lock().clone();
        trace!(
            rows = self.working_table.read().count(),
            pipelines = pipelines.len(),
            "recursive CTE iteration"
        );
        for pipeline in &pipelines {
            pipeline.run_to_completion()?;
        }
        progress.bottom = Some(self.children[1].get_operator_state()?);
        Ok(())
    }
}

impl PhysicalOperator for RecursiveCte {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::RecursiveCte
    }

    fn types(&self) -> &[LogicalType] {
        &self.types
    }

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.children
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        Ok(OperatorState::new(None)?.with_local(CteProgress {
            top: self.children[0].get_operator_state()?,
            bottom: None,
            intermediate: ChunkCollection::new(),
            recursing: false,
            initialized: false,
            seen: HashSet::new(),
        }))
    }

    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        let progress = state.local_mut::<CteProgress>()?;
        if !progress.initialized {
            self.working_table.write().reset();
            progress.initialized = true;
        }

        if !progress.recursing {
            loop {
                self.children[0].get_chunk(context, chunk, &mut progress.top)?;
                if chunk.is_empty() {
                    break;
                }
                self.deduplicate(chunk, &mut progress.seen);
                if chunk.is_empty() {
                    continue;
                }
                self.working_table.write().append(chunk)?;
                return Ok(());
            }
            progress.recursing = true;
            self.start_iteration(progress)?;
        }

        loop {
            let bottom = progress
                .bottom
                .as_mut()
                .ok_or_else(|| Error::Internal("recursive CTE without bottom state".to_string()))?;
            self.children[1].get_chunk(context, chunk, bottom)?;
            if chunk.is_empty() {
                if progress.intermediate.is_empty() {
                    return Ok(());
                }
                *self.working_table.write() = std::mem::take(&mut progress.intermediate);
                self.start_iteration(progress)?;
                continue;
            }
            // a chunk of already seen rows does not end the iteration
            self.deduplicate(chunk, &mut progress.seen);
            if chunk.is_empty() {
                continue;
            }
            progress.intermediate.append(chunk)?;
            return Ok(());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let union = if self.union_all { "UNION ALL" } else { "UNION" };
        union.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateExpression, AggregateFunction};
    use crate::executor::Executor;
    use crate::expression::{ArithmeticOp, Expression};
    use crate::operators::test_util::{int_scan, run_plan, sorted, test_client};
    use crate::operators::{ChunkScan, Filter, Projection, SimpleAggregate};
    use mallard_common::ComparisonType;
    use parking_lot::RwLock;

    fn x() -> Expression {
        Expression::column(0, LogicalType::Integer)
    }

    fn working_table() -> SharedCollection {
        Arc::new(RwLock::new(ChunkCollection::new()))
    }

    fn ints(values: &[i32]) -> Vec<Vec<Value>> {
        values.iter().map(|&v| vec![Value::Integer(v)]).collect()
    }

    /// `x + 1` over the working table while `x < limit`
    fn increment(working: &SharedCollection, limit: i32) -> Arc<dyn PhysicalOperator> {
        let scan = Arc::new(ChunkScan::cte_scan(vec![LogicalType::Integer], Arc::clone(working)));
        let filter = Filter::new(
            scan,
            Expression::comparison(ComparisonType::LessThan, x(), Expression::constant(limit)),
        );
        Arc::new(Projection::new(
            Arc::new(filter),
            vec![Expression::arithmetic(ArithmeticOp::Add, x(), Expression::constant(1))],
        ))
    }

    #[test]
    fn test_counts_to_limit() {
        let working = working_table();
        let cte = RecursiveCte::new(int_scan(&[1]), increment(&working, 5), true, working).unwrap();
        let rows = run_plan(&test_client(2), Arc::new(cte)).unwrap();
        assert_eq!(rows, ints(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_union_drops_seen_rows() {
        let working = working_table();
        let distinct = RecursiveCte::new(
            int_scan(&[1, 1, 2]),
            increment(&working, 3),
            false,
            working,
        )
        .unwrap();
        let rows = run_plan(&test_client(1), Arc::new(distinct)).unwrap();
        assert_eq!(rows, ints(&[1, 2, 3]));

        let working = working_table();
        let all = RecursiveCte::new(int_scan(&[1, 2]), increment(&working, 3), true, working).unwrap();
        let rows = run_plan(&test_client(1), Arc::new(all)).unwrap();
        assert_eq!(sorted(rows), ints(&[1, 2, 2, 3, 3]));
    }

    #[test]
    fn test_empty_seed_ends_immediately() {
        let working = working_table();
        let cte = RecursiveCte::new(int_scan(&[]), increment(&working, 10), true, working).unwrap();
        assert!(run_plan(&test_client(1), Arc::new(cte)).unwrap().is_empty());
    }

    #[test]
    fn test_sink_inside_recursion_reruns_each_iteration() {
        let working = working_table();
        let scan = Arc::new(ChunkScan::cte_scan(vec![LogicalType::Integer], Arc::clone(&working)));
        let max = Arc::new(SimpleAggregate::new(
            scan,
            vec![AggregateExpression::new(AggregateFunction::Max, x())],
        ));
        let next = Projection::new(
            max,
            vec![Expression::arithmetic(ArithmeticOp::Add, x(), Expression::constant(1))],
        );
        let bottom = Filter::new(
            Arc::new(next),
            Expression::comparison(ComparisonType::LessThanOrEqual, x(), Expression::constant(4)),
        );
        let cte = RecursiveCte::new(int_scan(&[1, 0]), Arc::new(bottom), true, working).unwrap();

        let mut executor = Executor::new(test_client(2));
        executor.initialize(Arc::new(cte)).unwrap();
        assert!(executor.pipelines().is_empty());
        assert_eq!(executor.graph().recursive.len(), 1);
        assert_eq!(executor.graph().recursive[0].1.len(), 1);

        let mut rows = Vec::new();
        loop {
            let chunk = executor.fetch_chunk().unwrap();
            if chunk.is_empty() {
                break;
            }
            rows.extend(chunk.to_rows());
        }
        assert_eq!(rows, ints(&[1, 0, 2, 3, 4]));
        let pipeline = &executor.graph().recursive[0].1[0];
        assert_eq!(pipeline.times_scheduled(), 4);
    }

    #[test]
    fn test_scan_outside_cte_rejected() {
        let working = working_table();
        let scan = Arc::new(ChunkScan::cte_scan(vec![LogicalType::Integer], working));
        let mut executor = Executor::new(test_client(1));
        assert!(matches!(executor.initialize(scan), Err(Error::Internal(_))));
    }
}
