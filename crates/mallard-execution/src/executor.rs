//! Query executor
//!
//! Decomposes a physical plan into a DAG of pipelines, runs the pipelines to
//! completion on the task scheduler and then exposes the plan root as a pull
//! stream of result chunks.

use crate::context::{ClientContext, ExecutionContext, TaskContext};
use crate::operator::{operator_id, OperatorState, PhysicalOperator, PhysicalOperatorType};
use crate::operators::{DelimJoin, Execute, RecursiveCte};
use crate::pipeline::Pipeline;
use crate::scheduler::ProducerToken;
use hashbrown::HashMap;
use mallard_common::{DataChunk, Error, LogicalType, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executor state shared with the pipelines and their tasks
pub(crate) struct ExecutorShared {
    pub(crate) client: Arc<ClientContext>,
    pub(crate) producer: ProducerToken,
    completed_pipelines: AtomicUsize,
    exceptions: Mutex<Vec<String>>,
}

impl ExecutorShared {
    fn new(client: Arc<ClientContext>, producer: ProducerToken) -> Self {
        ExecutorShared {
            client,
            producer,
            completed_pipelines: AtomicUsize::new(0),
            exceptions: Mutex::new(Vec::new()),
        }
    }

    /// Records a task failure and interrupts every other running task
    pub(crate) fn push_error(&self, error: Error) {
        warn!(error = %error, "pipeline task failed");
        self.client.interrupt();
        self.exceptions.lock().push(error.to_string());
    }

    pub(crate) fn has_errors(&self) -> bool {
        !self.exceptions.lock().is_empty()
    }

    pub(crate) fn first_error(&self) -> Option<String> {
        self.exceptions.lock().first().cloned()
    }

    pub(crate) fn complete_pipeline(&self) {
        self.completed_pipelines.fetch_add(1, Ordering::AcqRel);
    }

    fn completed_pipelines(&self) -> usize {
        self.completed_pipelines.load(Ordering::Acquire)
    }
}

/// Pipelines of one plan plus the cross references found while building them
#[derive(Default)]
pub struct PipelineGraph {
    /// Pipelines run once per query
    pub pipelines: Vec<Arc<Pipeline>>,
    /// Delim scan identity to the pipeline materializing its input
    pub delim_dependencies: HashMap<usize, Arc<Pipeline>>,
    /// Recursive CTE operators with the pipelines each iteration re-runs,
    /// ordered so that dependencies come first
    pub recursive: Vec<(Arc<dyn PhysicalOperator>, Vec<Arc<Pipeline>>)>,
}

struct PipelineBuilder<'a> {
    executor: &'a Arc<ExecutorShared>,
    graph: PipelineGraph,
}

impl<'a> PipelineBuilder<'a> {
    fn new(executor: &'a Arc<ExecutorShared>) -> Self {
        PipelineBuilder {
            executor,
            graph: PipelineGraph::default(),
        }
    }

    fn build_graph(mut self, plan: &Arc<dyn PhysicalOperator>) -> Result<PipelineGraph> {
        let mut none = None;
        self.build(plan, None, &mut none)?;
        Ok(self.graph)
    }

    /// Visits `op`, registering every pipeline it spawns as a dependency of
    /// `parent`. Inside the recursive side of a CTE, `cte` collects the
    /// spawned pipelines instead of the graph.
    fn build(
        &mut self,
        op: &Arc<dyn PhysicalOperator>,
        parent: Option<&Arc<Pipeline>>,
        cte: &mut Option<(usize, Vec<Arc<Pipeline>>)>,
    ) -> Result<()> {
        if let Some(sink) = op.as_sink() {
            let sink_child = sink.sink_child();
            let child = op.children().get(sink_child).cloned().ok_or_else(|| {
                Error::Internal(format!("{} has no child to sink", op.kind()))
            })?;
            let state = sink.get_global_state(&self.executor.client)?;
            let pipeline = Arc::new(Pipeline::new(
                Arc::clone(self.executor),
                Arc::clone(op),
                Arc::clone(&child),
                state,
            ));
            if let Some(parent) = parent {
                parent.add_dependency(&pipeline);
            }

            if op.kind() == PhysicalOperatorType::DelimJoin {
                let delim = op
                    .as_any()
                    .downcast_ref::<DelimJoin>()
                    .ok_or_else(|| Error::Internal("DELIM_JOIN of unknown type".to_string()))?;
                for &scan in delim.delim_scans() {
                    self.graph
                        .delim_dependencies
                        .insert(scan, Arc::clone(&pipeline));
                }
                self.build(delim.join(), parent, cte)?;
            }
            // children that are not sunk stream into the parent pipeline
            for (idx, other) in op.children().iter().enumerate() {
                if idx != sink_child {
                    self.build(other, parent, cte)?;
                }
            }

            self.build(&child, Some(&pipeline), cte)?;
            match cte {
                Some((id, group)) => {
                    pipeline.set_recursive_cte(Some(*id));
                    group.push(pipeline);
                }
                None => self.graph.pipelines.push(pipeline),
            }
            return Ok(());
        }

        match op.kind() {
            PhysicalOperatorType::DelimScan => {
                let dependency = self
                    .graph
                    .delim_dependencies
                    .get(&operator_id(op.as_ref()))
                    .cloned()
                    .ok_or_else(|| {
                        Error::Internal("delim scan without a matching delim join".to_string())
                    })?;
                if let Some(parent) = parent {
                    parent.add_dependency(&dependency);
                }
                Ok(())
            }
            PhysicalOperatorType::Execute => {
                let execute = op
                    .as_any()
                    .downcast_ref::<Execute>()
                    .ok_or_else(|| Error::Internal("EXECUTE of unknown type".to_string()))?;
                self.build(execute.plan(), parent, cte)
            }
            PhysicalOperatorType::RecursiveCte => self.build_recursive_cte(op, parent, cte),
            PhysicalOperatorType::RecursiveCteScan => {
                if cte.is_none() {
                    return Err(Error::Internal(
                        "recursive CTE scan outside of a recursive CTE".to_string(),
                    ));
                }
                Ok(())
            }
            _ => {
                for child in op.children() {
                    self.build(child, parent, cte)?;
                }
                Ok(())
            }
        }
    }

    fn build_recursive_cte(
        &mut self,
        op: &Arc<dyn PhysicalOperator>,
        parent: Option<&Arc<Pipeline>>,
        cte: &mut Option<(usize, Vec<Arc<Pipeline>>)>,
    ) -> Result<()> {
        let [top, bottom] = op.children() else {
            return Err(Error::Internal(
                "recursive CTE needs exactly two children".to_string(),
            ));
        };
        self.build(top, parent, cte)?;
        if cte.is_some() {
            return Err(Error::NotImplemented(
                "recursive CTE nested within a recursive CTE".to_string(),
            ));
        }

        let mut inner = Some((operator_id(op.as_ref()), Vec::new()));
        self.build(bottom, parent, &mut inner)?;
        let group = inner.map(|(_, group)| group).unwrap_or_default();
        let group = order_by_dependencies(group);

        for pipeline in &group {
            // pipelines outside the recursion must be done before the CTE runs
            for dependency in pipeline.dependencies() {
                let inside = group.iter().any(|p| Arc::ptr_eq(p, &dependency));
                if !inside {
                    if let Some(parent) = parent {
                        parent.add_dependency(&dependency);
                    }
                }
            }
        }
        for pipeline in &group {
            pipeline.clear_parents();
        }
        debug!(pipelines = group.len(), "built recursive CTE pipelines");
        self.graph.recursive.push((Arc::clone(op), group));
        Ok(())
    }
}

/// Reorders `group` so that every pipeline comes after the pipelines of the
/// group it depends on
fn order_by_dependencies(mut group: Vec<Arc<Pipeline>>) -> Vec<Arc<Pipeline>> {
    let mut i = 0;
    while i < group.len() {
        let dependencies = group[i].dependencies();
        let later = (i + 1..group.len())
            .find(|&j| dependencies.iter().any(|d| Arc::ptr_eq(d, &group[j])));
        match later {
            Some(j) => group.swap(i, j),
            None => i += 1,
        }
    }
    group
}

/// Runs physical plans for one client
pub struct Executor {
    client: Arc<ClientContext>,
    shared: Option<Arc<ExecutorShared>>,
    plan: Option<Arc<dyn PhysicalOperator>>,
    root_state: Option<OperatorState>,
    context: ExecutionContext,
    graph: PipelineGraph,
}

impl Executor {
    pub fn new(client: Arc<ClientContext>) -> Self {
        let context = ExecutionContext::new(Arc::clone(&client), TaskContext::default());
        Executor {
            client,
            shared: None,
            plan: None,
            root_state: None,
            context,
            graph: PipelineGraph::default(),
        }
    }

    /// Builds the pipelines of `plan` and runs them all to completion.
    ///
    /// Fails with the first error raised by any task once every task
    /// drained.
    pub fn initialize(&mut self, plan: Arc<dyn PhysicalOperator>) -> Result<()> {
        self.reset();
        self.client.clear_interrupt();
        self.client.profiler.reset();

        let scheduler = &self.client.db.scheduler;
        let shared = Arc::new(ExecutorShared::new(
            Arc::clone(&self.client),
            scheduler.create_producer(),
        ));
        self.shared = Some(Arc::clone(&shared));
        let graph = PipelineBuilder::new(&shared).build_graph(&plan)?;
        for (op, pipelines) in &graph.recursive {
            let cte = op
                .as_any()
                .downcast_ref::<RecursiveCte>()
                .ok_or_else(|| Error::Internal("RECURSIVE_CTE of unknown type".to_string()))?;
            cte.set_pipelines(pipelines.clone());
        }
        self.graph = graph;

        let total = self.graph.pipelines.len();
        debug!(pipelines = total, "executing plan");
        for pipeline in &self.graph.pipelines {
            if !pipeline.has_dependencies() {
                pipeline.schedule();
            }
        }
        while shared.completed_pipelines() < total {
            if let Some(task) = scheduler.wait_for_task(&shared.producer) {
                task.execute();
            }
        }
        if let Some(error) = shared.first_error() {
            return Err(Error::Execution(error));
        }
        if self.client.is_interrupted() {
            return Err(Error::Interrupted);
        }

        self.root_state = Some(plan.get_operator_state()?);
        self.plan = Some(plan);
        Ok(())
    }

    /// Pulls the next result chunk; an empty chunk ends the result
    pub fn fetch_chunk(&mut self) -> Result<DataChunk> {
        let (Some(plan), Some(state)) = (&self.plan, &mut self.root_state) else {
            return Err(Error::Internal("executor has no initialized plan".to_string()));
        };
        let mut chunk = DataChunk::new(plan.types());
        let result = plan.get_chunk(&mut self.context, &mut chunk, state);
        self.context.flush_profiler();
        result?;
        Ok(chunk)
    }

    /// Result column types of the current plan
    pub fn types(&self) -> Vec<LogicalType> {
        self.plan
            .as_ref()
            .map(|plan| plan.types().to_vec())
            .unwrap_or_default()
    }

    /// Drops the pipelines and the state of the previous plan
    pub fn reset(&mut self) {
        for (op, _) in &self.graph.recursive {
            if let Some(cte) = op.as_any().downcast_ref::<RecursiveCte>() {
                cte.clear_pipelines();
            }
        }
        self.graph = PipelineGraph::default();
        self.plan = None;
        self.root_state = None;
        self.shared = None;
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.graph.pipelines
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DatabaseInstance;
    use crate::expression::{ArithmeticOp, Expression};
    use crate::operator::{
        downcast_global, GlobalSinkState, LocalSinkState, SinkOperator, SinkStateSlot,
    };
    use crate::operators::{ChunkScan, HashJoin, JoinCondition, JoinType, Projection};
    use mallard_common::{ChunkCollection, Config, Value};
    use std::any::Any;

    /// Collects its input and notes whether the join it watches was
    /// finalized before each sink call
    struct RecordingSink {
        types: Vec<LogicalType>,
        children: Vec<Arc<dyn PhysicalOperator>>,
        watched: Arc<dyn PhysicalOperator>,
        slot: SinkStateSlot,
        panics: bool,
    }

    #[derive(Default)]
    struct Recording {
        rows: Mutex<Vec<Vec<Value>>>,
        build_ready: Mutex<Vec<bool>>,
    }

    impl PhysicalOperator for RecordingSink {
        fn kind(&self) -> PhysicalOperatorType {
            PhysicalOperatorType::SimpleAggregate
        }

        fn types(&self) -> &[LogicalType] {
            &self.types
        }

        fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
            &self.children
        }

        fn get_chunk_internal(
            &self,
            _context: &mut ExecutionContext,
            _chunk: &mut DataChunk,
            _state: &mut OperatorState,
        ) -> Result<()> {
            Ok(())
        }

        fn as_sink(&self) -> Option<&dyn SinkOperator> {
            Some(self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl SinkOperator for RecordingSink {
        fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
            Ok(Arc::new(Recording::default()))
        }

        fn sink(
            &self,
            _context: &mut ExecutionContext,
            gstate: &GlobalSinkState,
            _lstate: &mut LocalSinkState,
            input: &DataChunk,
        ) -> Result<()> {
            if self.panics {
                panic!("sink exploded on {} rows", input.size());
            }
            let recording = downcast_global::<Recording>(gstate)?;
            let ready = self
                .watched
                .as_sink()
                .map_or(false, |join| join.sink_state().is_ok());
            recording.build_ready.lock().push(ready);
            recording.rows.lock().extend(input.to_rows());
            Ok(())
        }

        fn sink_slot(&self) -> &SinkStateSlot {
            &self.slot
        }
    }

    fn client(threads: usize) -> Arc<ClientContext> {
        let config = Config::default()
            .with_threads(threads)
            .with_task_timeout(std::time::Duration::from_millis(5));
        ClientContext::new(DatabaseInstance::new(config).unwrap())
    }

    fn int_scan(values: &[i32]) -> Arc<dyn PhysicalOperator> {
        let rows: Vec<Vec<Value>> = values.iter().map(|&v| vec![Value::Integer(v)]).collect();
        let chunk = DataChunk::from_rows(&[LogicalType::Integer], &rows).unwrap();
        let mut collection = ChunkCollection::new();
        collection.append(&chunk).unwrap();
        Arc::new(ChunkScan::new(vec![LogicalType::Integer], collection))
    }

    #[test]
    fn test_probe_waits_for_build() {
        let join: Arc<dyn PhysicalOperator> = Arc::new(
            HashJoin::new(
                int_scan(&[1, 2, 3, 4]),
                int_scan(&[2, 4, 6]),
                vec![JoinCondition::new(0, 0)],
                JoinType::Inner,
            )
            .unwrap(),
        );
        let sink: Arc<dyn PhysicalOperator> = Arc::new(RecordingSink {
            types: vec![LogicalType::Integer, LogicalType::Integer],
            children: vec![Arc::clone(&join)],
            watched: Arc::clone(&join),
            slot: SinkStateSlot::default(),
            panics: false,
        });

        let client = client(2);
        let mut executor = Executor::new(client);
        executor.initialize(Arc::clone(&sink)).unwrap();

        let pipelines = executor.pipelines();
        assert_eq!(pipelines.len(), 2);
        let probe = pipelines
            .iter()
            .find(|p| p.sink().kind() == PhysicalOperatorType::SimpleAggregate)
            .unwrap();
        let build = pipelines
            .iter()
            .find(|p| p.sink().kind() == PhysicalOperatorType::HashJoin)
            .unwrap();
        assert!(probe.has_dependencies());
        assert!(!build.has_dependencies());
        assert_eq!(probe.times_scheduled(), 1);
        assert!(probe.is_finished() && build.is_finished());

        let state = sink.as_sink().unwrap().sink_state().unwrap();
        let recording = downcast_global::<Recording>(&state).unwrap();
        let ready = recording.build_ready.lock();
        assert!(!ready.is_empty());
        assert!(ready.iter().all(|&r| r));
        let mut rows = recording.rows.lock().clone();
        rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(2), Value::Integer(2)],
                vec![Value::Integer(4), Value::Integer(4)],
            ]
        );
    }

    #[test]
    fn test_task_error_is_reraised() {
        let overflow = Expression::arithmetic(
            ArithmeticOp::Multiply,
            Expression::column(0, LogicalType::Integer),
            Expression::constant(Value::Integer(i32::MAX)),
        );
        let projection: Arc<dyn PhysicalOperator> = Arc::new(Projection::new(
            int_scan(&[1, 2, 3]),
            vec![overflow],
        ));
        let sink: Arc<dyn PhysicalOperator> = Arc::new(RecordingSink {
            types: vec![LogicalType::Integer],
            children: vec![Arc::clone(&projection)],
            watched: Arc::clone(&projection),
            slot: SinkStateSlot::default(),
            panics: false,
        });

        let client = client(1);
        let mut executor = Executor::new(Arc::clone(&client));
        let error = executor.initialize(sink).unwrap_err();
        match error {
            Error::Execution(message) => assert!(message.contains("Overflow"), "{}", message),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(client.is_interrupted());
        assert!(executor.fetch_chunk().is_err());
    }

    #[test]
    fn test_task_panic_fails_query() {
        for threads in [1, 3] {
            let scan = int_scan(&[1, 2, 3]);
            let sink: Arc<dyn PhysicalOperator> = Arc::new(RecordingSink {
                types: vec![LogicalType::Integer],
                children: vec![Arc::clone(&scan)],
                watched: scan,
                slot: SinkStateSlot::default(),
                panics: true,
            });

            let client = client(threads);
            let mut executor = Executor::new(Arc::clone(&client));
            match executor.initialize(sink).unwrap_err() {
                Error::Execution(message) => {
                    assert!(message.contains("sink exploded on 3 rows"), "{}", message)
                }
                other => panic!("unexpected error {:?}", other),
            }
            assert!(client.is_interrupted());
            assert!(executor.pipelines().iter().all(|p| p.is_finished()));
        }
    }

    #[test]
    fn test_fetch_streams_root() {
        let client = client(1);
        let mut executor = Executor::new(client);
        executor.initialize(int_scan(&[7, 8, 9])).unwrap();
        assert!(executor.pipelines().is_empty());
        assert_eq!(executor.types(), vec![LogicalType::Integer]);

        let chunk = executor.fetch_chunk().unwrap();
        assert_eq!(chunk.size(), 3);
        assert_eq!(chunk.get_value(0, 2), Value::Integer(9));
        assert!(executor.fetch_chunk().unwrap().is_empty());
        assert!(executor.fetch_chunk().unwrap().is_empty());
    }
}
