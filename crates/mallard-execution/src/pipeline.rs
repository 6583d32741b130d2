//! Pipelines: one `source -> ... -> sink` chain, the unit of scheduling

use crate::context::{ExecutionContext, TaskContext};
use crate::executor::ExecutorShared;
use crate::operator::{operator_id, GlobalSinkState, ParallelMode, PhysicalOperator, PhysicalOperatorType};
use crate::operators::TableScan;
use crate::scheduler::Task;
use mallard_common::{DataChunk, Error, Result};
use mallard_storage::ParallelScanState;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::debug;

struct PipelineTask {
    pipeline: Arc<Pipeline>,
    task: TaskContext,
}

impl Task for PipelineTask {
    fn execute(self: Box<Self>) {
        let PipelineTask { pipeline, mut task } = *self;
        // a panicking operator fails the query instead of the worker, and
        // the task still counts as finished so the pipeline completes
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.execute(&mut task)));
        if let Err(payload) = outcome {
            pipeline.executor.push_error(Error::Internal(format!(
                "pipeline task panicked: {}",
                panic_message(payload.as_ref())
            )));
        }
        pipeline.finish_task();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown cause"
    }
}

pub struct Pipeline {
    executor: Arc<ExecutorShared>,
    sink: Arc<dyn PhysicalOperator>,
    /// Head of the operator chain feeding the sink
    child: Arc<dyn PhysicalOperator>,
    sink_state: RwLock<GlobalSinkState>,
    /// Parallel scan shared by the tasks, keyed by the scanning operator
    parallel: Mutex<Option<(usize, Arc<ParallelScanState>)>>,
    /// Pipelines waiting on this one
    parents: Mutex<Vec<Arc<Pipeline>>>,
    /// Pipelines this one waits on
    dependencies: Mutex<Vec<Weak<Pipeline>>>,
    finished_dependencies: AtomicUsize,
    finished_tasks: AtomicUsize,
    total_tasks: AtomicUsize,
    finished: AtomicBool,
    /// Recursive CTE whose iterations re-run this pipeline
    recursive_cte: Mutex<Option<usize>>,
    times_scheduled: AtomicUsize,
}

impl Pipeline {
    pub(crate) fn new(
        executor: Arc<ExecutorShared>,
        sink: Arc<dyn PhysicalOperator>,
        child: Arc<dyn PhysicalOperator>,
        sink_state: GlobalSinkState,
    ) -> Self {
        Pipeline {
            executor,
            sink,
            child,
            sink_state: RwLock::new(sink_state),
            parallel: Mutex::new(None),
            parents: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
            finished_dependencies: AtomicUsize::new(0),
            finished_tasks: AtomicUsize::new(0),
            total_tasks: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            recursive_cte: Mutex::new(None),
            times_scheduled: AtomicUsize::new(0),
        }
    }

    pub fn sink(&self) -> &Arc<dyn PhysicalOperator> {
        &self.sink
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// How often the pipeline was handed to the scheduler
    pub fn times_scheduled(&self) -> usize {
        self.times_scheduled.load(Ordering::Acquire)
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks.load(Ordering::Acquire)
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.lock().is_empty()
    }

    pub fn dependencies(&self) -> Vec<Arc<Pipeline>> {
        self.dependencies
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Makes this pipeline wait until `dependency` finished
    pub(crate) fn add_dependency(self: &Arc<Self>, dependency: &Arc<Pipeline>) {
        let mut dependencies = self.dependencies.lock();
        if dependencies
            .iter()
            .any(|d| std::ptr::eq(d.as_ptr(), Arc::as_ptr(dependency)))
        {
            return;
        }
        dependencies.push(Arc::downgrade(dependency));
        dependency.parents.lock().push(Arc::clone(self));
    }

    /// Unlinks this pipeline from its parents and dependencies
    pub(crate) fn clear_parents(self: &Arc<Self>) {
        let parents = std::mem::take(&mut *self.parents.lock());
        for parent in parents {
            parent
                .dependencies
                .lock()
                .retain(|d| !std::ptr::eq(d.as_ptr(), Arc::as_ptr(self)));
        }
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dependency in dependencies.iter().filter_map(Weak::upgrade) {
            dependency
                .parents
                .lock()
                .retain(|p| !Arc::ptr_eq(p, self));
        }
    }

    pub(crate) fn recursive_cte(&self) -> Option<usize> {
        *self.recursive_cte.lock()
    }

    pub(crate) fn set_recursive_cte(&self, cte: Option<usize>) {
        *self.recursive_cte.lock() = cte;
    }

    /// Prepares the pipeline to run again with a fresh sink state
    pub fn reset(&self) -> Result<()> {
        let sink = self.sink.as_sink().ok_or_else(|| self.not_a_sink())?;
        *self.sink_state.write() = sink.get_global_state(&self.executor.client)?;
        *self.parallel.lock() = None;
        self.finished_tasks.store(0, Ordering::Release);
        self.total_tasks.store(0, Ordering::Release);
        self.finished.store(false, Ordering::Release);
        Ok(())
    }

    /// Hands the pipeline to the scheduler, split into parallel tasks when
    /// both the sink and the source allow it
    pub fn schedule(self: &Arc<Self>) {
        self.times_scheduled.fetch_add(1, Ordering::AcqRel);
        let parallel_sink = self
            .sink
            .as_sink()
            .map_or(false, |s| s.parallel_mode() == ParallelMode::Parallel);
        if parallel_sink && self.schedule_operator(&self.child) {
            return;
        }
        self.schedule_sequential_task();
    }

    fn schedule_sequential_task(self: &Arc<Self>) {
        debug!(pipeline = %self, "scheduling sequential pipeline");
        self.total_tasks.store(1, Ordering::Release);
        self.push_task();
    }

    fn push_task(self: &Arc<Self>) {
        let task = PipelineTask {
            pipeline: Arc::clone(self),
            task: TaskContext::default(),
        };
        self.executor
            .client
            .db
            .scheduler
            .schedule_task(&self.executor.producer, Box::new(task));
    }

    /// Walks down the streaming operators to a parallel scan; returns true
    /// once the parallel tasks were scheduled
    fn schedule_operator(self: &Arc<Self>, op: &Arc<dyn PhysicalOperator>) -> bool {
        match op.kind() {
            PhysicalOperatorType::Filter
            | PhysicalOperatorType::Projection
            | PhysicalOperatorType::HashJoin
            | PhysicalOperatorType::CrossProduct => op
                .children()
                .first()
                .map_or(false, |child| self.schedule_operator(child)),
            PhysicalOperatorType::TableScan => {
                let Some(scan) = op.as_any().downcast_ref::<TableScan>() else {
                    return false;
                };
                let max_threads = scan
                    .table()
                    .max_threads()
                    .min(self.executor.client.db.number_of_threads());
                if max_threads <= 1 {
                    return false;
                }
                let state = Arc::new(scan.table().init_parallel_state());
                *self.parallel.lock() = Some((operator_id(op.as_ref()), state));
                self.total_tasks.store(max_threads, Ordering::Release);
                debug!(pipeline = %self, tasks = max_threads, "scheduling parallel pipeline");
                for _ in 0..max_threads {
                    self.push_task();
                }
                true
            }
            _ => false,
        }
    }

    /// Runs one task: pulls the chain until it is exhausted, sinking every
    /// chunk, then combines the task-local sink state
    fn execute(&self, task: &mut TaskContext) {
        let client = Arc::clone(&self.executor.client);
        if client.is_interrupted() {
            return;
        }
        if let Some((node, state)) = self.parallel.lock().clone() {
            task.task_info.insert(node, state);
        }
        let mut context = ExecutionContext::new(client, std::mem::take(task));
        if let Err(error) = self.run(&mut context) {
            self.executor.push_error(error);
        }
        context.flush_profiler();
    }

    fn run(&self, context: &mut ExecutionContext) -> Result<()> {
        let sink = self.sink.as_sink().ok_or_else(|| self.not_a_sink())?;
        let gstate = self.sink_state.read().clone();
        let mut state = self.child.get_operator_state()?;
        let mut lstate = sink.get_local_sink_state(context)?;
        let mut intermediate = DataChunk::new(self.child.types());
        loop {
            self.child.get_chunk(context, &mut intermediate, &mut state)?;
            if intermediate.is_empty() {
                return sink.combine(context, &gstate, &mut lstate);
            }
            let start = Instant::now();
            sink.sink(context, &gstate, &mut lstate, &intermediate)?;
            context.thread.profiler.record(
                operator_id(self.sink.as_ref()),
                || self.sink.kind().to_string(),
                start.elapsed(),
                intermediate.size(),
            );
        }
    }

    fn finish_task(self: &Arc<Self>) {
        let finished = self.finished_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        if finished != self.total_tasks.load(Ordering::Acquire) {
            return;
        }
        if !self.executor.has_errors() {
            if let Err(error) = self.finalize() {
                self.executor.push_error(error);
            }
        }
        self.finish();
    }

    fn finalize(&self) -> Result<()> {
        let sink = self.sink.as_sink().ok_or_else(|| self.not_a_sink())?;
        let gstate = self.sink_state.read().clone();
        sink.finalize(&self.executor.client, &gstate)?;
        sink.sink_slot().set(gstate);
        Ok(())
    }

    /// Marks the pipeline finished and schedules every parent whose last
    /// dependency this was
    fn finish(self: &Arc<Self>) {
        self.finished.store(true, Ordering::Release);
        debug!(pipeline = %self, "pipeline finished");
        let parents = self.parents.lock().clone();
        for parent in parents {
            parent.complete_dependency();
        }
        if self.recursive_cte().is_none() {
            self.executor.complete_pipeline();
        }
    }

    fn complete_dependency(self: &Arc<Self>) {
        let finished = self.finished_dependencies.fetch_add(1, Ordering::AcqRel) + 1;
        if finished == self.dependencies.lock().len() {
            self.schedule();
        }
    }

    /// Runs the pipeline again from scratch on the calling thread and the
    /// workers, returning once it finished
    pub(crate) fn run_to_completion(self: &Arc<Self>) -> Result<()> {
        self.reset()?;
        self.schedule();
        let scheduler = &self.executor.client.db.scheduler;
        while !self.is_finished() {
            if let Some(task) = scheduler.wait_for_task(&self.executor.producer) {
                task.execute();
            }
        }
        match self.executor.first_error() {
            Some(error) => Err(Error::Execution(error)),
            None => Ok(()),
        }
    }

    fn not_a_sink(&self) -> Error {
        Error::Internal(format!("{} does not terminate a pipeline", self.sink.kind()))
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = vec![self.sink.kind().to_string()];
        let mut node = Some(Arc::clone(&self.child));
        while let Some(op) = node {
            names.push(op.kind().to_string());
            node = op.children().first().cloned();
        }
        names.reverse();
        write!(f, "{}", names.join(" -> "))
    }
}
