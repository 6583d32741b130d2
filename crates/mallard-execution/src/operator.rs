//! Physical operator contract
//!
//! Operators are pulled: `get_chunk` fills the caller's chunk with the next
//! batch and an empty chunk marks the end of the stream. All mutable progress
//! lives in an `OperatorState` created by the operator, so one operator tree
//! can be executed by several tasks at once.
//!
//! Sinks additionally consume a whole input stream in three phases: `sink`
//! (per chunk, concurrently from several tasks), `combine` (once per task)
//! and `finalize` (once, after every task combined).

use crate::context::{ClientContext, ExecutionContext};
use mallard_common::{DataChunk, Error, LogicalType, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalOperatorType {
    ChunkScan,
    DelimScan,
    RecursiveCteScan,
    TableScan,
    Filter,
    Projection,
    CrossProduct,
    Union,
    HashJoin,
    HashGroupBy,
    SimpleAggregate,
    OrderBy,
    ReservoirSample,
    DelimJoin,
    RecursiveCte,
    Execute,
    EmptyResult,
}

impl fmt::Display for PhysicalOperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhysicalOperatorType::ChunkScan => "CHUNK_SCAN",
            PhysicalOperatorType::DelimScan => "DELIM_SCAN",
            PhysicalOperatorType::RecursiveCteScan => "RECURSIVE_CTE_SCAN",
            PhysicalOperatorType::TableScan => "TABLE_SCAN",
            PhysicalOperatorType::Filter => "FILTER",
            PhysicalOperatorType::Projection => "PROJECTION",
            PhysicalOperatorType::CrossProduct => "CROSS_PRODUCT",
            PhysicalOperatorType::Union => "UNION",
            PhysicalOperatorType::HashJoin => "HASH_JOIN",
            PhysicalOperatorType::HashGroupBy => "HASH_GROUP_BY",
            PhysicalOperatorType::SimpleAggregate => "SIMPLE_AGGREGATE",
            PhysicalOperatorType::OrderBy => "ORDER_BY",
            PhysicalOperatorType::ReservoirSample => "RESERVOIR_SAMPLE",
            PhysicalOperatorType::DelimJoin => "DELIM_JOIN",
            PhysicalOperatorType::RecursiveCte => "RECURSIVE_CTE",
            PhysicalOperatorType::Execute => "EXECUTE",
            PhysicalOperatorType::EmptyResult => "EMPTY_RESULT",
        };
        write!(f, "{}", name)
    }
}

/// Progress of one pull stream through an operator
pub struct OperatorState {
    pub finished: bool,
    /// Buffer for the chunks pulled from the first child
    pub child_chunk: DataChunk,
    pub child_state: Option<Box<OperatorState>>,
    local: Option<Box<dyn Any + Send>>,
}

impl OperatorState {
    /// State with a buffered chunk and state for `child`, if any
    pub fn new(child: Option<&Arc<dyn PhysicalOperator>>) -> Result<Self> {
        let (child_chunk, child_state) = match child {
            Some(child) => (
                DataChunk::new(child.types()),
                Some(Box::new(child.get_operator_state()?)),
            ),
            None => (DataChunk::empty(), None),
        };
        Ok(OperatorState {
            finished: false,
            child_chunk,
            child_state,
            local: None,
        })
    }

    /// Attaches operator specific progress
    pub fn with_local<T: Any + Send>(mut self, local: T) -> Self {
        self.local = Some(Box::new(local));
        self
    }

    pub fn local_mut<T: Any>(&mut self) -> Result<&mut T> {
        self.local
            .as_mut()
            .and_then(|local| local.downcast_mut::<T>())
            .ok_or_else(|| Error::Internal("operator state of the wrong type".to_string()))
    }

    /// The buffered child chunk together with the child state
    pub fn child_parts(&mut self) -> Result<(&mut DataChunk, &mut OperatorState)> {
        match self.child_state.as_deref_mut() {
            Some(child_state) => Ok((&mut self.child_chunk, child_state)),
            None => Err(Error::Internal("operator state without a child".to_string())),
        }
    }

    /// Operator specific progress, the child chunk and the child state
    pub fn parts<T: Any>(&mut self) -> Result<(&mut T, &mut DataChunk, &mut OperatorState)> {
        let OperatorState {
            child_chunk,
            child_state,
            local,
            ..
        } = self;
        let local = local
            .as_mut()
            .and_then(|local| local.downcast_mut::<T>())
            .ok_or_else(|| Error::Internal("operator state of the wrong type".to_string()))?;
        let child_state = child_state
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("operator state without a child".to_string()))?;
        Ok((local, child_chunk, child_state))
    }
}

/// Identity of an operator: the address of the node
pub fn operator_id<T: ?Sized>(op: &T) -> usize {
    op as *const T as *const () as usize
}

pub trait PhysicalOperator: Send + Sync {
    fn kind(&self) -> PhysicalOperatorType;

    /// Output column types
    fn types(&self) -> &[LogicalType];

    fn children(&self) -> &[Arc<dyn PhysicalOperator>] {
        &[]
    }

    fn get_operator_state(&self) -> Result<OperatorState> {
        OperatorState::new(self.children().first())
    }

    /// Produces the next batch into `chunk`, which arrives reset
    fn get_chunk_internal(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()>;

    /// Pulls the next batch; an empty `chunk` means the stream is exhausted
    /// and every further call returns an empty chunk too.
    fn get_chunk(
        &self,
        context: &mut ExecutionContext,
        chunk: &mut DataChunk,
        state: &mut OperatorState,
    ) -> Result<()> {
        if context.client.is_interrupted() {
            return Err(Error::Interrupted);
        }
        chunk.reset();
        if state.finished {
            return Ok(());
        }

        let start = Instant::now();
        self.get_chunk_internal(context, chunk, state)?;
        context.thread.profiler.record(
            operator_id(self),
            || self.kind().to_string(),
            start.elapsed(),
            chunk.size(),
        );

        if chunk.is_empty() {
            state.finished = true;
        }
        Ok(())
    }

    /// The sink interface, for operators that terminate a pipeline
    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    /// Extra text shown next to the operator name
    fn params(&self) -> String {
        String::new()
    }
}

/// Renders an operator tree as `NAME(child, child)`
pub fn tree_to_string(op: &dyn PhysicalOperator) -> String {
    let mut result = op.kind().to_string();
    let params = op.params();
    if !params.is_empty() {
        result.push('[');
        result.push_str(&params);
        result.push(']');
    }
    let children = op.children();
    if !children.is_empty() {
        let rendered: Vec<String> = children.iter().map(|c| tree_to_string(c.as_ref())).collect();
        result.push('(');
        result.push_str(&rendered.join(", "));
        result.push(')');
    }
    result
}

/// Sink state shared by every task of a pipeline
pub type GlobalSinkState = Arc<dyn Any + Send + Sync>;

/// Sink state private to one task
pub type LocalSinkState = Box<dyn Any + Send>;

pub fn downcast_global<T: Any>(state: &GlobalSinkState) -> Result<&T> {
    (**state)
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Internal("global sink state of the wrong type".to_string()))
}

pub fn downcast_local<T: Any>(state: &mut LocalSinkState) -> Result<&mut T> {
    (**state)
        .downcast_mut::<T>()
        .ok_or_else(|| Error::Internal("local sink state of the wrong type".to_string()))
}

/// Finalized sink state, read when the sink acts as a source
#[derive(Default)]
pub struct SinkStateSlot(RwLock<Option<GlobalSinkState>>);

impl SinkStateSlot {
    pub fn get(&self) -> Result<GlobalSinkState> {
        self.0
            .read()
            .clone()
            .ok_or_else(|| Error::Internal("sink read before it was finalized".to_string()))
    }

    pub fn set(&self, state: GlobalSinkState) {
        *self.0.write() = Some(state);
    }

    pub fn clear(&self) {
        *self.0.write() = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// `sink` and `combine` may run on several tasks at once
    Parallel,
    Sequential,
}

pub trait SinkOperator: PhysicalOperator {
    fn get_global_state(&self, client: &ClientContext) -> Result<GlobalSinkState>;

    fn get_local_sink_state(&self, _context: &ExecutionContext) -> Result<LocalSinkState> {
        Ok(Box::new(()))
    }

    fn sink(
        &self,
        context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()>;

    fn combine(
        &self,
        _context: &mut ExecutionContext,
        _gstate: &GlobalSinkState,
        _lstate: &mut LocalSinkState,
    ) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _client: &ClientContext, _gstate: &GlobalSinkState) -> Result<()> {
        Ok(())
    }

    fn parallel_mode(&self) -> ParallelMode {
        ParallelMode::Sequential
    }

    /// Index of the child whose stream is sunk
    fn sink_child(&self) -> usize {
        0
    }

    fn sink_slot(&self) -> &SinkStateSlot;

    /// The finalized global state
    fn sink_state(&self) -> Result<GlobalSinkState> {
        self.sink_slot().get()
    }
}
