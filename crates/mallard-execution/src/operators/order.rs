//! ORDER BY

use crate::context::{ClientContext, ExecutionContext};
use crate::operator::{
    downcast_global, downcast_local, GlobalSinkState, LocalSinkState, OperatorState, ParallelMode,
    PhysicalOperator, PhysicalOperatorType, SinkOperator, SinkStateSlot,
};
use mallard_common::{ChunkCollection, DataChunk, Error, LogicalType, OrderType, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, OnceLock};

struct SortedData {
    collection: ChunkCollection,
    order: Vec<usize>,
}

#[derive(Default)]
struct OrderGlobalState {
    collected: Mutex<ChunkCollection>,
    sorted: OnceLock<SortedData>,
}

/// Materializes its input and emits it sorted by `orders`, each a column
/// index with a direction. NULLs sort first.
pub struct Order {
    children: Vec<Arc<dyn PhysicalOperator>>,
    orders: Vec<(usize, OrderType)>,
    types: Vec<LogicalType>,
    slot: SinkStateSlot,
}

impl Order {
    pub fn new(child: Arc<dyn PhysicalOperator>, orders: Vec<(usize, OrderType)>) -> Result<Self> {
        if let Some(&(column, _)) = orders.iter().find(|(c, _)| *c >= child.types().len()) {
            return Err(Error::InvalidArguments(format!(
                "cannot order by column {} of {}",
                column,
                child.types().len()
            )));
        }
        Ok(Order {
            types: child.types().to_vec(),
            children: vec![child],
            orders,
            slot: SinkStateSlot::default(),
        })
    }
}

impl PhysicalOperator for Order {
    fn kind(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::OrderBy
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
        let sorted = downcast_global::<OrderGlobalState>(&gstate)?
            .sorted
            .get()
            .ok_or_else(|| Error::Internal("order read before it was finalized".to_string()))?;
        let offset = state.local_mut::<usize>()?;
        *offset += sorted
            .collection
            .materialize_sorted_chunk(chunk, &sorted.order, *offset)?;
        Ok(())
    }

    fn as_sink(&self) -> Option<&dyn SinkOperator> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn params(&self) -> String {
        let orders: Vec<String> = self
            .orders
            .iter()
            .map(|(column, order)| match order {
                OrderType::Ascending => format!("#{} ASC", column),
                OrderType::Descending => format!("#{} DESC", column),
            })
            .collect();
        orders.join(", ")
    }
}

impl SinkOperator for Order {
    fn get_global_state(&self, _client: &ClientContext) -> Result<GlobalSinkState> {
        Ok(Arc::new(OrderGlobalState::default()))
    }

    fn get_local_sink_state(&self, _context: &ExecutionContext) -> Result<LocalSinkState> {
        Ok(Box::new(ChunkCollection::new()))
    }

    fn sink(
        &self,
        _context: &mut ExecutionContext,
        _gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
        input: &DataChunk,
    ) -> Result<()> {
        downcast_local::<ChunkCollection>(lstate)?.append(input)
    }

    fn combine(
        &self,
        _context: &mut ExecutionContext,
        gstate: &GlobalSinkState,
        lstate: &mut LocalSinkState,
    ) -> Result<()> {
        let local = downcast_local::<ChunkCollection>(lstate)?;
        downcast_global::<OrderGlobalState>(gstate)?
            .collected
            .lock()
            .merge(local)
    }

    fn finalize(&self, _client: &ClientContext, gstate: &GlobalSinkState) -> Result<()> {
        let global = downcast_global::<OrderGlobalState>(gstate)?;
        let collection = std::mem::take(&mut *global.collected.lock());
        let order = collection.sort(&self.orders);
        global
            .sorted
            .set(SortedData { collection, order })
            .map_err(|_| Error::Internal("order finalized twice".to_string()))
    }

    fn parallel_mode(&self) -> ParallelMode {
        ParallelMode::Parallel
    }

    fn sink_slot(&self) -> &SinkStateSlot {
        &self.slot
    }
}
