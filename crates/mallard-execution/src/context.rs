//! Database, client and execution contexts

use crate::profiler::{OperatorProfiler, QueryProfiler};
use crate::scheduler::TaskScheduler;
use hashbrown::HashMap;
use mallard_common::{Config, Result};
use mallard_storage::{BufferManager, ParallelScanState};
use mallard_transaction::{Transaction, TransactionManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Everything shared by the connections of one database
pub struct DatabaseInstance {
    pub config: Config,
    pub scheduler: TaskScheduler,
    pub buffer_manager: Arc<BufferManager>,
    pub transaction_manager: TransactionManager,
}

impl DatabaseInstance {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        let scheduler = TaskScheduler::new(&config)?;
        let buffer_manager = Arc::new(BufferManager::from_config(&config));
        Ok(Arc::new(DatabaseInstance {
            config,
            scheduler,
            buffer_manager,
            transaction_manager: TransactionManager::new(),
        }))
    }

    pub fn number_of_threads(&self) -> usize {
        self.scheduler.number_of_threads()
    }
}

/// State of one client connection
pub struct ClientContext {
    pub db: Arc<DatabaseInstance>,
    interrupted: AtomicBool,
    pub profiler: QueryProfiler,
    transaction: Mutex<Option<Arc<Transaction>>>,
}

impl ClientContext {
    pub fn new(db: Arc<DatabaseInstance>) -> Arc<Self> {
        Arc::new(ClientContext {
            db,
            interrupted: AtomicBool::new(false),
            profiler: QueryProfiler::new(),
            transaction: Mutex::new(None),
        })
    }

    /// Asks every running operator of the current query to stop
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::AcqRel) {
            debug!("query interrupted");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    pub fn active_transaction(&self) -> Option<Arc<Transaction>> {
        self.transaction.lock().clone()
    }

    /// The running transaction, starting one if there is none
    pub fn transaction(&self) -> Arc<Transaction> {
        let mut current = self.transaction.lock();
        match &*current {
            Some(transaction) => Arc::clone(transaction),
            None => {
                let transaction = self.db.transaction_manager.begin();
                *current = Some(Arc::clone(&transaction));
                transaction
            }
        }
    }

    /// Commits the running transaction, if any
    pub fn commit(&self) -> Result<()> {
        let transaction = self.transaction.lock().take();
        match transaction {
            Some(transaction) => self.db.transaction_manager.commit(&transaction),
            None => Ok(()),
        }
    }

    /// Rolls back the running transaction, if any
    pub fn rollback(&self) -> Result<()> {
        let transaction = self.transaction.lock().take();
        match transaction {
            Some(transaction) => self.db.transaction_manager.rollback(&transaction),
            None => Ok(()),
        }
    }
}

/// Per-thread execution state
#[derive(Debug, Default)]
pub struct ThreadContext {
    pub profiler: OperatorProfiler,
}

/// Per-task execution state: the parallel scan partitions handed to the
/// task, keyed by the identity of the scanning operator
#[derive(Debug, Default)]
pub struct TaskContext {
    pub task_info: HashMap<usize, Arc<ParallelScanState>>,
}

pub struct ExecutionContext {
    pub client: Arc<ClientContext>,
    pub thread: ThreadContext,
    pub task: TaskContext,
}

impl ExecutionContext {
    pub fn new(client: Arc<ClientContext>, task: TaskContext) -> Self {
        ExecutionContext {
            client,
            thread: ThreadContext::default(),
            task,
        }
    }

    /// Moves the thread-local counters into the query profiler
    pub fn flush_profiler(&mut self) {
        self.client.profiler.flush(&mut self.thread.profiler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_lifecycle() {
        let db = DatabaseInstance::new(Config::single_threaded()).unwrap();
        let client = ClientContext::new(db.clone());
        assert!(client.active_transaction().is_none());

        let first = client.transaction();
        let again = client.transaction();
        assert_eq!(first.transaction_id, again.transaction_id);
        assert_eq!(db.transaction_manager.active_count(), 1);

        client.commit().unwrap();
        assert!(client.active_transaction().is_none());
        assert!(first.is_committed());

        let second = client.transaction();
        assert_ne!(second.transaction_id, first.transaction_id);
        client.rollback().unwrap();
        assert_eq!(db.transaction_manager.active_count(), 0);
        client.commit().unwrap();
    }

    #[test]
    fn test_interrupt_flag() {
        let db = DatabaseInstance::new(Config::single_threaded()).unwrap();
        let client = ClientContext::new(db);
        assert!(!client.is_interrupted());
        client.interrupt();
        client.interrupt();
        assert!(client.is_interrupted());
        client.clear_interrupt();
        assert!(!client.is_interrupted());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(DatabaseInstance::new(Config::default().with_threads(0)).is_err());
    }
}
