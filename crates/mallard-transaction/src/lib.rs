//! Mallard Transaction - MVCC transaction management
//!
//! Transactions never copy data: an update overwrites the base storage in
//! place and keeps the previous values in an `UpdateInfo` node of the
//! vector's `VersionChain`. Commit stamps these nodes with a commit id,
//! rollback copies the undo values back, and once no running transaction
//! can observe the old values the nodes are cleaned up.

use mallard_common::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub mod mvcc;
pub mod update_info;

pub use mvcc::{
    Timestamp, Transaction, TransactionId, TransactionState, UndoEntry, VersionedStorage,
    TRANSACTION_ID_START,
};
pub use update_info::{UpdateInfo, VersionChain};

#[derive(Default)]
struct ManagerState {
    active: Vec<Arc<Transaction>>,
    /// Committed transactions whose update nodes may still be read
    recently_committed: Vec<Arc<Transaction>>,
}

/// Transaction manager
pub struct TransactionManager {
    /// Logical clock shared by start times and commit ids
    timestamp: AtomicU64,
    next_transaction_id: AtomicU64,
    state: Mutex<ManagerState>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            timestamp: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(TRANSACTION_ID_START),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self) -> Arc<Transaction> {
        let mut state = self.state.lock();
        let start_time = self.timestamp.fetch_add(1, Ordering::SeqCst);
        let id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        let transaction = Arc::new(Transaction::new(id, start_time));
        state.active.push(transaction.clone());
        debug!(transaction_id = id, start_time, "begin transaction");
        transaction
    }

    /// Commit a transaction, stamping every update node it owns
    pub fn commit(&self, transaction: &Arc<Transaction>) -> Result<()> {
        let mut state = self.state.lock();
        let commit_id = self.timestamp.fetch_add(1, Ordering::SeqCst);
        transaction.mark_committed(commit_id)?;
        state
            .active
            .retain(|t| t.transaction_id != transaction.transaction_id);

        let mut result = Ok(());
        for entry in transaction.undo_entries() {
            if let Err(e) =
                entry
                    .target
                    .commit_update(entry.vector_index, transaction.transaction_id, commit_id)
            {
                result = result.and(Err(e));
            }
        }
        debug!(
            transaction_id = transaction.transaction_id,
            commit_id,
            updates = transaction.undo_count(),
            "commit transaction"
        );
        if transaction.undo_count() > 0 {
            state.recently_committed.push(transaction.clone());
        }
        Self::cleanup(&mut state)?;
        result
    }

    /// Roll back a transaction, undoing its updates newest first
    pub fn rollback(&self, transaction: &Arc<Transaction>) -> Result<()> {
        let mut state = self.state.lock();
        transaction.mark_aborted()?;
        state
            .active
            .retain(|t| t.transaction_id != transaction.transaction_id);

        let mut result = Ok(());
        let undo = transaction.take_undo();
        debug!(
            transaction_id = transaction.transaction_id,
            updates = undo.len(),
            "rollback transaction"
        );
        for entry in undo.into_iter().rev() {
            if let Err(e) = entry
                .target
                .rollback_update(entry.vector_index, transaction.transaction_id)
            {
                result = result.and(Err(e));
            }
        }
        Self::cleanup(&mut state)?;
        result
    }

    /// Number of running transactions
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of committed transactions whose undo data is still retained
    pub fn retained_count(&self) -> usize {
        self.state.lock().recently_committed.len()
    }

    /// Drops update nodes of committed transactions that every running
    /// transaction already sees.
    fn cleanup(state: &mut ManagerState) -> Result<()> {
        let lowest_active_start = state
            .active
            .iter()
            .map(|t| t.start_time)
            .min()
            .unwrap_or(Timestamp::MAX);

        let (done, keep): (Vec<_>, Vec<_>) = state
            .recently_committed
            .drain(..)
            .partition(|t| t.commit_id().map_or(false, |c| c < lowest_active_start));
        state.recently_committed = keep;

        for transaction in done {
            for entry in transaction.take_undo() {
                entry
                    .target
                    .cleanup_update(entry.vector_index, transaction.transaction_id)?;
            }
        }
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Records lifecycle calls per (vector, transaction)
    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<(&'static str, usize, TransactionId)>>,
        versions: Mutex<HashMap<usize, u64>>,
    }

    impl VersionedStorage for RecordingStorage {
        fn commit_update(&self, vector_index: usize, id: TransactionId, commit_id: Timestamp) -> Result<()> {
            self.versions.lock().insert(vector_index, commit_id);
            self.calls.lock().push(("commit", vector_index, id));
            Ok(())
        }

        fn rollback_update(&self, vector_index: usize, id: TransactionId) -> Result<()> {
            self.calls.lock().push(("rollback", vector_index, id));
            Ok(())
        }

        fn cleanup_update(&self, vector_index: usize, id: TransactionId) -> Result<()> {
            self.calls.lock().push(("cleanup", vector_index, id));
            Ok(())
        }
    }

    #[test]
    fn test_begin_assigns_ids() {
        let manager = TransactionManager::new();
        let a = manager.begin();
        let b = manager.begin();
        assert!(a.transaction_id >= TRANSACTION_ID_START);
        assert!(b.transaction_id > a.transaction_id);
        assert!(b.start_time > a.start_time);
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_commit_visibility() {
        let manager = TransactionManager::new();
        let writer = manager.begin();
        let concurrent = manager.begin();
        manager.commit(&writer).unwrap();
        let commit_id = writer.commit_id().unwrap();

        assert!(!concurrent.can_see(commit_id));
        let later = manager.begin();
        assert!(later.can_see(commit_id));
    }

    #[test]
    fn test_rollback_runs_newest_first() {
        let manager = TransactionManager::new();
        let storage = Arc::new(RecordingStorage::default());
        let tx = manager.begin();
        tx.register_update(storage.clone(), 0);
        tx.register_update(storage.clone(), 1);
        manager.rollback(&tx).unwrap();

        let calls = storage.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                ("rollback", 1, tx.transaction_id),
                ("rollback", 0, tx.transaction_id)
            ]
        );
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_cleanup_waits_for_older_readers() {
        let manager = TransactionManager::new();
        let storage = Arc::new(RecordingStorage::default());
        let reader = manager.begin();
        let writer = manager.begin();
        writer.register_update(storage.clone(), 3);
        manager.commit(&writer).unwrap();

        // the reader still needs the undo values
        assert_eq!(manager.retained_count(), 1);
        assert_eq!(storage.versions.lock().get(&3), writer.commit_id().as_ref());

        manager.commit(&reader).unwrap();
        assert_eq!(manager.retained_count(), 0);
        let calls = storage.calls.lock().clone();
        assert_eq!(calls.last(), Some(&("cleanup", 3, writer.transaction_id)));
    }
}
