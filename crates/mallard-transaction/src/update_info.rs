//! Version chains of in-place updates
//!
//! Every vector of a storage segment that has been updated owns a
//! `VersionChain`: a list of `UpdateInfo` nodes, one per updating
//! transaction, newest at the head and oldest at the tail. A node holds the
//! values its rows had *before* the owning transaction overwrote them, so a
//! reader that cannot see the update overlays the undo values onto the base
//! data, and a rollback copies them back.

use crate::mvcc::{Transaction, TransactionId};
use mallard_common::Result;

/// Undo record of one transaction's updates to one vector.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    /// Transaction that wrote this node.
    pub transaction_id: TransactionId,
    /// The writer's transaction id while uncommitted, its commit id afterwards.
    pub version_number: u64,
    /// Updated row offsets within the vector, sorted ascending.
    pub tuples: Vec<u32>,
    /// Pre-update values, `width` bytes per entry of `tuples`.
    pub tuple_data: Vec<u8>,
    /// Pre-update null flags, one per entry of `tuples`.
    pub nulls: Vec<bool>,
}

impl UpdateInfo {
    /// Creates an empty node owned by `transaction`.
    pub fn new(transaction: &Transaction) -> Self {
        UpdateInfo {
            transaction_id: transaction.transaction_id,
            version_number: transaction.transaction_id,
            tuples: Vec::new(),
            tuple_data: Vec::new(),
            nulls: Vec::new(),
        }
    }

    /// Number of rows recorded in this node
    pub fn n(&self) -> usize {
        self.tuples.len()
    }

    /// Position of `offset` in `tuples`, if present.
    ///
    /// Stops early once a larger offset is seen since `tuples` is sorted.
    pub fn position_of(&self, offset: u32) -> Option<usize> {
        for (i, &tuple) in self.tuples.iter().enumerate() {
            if tuple == offset {
                return Some(i);
            }
            if tuple > offset {
                break;
            }
        }
        None
    }

    /// Undo bytes of the `i`-th recorded row
    pub fn value_bytes(&self, i: usize, width: usize) -> &[u8] {
        &self.tuple_data[i * width..(i + 1) * width]
    }
}

/// Per-vector list of update nodes, newest first.
#[derive(Debug, Default, Clone)]
pub struct VersionChain {
    nodes: Vec<UpdateInfo>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = &UpdateInfo> {
        self.nodes.iter()
    }

    /// Adds a node at the head of the chain.
    pub fn push_front(&mut self, node: UpdateInfo) {
        self.nodes.insert(0, node);
    }

    /// The node written by `transaction_id`, if any.
    pub fn find(&self, transaction_id: TransactionId) -> Option<&UpdateInfo> {
        self.nodes.iter().find(|n| n.transaction_id == transaction_id)
    }

    pub fn find_mut(&mut self, transaction_id: TransactionId) -> Option<&mut UpdateInfo> {
        self.nodes
            .iter_mut()
            .find(|n| n.transaction_id == transaction_id)
    }

    /// Detaches the node written by `transaction_id`.
    pub fn remove(&mut self, transaction_id: TransactionId) -> Option<UpdateInfo> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.transaction_id == transaction_id)?;
        Some(self.nodes.remove(idx))
    }

    /// Invokes `callback` for every node whose changes `transaction` must not
    /// see, from newest to oldest.
    ///
    /// Applying the undo values of these nodes in that order leaves the
    /// oldest invisible node's values in place, which is the snapshot of the
    /// reader.
    pub fn updates_for_transaction<F>(&self, transaction: &Transaction, mut callback: F) -> Result<()>
    where
        F: FnMut(&UpdateInfo) -> Result<()>,
    {
        for node in &self.nodes {
            if !transaction.can_see(node.version_number) {
                callback(node)?;
            }
        }
        Ok(())
    }

    /// First offset of `tuples` that another transaction has updated in a
    /// version `transaction` cannot see.
    pub fn conflicting_row(&self, transaction: &Transaction, tuples: &[u32]) -> Option<u32> {
        for node in &self.nodes {
            if node.transaction_id == transaction.transaction_id
                || transaction.can_see(node.version_number)
            {
                continue;
            }
            // both sides are sorted
            let (mut i, mut j) = (0, 0);
            while i < node.tuples.len() && j < tuples.len() {
                match node.tuples[i].cmp(&tuples[j]) {
                    std::cmp::Ordering::Equal => return Some(tuples[j]),
                    std::cmp::Ordering::Less => i += 1,
                    std::cmp::Ordering::Greater => j += 1,
                }
            }
        }
        None
    }
}
