//! Buffer Manager
//!
//! Hands out blocks to storage segments. Segments never touch raw storage:
//! they register a block once and pin it for every access. Pinning returns
//! an RAII handle that unpins the block when dropped.

use crate::block::{Block, BlockId, MAXIMUM_BLOCK};
use mallard_common::{Config, Error, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A registered block plus its pin count
struct BlockEntry {
    block: RwLock<Block>,
    pin_count: AtomicU32,
}

/// The buffer manager
pub struct BufferManager {
    block_size: usize,
    maximum_memory: Option<usize>,
    used_memory: AtomicUsize,
    /// Registered blocks by id
    blocks: RwLock<HashMap<BlockId, Arc<BlockEntry>>>,
    /// Images of persisted blocks
    persistent: Mutex<HashMap<BlockId, Box<[u8]>>>,
    next_temporary_id: AtomicU64,
    next_persistent_id: AtomicU64,
}

impl BufferManager {
    /// Create a buffer manager handing out blocks of `block_size` bytes
    pub fn new(block_size: usize, maximum_memory: Option<usize>) -> Self {
        BufferManager {
            block_size,
            maximum_memory,
            used_memory: AtomicUsize::new(0),
            blocks: RwLock::new(HashMap::new()),
            persistent: Mutex::new(HashMap::new()),
            next_temporary_id: AtomicU64::new(MAXIMUM_BLOCK),
            next_persistent_id: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.block_size, config.maximum_memory)
    }

    /// Size in bytes of every block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes currently held by registered blocks
    pub fn used_memory(&self) -> usize {
        self.used_memory.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize) -> Result<()> {
        let mut current = self.used_memory.load(Ordering::Acquire);
        loop {
            let wanted = current + size;
            if let Some(limit) = self.maximum_memory {
                if wanted > limit {
                    return Err(Error::OutOfMemory {
                        requested: size,
                        limit,
                    });
                }
            }
            match self.used_memory.compare_exchange_weak(
                current,
                wanted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Allocate a new zeroed in-memory block of `size` bytes
    pub fn register_memory(&self, size: usize) -> Result<BlockId> {
        self.reserve(size)?;
        let id = self.next_temporary_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(BlockEntry {
            block: RwLock::new(Block::new(id, size)),
            pin_count: AtomicU32::new(0),
        });
        self.blocks.write().insert(id, entry);
        Ok(id)
    }

    /// Make a persisted block available for pinning
    pub fn register_block(&self, block_id: BlockId) -> Result<BlockId> {
        if self.blocks.read().contains_key(&block_id) {
            return Ok(block_id);
        }
        let block = {
            let persistent = self.persistent.lock();
            let bytes = persistent
                .get(&block_id)
                .ok_or(Error::BlockNotFound(block_id))?;
            Block::from_bytes(block_id, bytes)
        };
        self.reserve(block.size())?;
        let entry = Arc::new(BlockEntry {
            block: RwLock::new(block),
            pin_count: AtomicU32::new(0),
        });
        self.blocks.write().entry(block_id).or_insert(entry);
        Ok(block_id)
    }

    /// Pin a registered block
    pub fn pin(&self, block_id: BlockId) -> Result<BufferHandle> {
        let entry = self
            .blocks
            .read()
            .get(&block_id)
            .cloned()
            .ok_or(Error::BlockNotFound(block_id))?;
        entry.pin_count.fetch_add(1, Ordering::SeqCst);
        Ok(BufferHandle { entry, block_id })
    }

    /// Persist the current contents of a block under a fresh persistent id
    pub fn write_block(&self, block_id: BlockId) -> Result<BlockId> {
        let handle = self.pin(block_id)?;
        let bytes = handle.read().data.clone();
        let persistent_id = self.next_persistent_id.fetch_add(1, Ordering::SeqCst);
        self.persistent.lock().insert(persistent_id, bytes);
        debug!(block_id, persistent_id, "wrote block");
        Ok(persistent_id)
    }

    /// Release a block; outstanding handles stay readable until dropped
    pub fn unregister(&self, block_id: BlockId) {
        if let Some(entry) = self.blocks.write().remove(&block_id) {
            let size = entry.block.read().size();
            self.used_memory.fetch_sub(size, Ordering::AcqRel);
        }
    }

    /// Current pin count of a block (0 if unknown)
    pub fn pin_count(&self, block_id: BlockId) -> u32 {
        self.blocks
            .read()
            .get(&block_id)
            .map(|e| e.pin_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// RAII guard for a pinned block
/// Automatically unpins the block when dropped
pub struct BufferHandle {
    entry: Arc<BlockEntry>,
    block_id: BlockId,
}

impl BufferHandle {
    /// Get the block ID
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Read the block data
    pub fn read(&self) -> RwLockReadGuard<'_, Block> {
        self.entry.block.read()
    }

    /// Write to the block data
    pub fn write(&self) -> RwLockWriteGuard<'_, Block> {
        let mut block = self.entry.block.write();
        block.set_dirty();
        block
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.entry.pin_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_pin() {
        let manager = BufferManager::new(1024, None);
        let id = manager.register_memory(1024).unwrap();
        {
            let handle = manager.pin(id).unwrap();
            handle.write().data[0] = 42;
            assert_eq!(manager.pin_count(id), 1);
        }
        assert_eq!(manager.pin_count(id), 0);
        assert_eq!(manager.pin(id).unwrap().read().data[0], 42);
    }

    #[test]
    fn test_memory_limit() {
        let manager = BufferManager::new(1024, Some(1500));
        let first = manager.register_memory(1024).unwrap();
        assert!(matches!(
            manager.register_memory(1024),
            Err(Error::OutOfMemory { .. })
        ));
        manager.unregister(first);
        assert_eq!(manager.used_memory(), 0);
        assert!(manager.register_memory(1024).is_ok());
    }

    #[test]
    fn test_write_and_register_block() {
        let manager = BufferManager::new(16, None);
        let id = manager.register_memory(16).unwrap();
        manager.pin(id).unwrap().write().data[3] = 7;
        let persisted = manager.write_block(id).unwrap();
        assert!(persisted < MAXIMUM_BLOCK);

        assert_eq!(manager.register_block(persisted).unwrap(), persisted);
        assert_eq!(manager.pin(persisted).unwrap().read().data[3], 7);
        assert!(matches!(
            manager.register_block(999),
            Err(Error::BlockNotFound(999))
        ));
    }

    #[test]
    fn test_pin_unknown_block() {
        let manager = BufferManager::new(16, None);
        assert!(manager.pin(MAXIMUM_BLOCK + 5).is_err());
    }
}
