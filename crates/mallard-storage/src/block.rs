//! Block management

/// Block identifier
pub type BlockId = u64;

/// Ids at or above this value are in-memory blocks that were never persisted
pub const MAXIMUM_BLOCK: BlockId = 1 << 62;

/// A fixed-size block of bytes
pub struct Block {
    /// Block ID
    pub id: BlockId,
    /// The block data
    pub data: Box<[u8]>,
    /// Whether this block has been modified since it was loaded
    pub dirty: bool,
}

impl Block {
    /// Create a new zeroed block
    pub fn new(id: BlockId, size: usize) -> Self {
        Block {
            id,
            data: vec![0u8; size].into_boxed_slice(),
            dirty: false,
        }
    }

    /// Create a block holding a copy of `bytes`
    pub fn from_bytes(id: BlockId, bytes: &[u8]) -> Self {
        Block {
            id,
            data: bytes.to_vec().into_boxed_slice(),
            dirty: false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if this block only lives in memory
    pub fn is_temporary(&self) -> bool {
        self.id >= MAXIMUM_BLOCK
    }

    /// Mark this block as dirty
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }
}
