//! Selection vectors

use std::sync::Arc;

/// An indirection array mapping logical row positions to physical slots.
///
/// The underlying array is shared, so slicing many vectors by the same
/// selection never copies it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionVector {
    indices: Arc<Vec<u32>>,
}

impl SelectionVector {
    /// Selection with room for `capacity` entries, all pointing at slot 0
    pub fn new(capacity: usize) -> Self {
        SelectionVector {
            indices: Arc::new(vec![0; capacity]),
        }
    }

    /// The identity selection `0..count`
    pub fn incremental(count: usize) -> Self {
        SelectionVector {
            indices: Arc::new((0..count as u32).collect()),
        }
    }

    pub fn from_indices(indices: Vec<u32>) -> Self {
        SelectionVector {
            indices: Arc::new(indices),
        }
    }

    /// Physical slot of logical row `idx`
    #[inline]
    pub fn get_index(&self, idx: usize) -> usize {
        self.indices[idx] as usize
    }

    pub fn set_index(&mut self, idx: usize, physical: usize) {
        Arc::make_mut(&mut self.indices)[idx] = physical as u32;
    }

    /// Appends a physical slot at the end
    pub fn push(&mut self, physical: usize) {
        Arc::make_mut(&mut self.indices).push(physical as u32);
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }

    /// Composes two selections: the result maps `i` to
    /// `self[other[i]]` for the first `count` entries of `other`.
    pub fn slice(&self, other: &SelectionVector, count: usize) -> SelectionVector {
        let indices = (0..count)
            .map(|i| self.indices[other.get_index(i)])
            .collect();
        SelectionVector::from_indices(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_and_push() {
        let mut sel = SelectionVector::incremental(3);
        assert_eq!(sel.as_slice(), &[0, 1, 2]);
        sel.push(7);
        assert_eq!(sel.get_index(3), 7);
    }

    #[test]
    fn test_slice_composes() {
        let base = SelectionVector::from_indices(vec![10, 20, 30, 40]);
        let pick = SelectionVector::from_indices(vec![3, 1]);
        let composed = base.slice(&pick, 2);
        assert_eq!(composed.as_slice(), &[40, 20]);
        // the original is untouched
        assert_eq!(base.get_index(0), 10);
    }

    #[test]
    fn test_copy_on_write() {
        let a = SelectionVector::incremental(2);
        let mut b = a.clone();
        b.set_index(0, 5);
        assert_eq!(a.get_index(0), 0);
        assert_eq!(b.get_index(0), 5);
    }
}
