//! Validity bitmaps

/// A validity mask indicating which rows are NULL
///
/// Always describes exactly `len` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    /// Bit vector: 1 = valid, 0 = null
    /// None means all values are valid
    mask: Option<Vec<u64>>,
    len: usize,
}

fn words_for(len: usize) -> usize {
    (len + 63) / 64
}

impl ValidityMask {
    /// Create a validity mask of `len` rows where all values are valid
    pub fn all_valid(len: usize) -> Self {
        ValidityMask { mask: None, len }
    }

    /// Create a validity mask of `len` rows where all values are NULL
    pub fn all_null(len: usize) -> Self {
        ValidityMask {
            mask: Some(vec![0; words_for(len)]),
            len,
        }
    }

    /// Number of rows described by this mask
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if a specific row is valid (not NULL)
    pub fn is_valid(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        match &self.mask {
            None => true,
            Some(mask) => (mask[idx / 64] >> (idx % 64)) & 1 == 1,
        }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        !self.is_valid(idx)
    }

    /// Set a row as valid or NULL
    pub fn set(&mut self, idx: usize, valid: bool) {
        debug_assert!(idx < self.len);
        if self.mask.is_none() {
            if valid {
                return;
            }
            self.mask = Some(vec![u64::MAX; words_for(self.len)]);
        }
        if let Some(mask) = &mut self.mask {
            if valid {
                mask[idx / 64] |= 1 << (idx % 64);
            } else {
                mask[idx / 64] &= !(1 << (idx % 64));
            }
        }
    }

    /// Marks every row valid again, keeping the length
    pub fn set_all_valid(&mut self) {
        self.mask = None;
    }

    /// Returns true if no row can be NULL
    pub fn all_valid_flag(&self) -> bool {
        match &self.mask {
            None => true,
            Some(_) => self.null_count(self.len) == 0,
        }
    }

    /// Number of NULL rows among the first `count`
    pub fn null_count(&self, count: usize) -> usize {
        match &self.mask {
            None => 0,
            Some(_) => (0..count.min(self.len)).filter(|&i| !self.is_valid(i)).count(),
        }
    }
}

impl Default for ValidityMask {
    fn default() -> Self {
        Self::all_valid(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_mask() {
        let mut mask = ValidityMask::all_valid(128);
        assert!(mask.is_valid(0));
        assert!(mask.is_valid(100));

        mask.set(5, false);
        assert!(mask.is_valid(0));
        assert!(!mask.is_valid(5));
        assert!(mask.is_valid(6));
        assert_eq!(mask.null_count(128), 1);
        assert_eq!(mask.len(), 128);

        mask.set(5, true);
        assert!(mask.all_valid_flag());
    }

    #[test]
    fn test_all_null() {
        let mask = ValidityMask::all_null(70);
        assert!(mask.is_null(0));
        assert!(mask.is_null(69));
        assert_eq!(mask.null_count(70), 70);
    }
}
