//! Vector - The core unit of vectorized execution
//!
//! A Vector holds up to `STANDARD_VECTOR_SIZE` values of the same type.
//! Its buffer is reference counted: `reference` and `slice` share it
//! without copying, writes copy it first if it is shared.

mod buffer;
mod selection;
mod validity;

pub use buffer::{PrimitiveType, VectorBuffer};
pub use selection::SelectionVector;
pub use validity::ValidityMask;

use crate::error::{Error, Result};
use crate::types::LogicalType;
use crate::value::Value;
use crate::STANDARD_VECTOR_SIZE;
use std::sync::Arc;

/// How logical rows map onto the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum VectorKind {
    /// Row `i` is slot `i`
    Flat,
    /// Every row is slot 0
    Constant,
    /// Row `i` is slot `sel[i]`
    Dictionary(SelectionVector),
}

/// A vector of values of the same type
#[derive(Debug, Clone)]
pub struct Vector {
    logical_type: LogicalType,
    kind: VectorKind,
    buffer: Arc<VectorBuffer>,
    /// Validity of the buffer slots, one bit per slot
    validity: ValidityMask,
}

/// Read-only view of any vector representation.
///
/// Produced by [`Vector::orrify`]; callers translate a logical row with
/// [`UnifiedVectorData::index`] and then read the buffer and validity.
pub struct UnifiedVectorData<'a> {
    pub buffer: &'a VectorBuffer,
    pub validity: &'a ValidityMask,
    mapping: Mapping<'a>,
}

enum Mapping<'a> {
    Identity,
    Constant,
    Selection(&'a SelectionVector),
}

impl UnifiedVectorData<'_> {
    /// Buffer slot of logical row `idx`
    #[inline]
    pub fn index(&self, idx: usize) -> usize {
        match self.mapping {
            Mapping::Identity => idx,
            Mapping::Constant => 0,
            Mapping::Selection(sel) => sel.get_index(idx),
        }
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.is_valid(self.index(idx))
    }

    /// Typed slice of the whole buffer
    pub fn data<T: PrimitiveType>(&self) -> Result<&[T]> {
        T::slice(self.buffer).ok_or_else(|| Error::TypeMismatch {
            expected: T::PHYSICAL_TYPE.to_string(),
            got: self.buffer.variant_name().to_string(),
        })
    }

    pub fn get_value(&self, idx: usize) -> Value {
        let slot = self.index(idx);
        if self.validity.is_valid(slot) {
            self.buffer.get_value(slot)
        } else {
            Value::Null
        }
    }
}

impl Vector {
    /// Create a new flat vector of `STANDARD_VECTOR_SIZE` rows
    pub fn new(logical_type: LogicalType) -> Self {
        Self::with_capacity(logical_type, STANDARD_VECTOR_SIZE)
    }

    /// Create a new flat vector with the given capacity
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        Vector {
            buffer: Arc::new(VectorBuffer::new(logical_type.physical_type(), capacity)),
            logical_type,
            kind: VectorKind::Flat,
            validity: ValidityMask::all_valid(capacity),
        }
    }

    /// Create a constant vector
    pub fn constant(value: Value) -> Self {
        Self::typed_constant(value.logical_type(), value)
    }

    /// Create a constant vector of an explicit type
    pub fn typed_constant(logical_type: LogicalType, value: Value) -> Self {
        let mut buffer = VectorBuffer::new(logical_type.physical_type(), 1);
        let validity = if value.is_null() {
            ValidityMask::all_null(1)
        } else {
            // mismatched types were produced by a bug upstream; store NULL
            match value
                .try_cast(&logical_type)
                .and_then(|v| buffer.set_value(0, &v))
            {
                Ok(()) => ValidityMask::all_valid(1),
                Err(_) => ValidityMask::all_null(1),
            }
        };
        Vector {
            logical_type,
            kind: VectorKind::Constant,
            buffer: Arc::new(buffer),
            validity,
        }
    }

    /// Create a flat vector from a slice of Values
    pub fn from_values(logical_type: LogicalType, values: &[Value]) -> Result<Self> {
        let mut vector = Self::with_capacity(logical_type, values.len().max(STANDARD_VECTOR_SIZE));
        for (i, v) in values.iter().enumerate() {
            vector.set_value(i, v)?;
        }
        Ok(vector)
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    pub fn kind(&self) -> &VectorKind {
        &self.kind
    }

    /// Check if this vector is a constant
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, VectorKind::Constant)
    }

    pub fn buffer(&self) -> &VectorBuffer {
        &self.buffer
    }

    /// Validity of the buffer slots
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Number of buffer slots
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if both vectors share the same buffer
    pub fn shares_buffer(&self, other: &Vector) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Makes this vector an alias of `other` without copying its data
    pub fn reference(&mut self, other: &Vector) {
        self.logical_type = other.logical_type.clone();
        self.kind = other.kind.clone();
        self.buffer = Arc::clone(&other.buffer);
        self.validity = other.validity.clone();
    }

    /// Turns this vector back into a writable flat vector with all rows
    /// valid, reusing the buffer when it is already flat
    pub fn reinitialize(&mut self) {
        if self.kind == VectorKind::Flat && self.capacity() >= STANDARD_VECTOR_SIZE {
            self.validity.set_all_valid();
        } else {
            *self = Vector::new(self.logical_type.clone());
        }
    }

    /// Restricts the visible rows to `sel[0..count]`.
    ///
    /// Never touches the buffer: flat vectors become dictionary vectors over
    /// the same buffer and existing dictionaries are composed.
    pub fn slice(&mut self, sel: &SelectionVector, count: usize) {
        match &self.kind {
            VectorKind::Constant => {}
            VectorKind::Flat => {
                let mut own = SelectionVector::new(count);
                for i in 0..count {
                    own.set_index(i, sel.get_index(i));
                }
                self.kind = VectorKind::Dictionary(own);
            }
            VectorKind::Dictionary(current) => {
                self.kind = VectorKind::Dictionary(current.slice(sel, count));
            }
        }
    }

    /// Converts constant and dictionary vectors into flat storage holding
    /// `count` rows
    pub fn normalify(&mut self, count: usize) {
        let capacity = count.max(STANDARD_VECTOR_SIZE);
        let (buffer, validity) = match &self.kind {
            VectorKind::Flat => return,
            VectorKind::Constant => {
                let buffer = self.buffer.gather(count, capacity, |_| 0);
                let validity = if self.validity.is_valid(0) {
                    ValidityMask::all_valid(capacity)
                } else {
                    ValidityMask::all_null(capacity)
                };
                (buffer, validity)
            }
            VectorKind::Dictionary(sel) => {
                let buffer = self.buffer.gather(count, capacity, |i| sel.get_index(i));
                let mut validity = ValidityMask::all_valid(capacity);
                for i in 0..count {
                    if !self.validity.is_valid(sel.get_index(i)) {
                        validity.set(i, false);
                    }
                }
                (buffer, validity)
            }
        };
        self.buffer = Arc::new(buffer);
        self.validity = validity;
        self.kind = VectorKind::Flat;
    }

    /// A representation-independent read view of the first `count` rows
    pub fn orrify(&self, _count: usize) -> UnifiedVectorData<'_> {
        let mapping = match &self.kind {
            VectorKind::Flat => Mapping::Identity,
            VectorKind::Constant => Mapping::Constant,
            VectorKind::Dictionary(sel) => Mapping::Selection(sel),
        };
        UnifiedVectorData {
            buffer: &self.buffer,
            validity: &self.validity,
            mapping,
        }
    }

    /// Buffer slot of logical row `idx`
    fn slot(&self, idx: usize) -> usize {
        match &self.kind {
            VectorKind::Flat => idx,
            VectorKind::Constant => 0,
            VectorKind::Dictionary(sel) => sel.get_index(idx),
        }
    }

    /// Get value at logical index
    pub fn get_value(&self, idx: usize) -> Value {
        let slot = self.slot(idx);
        if !self.validity.is_valid(slot) {
            return Value::Null;
        }
        self.buffer.get_value(slot)
    }

    pub fn is_null(&self, idx: usize) -> bool {
        !self.validity.is_valid(self.slot(idx))
    }

    /// Set value at logical index of a flat vector, casting it to the
    /// vector's type
    pub fn set_value(&mut self, idx: usize, value: &Value) -> Result<()> {
        self.ensure_flat()?;
        if value.is_null() {
            self.validity.set(idx, false);
            return Ok(());
        }
        let buffer = Arc::make_mut(&mut self.buffer);
        if value.logical_type().physical_type() == self.logical_type.physical_type() {
            buffer.set_value(idx, value)?;
        } else {
            buffer.set_value(idx, &value.try_cast(&self.logical_type)?)?;
        }
        self.validity.set(idx, true);
        Ok(())
    }

    /// Marks row `idx` of a flat vector NULL or valid
    pub fn set_null(&mut self, idx: usize, is_null: bool) -> Result<()> {
        self.ensure_flat()?;
        self.validity.set(idx, !is_null);
        Ok(())
    }

    fn ensure_flat(&self) -> Result<()> {
        match self.kind {
            VectorKind::Flat => Ok(()),
            _ => Err(Error::Internal(
                "cannot write into a constant or dictionary vector".to_string(),
            )),
        }
    }

    /// Typed read access to the buffer of a flat vector
    pub fn data<T: PrimitiveType>(&self) -> Result<&[T]> {
        T::slice(&self.buffer).ok_or_else(|| Error::TypeMismatch {
            expected: T::PHYSICAL_TYPE.to_string(),
            got: self.logical_type.physical_type().to_string(),
        })
    }

    /// Typed write access to the buffer and validity of a flat vector
    pub fn data_mut<T: PrimitiveType>(&mut self) -> Result<(&mut [T], &mut ValidityMask)> {
        self.ensure_flat()?;
        let got = self.logical_type.physical_type().to_string();
        let buffer = Arc::make_mut(&mut self.buffer);
        match T::slice_mut(buffer) {
            Some(data) => Ok((data, &mut self.validity)),
            None => Err(Error::TypeMismatch {
                expected: T::PHYSICAL_TYPE.to_string(),
                got,
            }),
        }
    }

    /// Copies logical rows `source_offset..source_offset + count` of
    /// `source` into rows starting at `target_offset` of this flat vector
    pub fn copy_from(
        &mut self,
        source: &Vector,
        source_offset: usize,
        target_offset: usize,
        count: usize,
    ) -> Result<()> {
        self.ensure_flat()?;
        if target_offset + count > self.capacity() {
            return Err(Error::Internal(format!(
                "copy of {} rows at offset {} exceeds vector capacity {}",
                count,
                target_offset,
                self.capacity()
            )));
        }
        let data = source.orrify(source_offset + count);
        let buffer = Arc::make_mut(&mut self.buffer);
        for i in 0..count {
            let src = data.index(source_offset + i);
            if data.validity.is_valid(src) {
                buffer.copy_row(target_offset + i, data.buffer, src)?;
                self.validity.set(target_offset + i, true);
            } else {
                self.validity.set(target_offset + i, false);
            }
        }
        Ok(())
    }

    /// Get the first `count` values as a Vec
    pub fn to_values(&self, count: usize) -> Vec<Value> {
        (0..count).map(|i| self.get_value(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i32]) -> Vector {
        let values: Vec<Value> = values.iter().map(|&v| Value::Integer(v)).collect();
        Vector::from_values(LogicalType::Integer, &values).unwrap()
    }

    #[test]
    fn test_constant_vector() {
        let v = Vector::constant(Value::Integer(42));
        assert!(v.is_constant());
        assert_eq!(v.get_value(0), Value::Integer(42));
        assert_eq!(v.get_value(500), Value::Integer(42));
        assert_eq!(v.validity().len(), 1);
    }

    #[test]
    fn test_reference_shares_buffer() {
        let source = ints(&[1, 2, 3]);
        let mut alias = Vector::new(LogicalType::Integer);
        alias.reference(&source);
        assert!(alias.shares_buffer(&source));
        assert_eq!(alias.get_value(2), Value::Integer(3));
    }

    #[test]
    fn test_write_after_reference_copies() {
        let source = ints(&[1, 2, 3]);
        let mut alias = Vector::new(LogicalType::Integer);
        alias.reference(&source);
        alias.set_value(0, &Value::Integer(100)).unwrap();
        assert_eq!(source.get_value(0), Value::Integer(1));
        assert_eq!(alias.get_value(0), Value::Integer(100));
        assert!(!alias.shares_buffer(&source));
    }

    #[test]
    fn test_slice_does_not_mutate_buffer() {
        let mut v = ints(&[10, 20, 30, 40]);
        v.set_value(1, &Value::Null).unwrap();
        let original = v.clone();
        let sel = SelectionVector::from_indices(vec![3, 1]);
        v.slice(&sel, 2);
        assert!(v.shares_buffer(&original));
        assert_eq!(v.get_value(0), Value::Integer(40));
        assert_eq!(v.get_value(1), Value::Null);

        // slicing again composes the selections
        v.slice(&SelectionVector::from_indices(vec![1]), 1);
        assert_eq!(v.get_value(0), Value::Null);
    }

    #[test]
    fn test_normalify() {
        let mut v = Vector::constant(Value::Integer(7));
        v.normalify(3);
        assert_eq!(v.kind(), &VectorKind::Flat);
        assert_eq!(v.to_values(3), vec![Value::Integer(7); 3]);
        assert_eq!(v.validity().len(), v.capacity());

        let mut d = ints(&[1, 2, 3]);
        d.slice(&SelectionVector::from_indices(vec![2, 0]), 2);
        d.normalify(2);
        assert_eq!(d.data::<i32>().unwrap()[..2], [3, 1]);
    }

    #[test]
    fn test_copy_from_dictionary() {
        let mut source = ints(&[5, 6, 7]);
        source.set_value(2, &Value::Null).unwrap();
        source.slice(&SelectionVector::from_indices(vec![2, 1, 0]), 3);

        let mut target = Vector::new(LogicalType::Integer);
        target.copy_from(&source, 0, 4, 3).unwrap();
        assert_eq!(target.get_value(4), Value::Null);
        assert_eq!(target.get_value(5), Value::Integer(6));
        assert_eq!(target.get_value(6), Value::Integer(5));
    }

    #[test]
    fn test_set_value_casts() {
        let mut v = Vector::new(LogicalType::BigInt);
        v.set_value(0, &Value::Integer(3)).unwrap();
        assert_eq!(v.get_value(0), Value::BigInt(3));
    }

    #[test]
    fn test_write_into_constant_fails() {
        let mut v = Vector::constant(Value::Integer(1));
        assert!(v.set_value(0, &Value::Integer(2)).is_err());
    }
}
