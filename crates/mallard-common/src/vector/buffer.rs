//! Physical storage behind a vector

use crate::error::{Error, Result};
use crate::types::PhysicalType;
use crate::value::Value;

/// Flat per-row storage, one variant per physical type.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorBuffer {
    /// Storage of the NULL type; every row reads as NULL
    Null(usize),
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int128(Vec<i128>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Varchar(Vec<String>),
    /// Lists and structs keep one nested `Value` per row
    Nested(Vec<Value>),
}

macro_rules! for_each_buffer {
    ($buffer:expr, $v:ident => $body:expr, null($n:ident) => $null:expr) => {
        match $buffer {
            VectorBuffer::Null($n) => $null,
            VectorBuffer::Bool($v) => $body,
            VectorBuffer::Int8($v) => $body,
            VectorBuffer::Int16($v) => $body,
            VectorBuffer::Int32($v) => $body,
            VectorBuffer::Int64($v) => $body,
            VectorBuffer::Int128($v) => $body,
            VectorBuffer::Float($v) => $body,
            VectorBuffer::Double($v) => $body,
            VectorBuffer::Varchar($v) => $body,
            VectorBuffer::Nested($v) => $body,
        }
    };
}

impl VectorBuffer {
    /// Allocates `capacity` default-initialized rows of `physical_type`
    pub fn new(physical_type: PhysicalType, capacity: usize) -> Self {
        match physical_type {
            PhysicalType::Invalid => VectorBuffer::Null(capacity),
            PhysicalType::Bool => VectorBuffer::Bool(vec![false; capacity]),
            PhysicalType::Int8 => VectorBuffer::Int8(vec![0; capacity]),
            PhysicalType::Int16 => VectorBuffer::Int16(vec![0; capacity]),
            PhysicalType::Int32 => VectorBuffer::Int32(vec![0; capacity]),
            PhysicalType::Int64 => VectorBuffer::Int64(vec![0; capacity]),
            PhysicalType::Int128 => VectorBuffer::Int128(vec![0; capacity]),
            PhysicalType::Float => VectorBuffer::Float(vec![0.0; capacity]),
            PhysicalType::Double => VectorBuffer::Double(vec![0.0; capacity]),
            PhysicalType::Varchar => VectorBuffer::Varchar(vec![String::new(); capacity]),
            PhysicalType::List | PhysicalType::Struct => {
                VectorBuffer::Nested(vec![Value::Null; capacity])
            }
        }
    }

    /// Number of physical rows
    pub fn len(&self) -> usize {
        for_each_buffer!(self, v => v.len(), null(n) => *n)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the physical variant, used in error messages
    pub fn variant_name(&self) -> &'static str {
        match self {
            VectorBuffer::Null(_) => "NULL",
            VectorBuffer::Bool(_) => "BOOL",
            VectorBuffer::Int8(_) => "INT8",
            VectorBuffer::Int16(_) => "INT16",
            VectorBuffer::Int32(_) => "INT32",
            VectorBuffer::Int64(_) => "INT64",
            VectorBuffer::Int128(_) => "INT128",
            VectorBuffer::Float(_) => "FLOAT",
            VectorBuffer::Double(_) => "DOUBLE",
            VectorBuffer::Varchar(_) => "VARCHAR",
            VectorBuffer::Nested(_) => "NESTED",
        }
    }

    /// Reads the raw value of slot `idx`, ignoring validity
    pub fn get_value(&self, idx: usize) -> Value {
        match self {
            VectorBuffer::Null(_) => Value::Null,
            VectorBuffer::Bool(v) => Value::Boolean(v[idx]),
            VectorBuffer::Int8(v) => Value::TinyInt(v[idx]),
            VectorBuffer::Int16(v) => Value::SmallInt(v[idx]),
            VectorBuffer::Int32(v) => Value::Integer(v[idx]),
            VectorBuffer::Int64(v) => Value::BigInt(v[idx]),
            VectorBuffer::Int128(v) => Value::HugeInt(v[idx]),
            VectorBuffer::Float(v) => Value::Float(v[idx]),
            VectorBuffer::Double(v) => Value::Double(v[idx]),
            VectorBuffer::Varchar(v) => Value::Varchar(v[idx].clone()),
            VectorBuffer::Nested(v) => v[idx].clone(),
        }
    }

    /// Writes a non-NULL value that already has this buffer's physical type
    pub fn set_value(&mut self, idx: usize, value: &Value) -> Result<()> {
        match (self, value) {
            (VectorBuffer::Null(_), _) => {}
            (VectorBuffer::Bool(v), Value::Boolean(x)) => v[idx] = *x,
            (VectorBuffer::Int8(v), Value::TinyInt(x)) => v[idx] = *x,
            (VectorBuffer::Int16(v), Value::SmallInt(x)) => v[idx] = *x,
            (VectorBuffer::Int32(v), Value::Integer(x)) => v[idx] = *x,
            (VectorBuffer::Int64(v), Value::BigInt(x)) => v[idx] = *x,
            (VectorBuffer::Int128(v), Value::HugeInt(x)) => v[idx] = *x,
            (VectorBuffer::Float(v), Value::Float(x)) => v[idx] = *x,
            (VectorBuffer::Double(v), Value::Double(x)) => v[idx] = *x,
            (VectorBuffer::Varchar(v), Value::Varchar(x)) => v[idx] = x.clone(),
            (VectorBuffer::Nested(v), x @ (Value::List(_) | Value::Struct(_))) => v[idx] = x.clone(),
            (buffer, value) => {
                return Err(Error::TypeMismatch {
                    expected: buffer.variant_name().to_string(),
                    got: value.logical_type().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Copies slot `src_idx` of `src` into slot `dst_idx` of `self`
    pub fn copy_row(&mut self, dst_idx: usize, src: &VectorBuffer, src_idx: usize) -> Result<()> {
        match (self, src) {
            (VectorBuffer::Null(_), VectorBuffer::Null(_)) => {}
            (VectorBuffer::Bool(d), VectorBuffer::Bool(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Int8(d), VectorBuffer::Int8(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Int16(d), VectorBuffer::Int16(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Int32(d), VectorBuffer::Int32(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Int64(d), VectorBuffer::Int64(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Int128(d), VectorBuffer::Int128(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Float(d), VectorBuffer::Float(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Double(d), VectorBuffer::Double(s)) => d[dst_idx] = s[src_idx],
            (VectorBuffer::Varchar(d), VectorBuffer::Varchar(s)) => d[dst_idx] = s[src_idx].clone(),
            (VectorBuffer::Nested(d), VectorBuffer::Nested(s)) => d[dst_idx] = s[src_idx].clone(),
            (dst, src) => {
                return Err(Error::TypeMismatch {
                    expected: dst.variant_name().to_string(),
                    got: src.variant_name().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Builds a new buffer of `capacity` rows whose first `count` rows are
    /// the slots `index(0..count)` of `self`
    pub fn gather(&self, count: usize, capacity: usize, index: impl Fn(usize) -> usize) -> VectorBuffer {
        fn pick<T: Clone + Default>(v: &[T], count: usize, capacity: usize, index: impl Fn(usize) -> usize) -> Vec<T> {
            let mut out = Vec::with_capacity(capacity.max(count));
            out.extend((0..count).map(|i| v[index(i)].clone()));
            out.resize(capacity.max(count), T::default());
            out
        }
        let capacity = capacity.max(count);
        match self {
            VectorBuffer::Null(_) => VectorBuffer::Null(capacity),
            VectorBuffer::Bool(v) => VectorBuffer::Bool(pick(v, count, capacity, index)),
            VectorBuffer::Int8(v) => VectorBuffer::Int8(pick(v, count, capacity, index)),
            VectorBuffer::Int16(v) => VectorBuffer::Int16(pick(v, count, capacity, index)),
            VectorBuffer::Int32(v) => VectorBuffer::Int32(pick(v, count, capacity, index)),
            VectorBuffer::Int64(v) => VectorBuffer::Int64(pick(v, count, capacity, index)),
            VectorBuffer::Int128(v) => VectorBuffer::Int128(pick(v, count, capacity, index)),
            VectorBuffer::Float(v) => VectorBuffer::Float(pick(v, count, capacity, index)),
            VectorBuffer::Double(v) => VectorBuffer::Double(pick(v, count, capacity, index)),
            VectorBuffer::Varchar(v) => VectorBuffer::Varchar(pick(v, count, capacity, index)),
            VectorBuffer::Nested(v) => VectorBuffer::Nested(pick(v, count, capacity, index)),
        }
    }
}

/// Rust types that are stored directly in a `VectorBuffer` variant.
pub trait PrimitiveType: Clone + Send + Sync + 'static {
    const PHYSICAL_TYPE: PhysicalType;

    fn slice(buffer: &VectorBuffer) -> Option<&[Self]>;

    fn slice_mut(buffer: &mut VectorBuffer) -> Option<&mut [Self]>;
}

macro_rules! impl_primitive {
    ($ty:ty, $variant:ident, $physical:ident) => {
        impl PrimitiveType for $ty {
            const PHYSICAL_TYPE: PhysicalType = PhysicalType::$physical;

            fn slice(buffer: &VectorBuffer) -> Option<&[Self]> {
                match buffer {
                    VectorBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut VectorBuffer) -> Option<&mut [Self]> {
                match buffer {
                    VectorBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_primitive!(bool, Bool, Bool);
impl_primitive!(i8, Int8, Int8);
impl_primitive!(i16, Int16, Int16);
impl_primitive!(i32, Int32, Int32);
impl_primitive!(i64, Int64, Int64);
impl_primitive!(i128, Int128, Int128);
impl_primitive!(f32, Float, Float);
impl_primitive!(f64, Double, Double);
impl_primitive!(String, Varchar, Varchar);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut buffer = VectorBuffer::new(PhysicalType::Int32, 4);
        buffer.set_value(2, &Value::Integer(9)).unwrap();
        assert_eq!(buffer.get_value(2), Value::Integer(9));
        assert!(buffer.set_value(1, &Value::BigInt(1)).is_err());
        assert_eq!(i32::slice(&buffer), Some(&[0, 0, 9, 0][..]));
        assert!(i64::slice(&buffer).is_none());
    }

    #[test]
    fn test_gather() {
        let buffer = VectorBuffer::Varchar(vec!["a".into(), "b".into(), "c".into()]);
        let gathered = buffer.gather(2, 4, |i| 2 - i);
        assert_eq!(gathered.len(), 4);
        assert_eq!(gathered.get_value(0), Value::from("c"));
        assert_eq!(gathered.get_value(1), Value::from("b"));
    }
}
