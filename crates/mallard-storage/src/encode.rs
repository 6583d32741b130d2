use bytes::{Buf, BufMut};
use mallard_common::vector::PrimitiveType;
use mallard_common::Value;
use std::cmp::Ordering;

/// A fixed-width value that can be stored in a numeric segment
pub trait NumericType: PrimitiveType + Copy + PartialOrd + Default {
    /// Width of each element
    const WIDTH: usize;

    /// Encode current value to the end of a buffer.
    fn encode(&self, buffer: &mut impl BufMut);

    /// Decode a value from a bytes array.
    fn decode(buffer: &mut impl Buf) -> Self;

    fn to_value(self) -> Value;

    /// Extract a value that already has this type
    fn from_value(value: &Value) -> Option<Self>;

    /// Smallest representable value, the initial statistics maximum
    fn min_value() -> Self;

    /// Largest representable value, the initial statistics minimum
    fn max_value() -> Self;

    fn total_cmp(&self, other: &Self) -> Ordering;

    /// Read the `idx`-th element of a packed array
    fn read_at(data: &[u8], idx: usize) -> Self {
        let mut slice = &data[idx * Self::WIDTH..(idx + 1) * Self::WIDTH];
        Self::decode(&mut slice)
    }

    /// Overwrite the `idx`-th element of a packed array
    fn write_at(&self, data: &mut [u8], idx: usize) {
        let mut slice = &mut data[idx * Self::WIDTH..(idx + 1) * Self::WIDTH];
        self.encode(&mut slice);
    }
}

impl NumericType for bool {
    const WIDTH: usize = std::mem::size_of::<u8>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u8(*self as u8)
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u8() != 0
    }

    fn to_value(self) -> Value {
        Value::Boolean(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn min_value() -> Self {
        false
    }

    fn max_value() -> Self {
        true
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

macro_rules! impl_integer {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl NumericType for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn encode(&self, buffer: &mut impl BufMut) {
                buffer.$put(*self);
            }

            fn decode(buffer: &mut impl Buf) -> Self {
                buffer.$get()
            }

            fn to_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn min_value() -> Self {
                <$ty>::MIN
            }

            fn max_value() -> Self {
                <$ty>::MAX
            }

            fn total_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    };
}

impl_integer!(i8, TinyInt, put_i8, get_i8);
impl_integer!(i16, SmallInt, put_i16_le, get_i16_le);
impl_integer!(i32, Integer, put_i32_le, get_i32_le);
impl_integer!(i64, BigInt, put_i64_le, get_i64_le);
impl_integer!(i128, HugeInt, put_i128_le, get_i128_le);

macro_rules! impl_float {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl NumericType for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn encode(&self, buffer: &mut impl BufMut) {
                buffer.$put(*self);
            }

            fn decode(buffer: &mut impl Buf) -> Self {
                buffer.$get()
            }

            fn to_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn min_value() -> Self {
                <$ty>::MIN
            }

            fn max_value() -> Self {
                <$ty>::MAX
            }

            fn total_cmp(&self, other: &Self) -> Ordering {
                <$ty>::total_cmp(self, other)
            }
        }
    };
}

impl_float!(f32, Float, put_f32_le, get_f32_le);
impl_float!(f64, Double, put_f64_le, get_f64_le);

/// Runs `$body` with `$T` bound to the Rust type of a fixed-width physical
/// type; other physical types evaluate to an `InvalidType` error.
#[macro_export]
macro_rules! dispatch_numeric {
    ($physical:expr, $T:ident => $body:expr) => {{
        use mallard_common::PhysicalType as __P;
        match $physical {
            __P::Bool => {
                type $T = bool;
                $body
            }
            __P::Int8 => {
                type $T = i8;
                $body
            }
            __P::Int16 => {
                type $T = i16;
                $body
            }
            __P::Int32 => {
                type $T = i32;
                $body
            }
            __P::Int64 => {
                type $T = i64;
                $body
            }
            __P::Int128 => {
                type $T = i128;
                $body
            }
            __P::Float => {
                type $T = f32;
                $body
            }
            __P::Double => {
                type $T = f64;
                $body
            }
            other => Err(mallard_common::Error::invalid_type(
                other,
                "not a fixed-width numeric type",
            )),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_at() {
        let mut data = vec![0u8; 3 * i32::WIDTH];
        (-7i32).write_at(&mut data, 1);
        42i32.write_at(&mut data, 2);
        assert_eq!(i32::read_at(&data, 0), 0);
        assert_eq!(i32::read_at(&data, 1), -7);
        assert_eq!(i32::read_at(&data, 2), 42);
        assert_eq!(&data[4..8], &(-7i32).to_le_bytes());
    }

    #[test]
    fn test_widths() {
        assert_eq!(bool::WIDTH, 1);
        assert_eq!(i128::WIDTH, 16);
        assert_eq!(f32::WIDTH, 4);
    }

    #[test]
    fn test_float_total_order() {
        assert_eq!(f64::NAN.total_cmp(&1.0), Ordering::Greater);
        assert_eq!(NumericType::total_cmp(&1.5f32, &2.5f32), Ordering::Less);
    }

    #[test]
    fn test_dispatch() {
        fn width<T: NumericType>() -> mallard_common::Result<usize> {
            Ok(T::WIDTH)
        }
        let w = dispatch_numeric!(mallard_common::PhysicalType::Int64, T => width::<T>());
        assert_eq!(w.unwrap(), 8);
        let err = dispatch_numeric!(mallard_common::PhysicalType::Varchar, T => width::<T>());
        assert!(err.is_err());
    }
}
