//! Runtime value representation for Mallard
//!
//! The `Value` enum represents a single value outside of a vector. It's used for:
//! - Constant expressions and filter constants
//! - Segment statistics (min/max)
//! - Group and join keys
//! - Row values when materializing results

use crate::error::{Error, Result};
use crate::types::LogicalType;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime value representation
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// NULL value
    #[default]
    Null,

    /// Boolean value
    Boolean(bool),

    /// 8-bit signed integer
    TinyInt(i8),
    /// 16-bit signed integer
    SmallInt(i16),
    /// 32-bit signed integer
    Integer(i32),
    /// 64-bit signed integer
    BigInt(i64),
    /// 128-bit signed integer
    HugeInt(i128),

    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),

    /// Variable-length string
    Varchar(String),

    /// List of values
    List(Vec<Value>),
    /// Struct with named fields
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Returns the logical type of this value
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Null,
            Value::Boolean(_) => LogicalType::Boolean,
            Value::TinyInt(_) => LogicalType::TinyInt,
            Value::SmallInt(_) => LogicalType::SmallInt,
            Value::Integer(_) => LogicalType::Integer,
            Value::BigInt(_) => LogicalType::BigInt,
            Value::HugeInt(_) => LogicalType::HugeInt,
            Value::Float(_) => LogicalType::Float,
            Value::Double(_) => LogicalType::Double,
            Value::Varchar(_) => LogicalType::Varchar,
            Value::List(values) => {
                let element_type = values
                    .first()
                    .map(|v| v.logical_type())
                    .unwrap_or(LogicalType::Null);
                LogicalType::List(Box::new(element_type))
            }
            Value::Struct(fields) => {
                let field_types: Vec<(String, LogicalType)> = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.logical_type()))
                    .collect();
                LogicalType::Struct(field_types)
            }
        }
    }

    /// Returns true if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to convert this value to a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::TinyInt(i) => Some(*i != 0),
            Value::SmallInt(i) => Some(*i != 0),
            Value::Integer(i) => Some(*i != 0),
            Value::BigInt(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i128, the widest integer representation
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Boolean(b) => Some(*b as i128),
            Value::TinyInt(i) => Some(*i as i128),
            Value::SmallInt(i) => Some(*i as i128),
            Value::Integer(i) => Some(*i as i128),
            Value::BigInt(i) => Some(*i as i128),
            Value::HugeInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to convert this value to an i64
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Try to convert this value to an f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f as f64),
            Value::Double(f) => Some(*f),
            other => other.as_i128().map(|i| i as f64),
        }
    }

    /// Try to convert this value to a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }

    /// Total ordering used for sorting and statistics.
    ///
    /// NULL sorts first, numeric values compare across widths, floats use
    /// `total_cmp` so NaN has a defined position.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Float(_) | Value::Double(_), _) | (_, Value::Float(_) | Value::Double(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => self.type_rank().cmp(&other.type_rank()),
                }
            }
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => compare_sequences(a.iter(), b.iter()),
            (Value::Struct(a), Value::Struct(b)) => {
                compare_sequences(a.iter().map(|(_, v)| v), b.iter().map(|(_, v)| v))
            }
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.type_rank().cmp(&other.type_rank()),
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_)
            | Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Integer(_)
            | Value::BigInt(_)
            | Value::HugeInt(_)
            | Value::Float(_)
            | Value::Double(_) => 1,
            Value::Varchar(_) => 2,
            Value::List(_) => 3,
            Value::Struct(_) => 4,
        }
    }

    /// Cast this value to the target type.
    ///
    /// NULL casts to NULL of any type. Integer narrowing that does not fit
    /// fails with `InvalidCast`.
    pub fn try_cast(&self, target: &LogicalType) -> Result<Value> {
        if self.is_null() || *target == LogicalType::Null {
            return Ok(Value::Null);
        }
        if self.logical_type() == *target {
            return Ok(self.clone());
        }
        let fail = || Error::InvalidCast {
            from: self.logical_type().to_string(),
            to: target.to_string(),
        };

        match (self, target) {
            (Value::List(_), LogicalType::List(_)) | (Value::Struct(_), LogicalType::Struct(_)) => {
                return Ok(self.clone())
            }
            _ => {}
        }

        if let Value::Varchar(s) = self {
            return Self::parse_varchar(s, target).ok_or_else(fail);
        }

        let cast = match target {
            LogicalType::Boolean => self.as_bool().map(Value::Boolean),
            LogicalType::TinyInt => self.integral().and_then(|v| i8::try_from(v).ok()).map(Value::TinyInt),
            LogicalType::SmallInt => {
                self.integral().and_then(|v| i16::try_from(v).ok()).map(Value::SmallInt)
            }
            LogicalType::Integer => {
                self.integral().and_then(|v| i32::try_from(v).ok()).map(Value::Integer)
            }
            LogicalType::BigInt => self.integral().and_then(|v| i64::try_from(v).ok()).map(Value::BigInt),
            LogicalType::HugeInt => self.integral().map(Value::HugeInt),
            LogicalType::Float => self.as_f64().map(|f| Value::Float(f as f32)),
            LogicalType::Double => self.as_f64().map(Value::Double),
            LogicalType::Varchar => Some(Value::Varchar(self.to_string())),
            _ => None,
        };
        cast.ok_or_else(fail)
    }

    /// Integer view of a numeric value; floats are rounded to nearest
    fn integral(&self) -> Option<i128> {
        match self {
            Value::Float(f) => float_to_i128(*f as f64),
            Value::Double(f) => float_to_i128(*f),
            other => other.as_i128(),
        }
    }

    fn parse_varchar(s: &str, target: &LogicalType) -> Option<Value> {
        let s = s.trim();
        match target {
            LogicalType::Boolean => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Boolean(true)),
                "false" | "f" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            LogicalType::TinyInt => s.parse().ok().map(Value::TinyInt),
            LogicalType::SmallInt => s.parse().ok().map(Value::SmallInt),
            LogicalType::Integer => s.parse().ok().map(Value::Integer),
            LogicalType::BigInt => s.parse().ok().map(Value::BigInt),
            LogicalType::HugeInt => s.parse().ok().map(Value::HugeInt),
            LogicalType::Float => s.parse().ok().map(Value::Float),
            LogicalType::Double => s.parse().ok().map(Value::Double),
            _ => None,
        }
    }
}

fn float_to_i128(f: f64) -> Option<i128> {
    if f.is_finite() && f >= i128::MIN as f64 && f <= i128::MAX as f64 {
        Some(f.round() as i128)
    } else {
        None
    }
}

fn compare_sequences<'a>(
    mut a: impl Iterator<Item = &'a Value>,
    mut b: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.total_cmp(y) {
                Ordering::Equal => continue,
                ord => return ord,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::TinyInt(a), Value::TinyInt(b)) => a == b,
            (Value::SmallInt(a), Value::SmallInt(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::HugeInt(a), Value::HugeInt(b)) => a == b,
            // bitwise so that Eq and Hash agree for NaN
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::TinyInt(i) => i.hash(state),
            Value::SmallInt(i) => i.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::BigInt(i) => i.hash(state),
            Value::HugeInt(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Double(f) => f.to_bits().hash(state),
            Value::Varchar(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Struct(fields) => fields.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Some(self.total_cmp(other)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            _ if self.type_rank() == other.type_rank() => Some(self.total_cmp(other)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(i) => write!(f, "{}", i),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::HugeInt(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Varchar(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i8> for Value {
    fn from(i: i8) -> Self {
        Value::TinyInt(i)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::SmallInt(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::BigInt(i)
    }
}

impl From<i128> for Value {
    fn from(i: i128) -> Self {
        Value::HugeInt(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Varchar(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Varchar(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_type() {
        assert_eq!(Value::Integer(42).logical_type(), LogicalType::Integer);
        assert_eq!(
            Value::Varchar("hello".to_string()).logical_type(),
            LogicalType::Varchar
        );
        assert_eq!(Value::Null.logical_type(), LogicalType::Null);
    }

    #[test]
    fn test_value_comparison() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Varchar("a".to_string()) < Value::Varchar("b".to_string()));
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Integer(3).total_cmp(&Value::BigInt(3)), Ordering::Equal);
        assert_eq!(Value::Null.total_cmp(&Value::Integer(-5)), Ordering::Less);
        assert_eq!(Value::Double(2.5).total_cmp(&Value::Integer(2)), Ordering::Greater);
    }

    #[test]
    fn test_value_hash_floats() {
        let mut set = HashSet::new();
        set.insert(Value::Double(f64::NAN));
        set.insert(Value::Double(f64::NAN));
        set.insert(Value::Double(1.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_try_cast() {
        assert_eq!(
            Value::Integer(7).try_cast(&LogicalType::BigInt).unwrap(),
            Value::BigInt(7)
        );
        assert_eq!(
            Value::from("12").try_cast(&LogicalType::Integer).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            Value::Double(2.6).try_cast(&LogicalType::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(Value::Integer(300).try_cast(&LogicalType::TinyInt).is_err());
        assert!(Value::from("abc").try_cast(&LogicalType::Integer).is_err());
        assert_eq!(Value::Null.try_cast(&LogicalType::Integer).unwrap(), Value::Null);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::Varchar("hello".to_string()).to_string(), "hello");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(
            Value::List(vec![Value::Integer(1), Value::Null]).to_string(),
            "[1, NULL]"
        );
    }

    #[test]
    fn test_from_conversions() {
        let v: Value = 42.into();
        assert_eq!(v, Value::Integer(42));

        let v: Value = "hello".into();
        assert_eq!(v, Value::Varchar("hello".to_string()));

        let v: Value = Option::<i32>::None.into();
        assert!(v.is_null());
    }
}
