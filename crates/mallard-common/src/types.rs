//! Logical and physical type system for Mallard
//!
//! Every value has a `LogicalType` that determines how it is compared and
//! operated upon, and a `PhysicalType` that determines how it is laid out in
//! vectors and storage segments.

use std::fmt;

/// The logical type of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LogicalType {
    /// The NULL type - represents absence of value
    #[default]
    Null,
    /// Boolean (true/false)
    Boolean,
    /// 8-bit signed integer
    TinyInt,
    /// 16-bit signed integer
    SmallInt,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    BigInt,
    /// 128-bit signed integer
    HugeInt,
    /// 32-bit IEEE 754 floating point
    Float,
    /// 64-bit IEEE 754 floating point
    Double,
    /// Variable-length string (UTF-8)
    Varchar,
    /// Variable-length list of elements of the same type
    List(Box<LogicalType>),
    /// Struct with named fields
    Struct(Vec<(String, LogicalType)>),
}

/// The physical representation of a type inside vectors and segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Float,
    Double,
    Varchar,
    List,
    Struct,
    /// Used for the NULL type before it is resolved
    Invalid,
}

impl PhysicalType {
    /// Width in bytes of fixed-width types, `None` for variable-size types
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            PhysicalType::Bool | PhysicalType::Int8 => Some(1),
            PhysicalType::Int16 => Some(2),
            PhysicalType::Int32 | PhysicalType::Float => Some(4),
            PhysicalType::Int64 | PhysicalType::Double => Some(8),
            PhysicalType::Int128 => Some(16),
            PhysicalType::Varchar
            | PhysicalType::List
            | PhysicalType::Struct
            | PhysicalType::Invalid => None,
        }
    }

    /// Returns true for types a numeric storage segment can hold
    pub fn is_numeric(&self) -> bool {
        self.fixed_width().is_some()
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhysicalType::Bool => "BOOL",
            PhysicalType::Int8 => "INT8",
            PhysicalType::Int16 => "INT16",
            PhysicalType::Int32 => "INT32",
            PhysicalType::Int64 => "INT64",
            PhysicalType::Int128 => "INT128",
            PhysicalType::Float => "FLOAT",
            PhysicalType::Double => "DOUBLE",
            PhysicalType::Varchar => "VARCHAR",
            PhysicalType::List => "LIST",
            PhysicalType::Struct => "STRUCT",
            PhysicalType::Invalid => "INVALID",
        };
        write!(f, "{}", name)
    }
}

/// A binary comparison between two values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonType {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonType {
    /// Whether `left <op> right` holds given `left.cmp(right)`
    pub fn matches(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonType::Equal => ordering == Equal,
            ComparisonType::NotEqual => ordering != Equal,
            ComparisonType::LessThan => ordering == Less,
            ComparisonType::LessThanOrEqual => ordering != Greater,
            ComparisonType::GreaterThan => ordering == Greater,
            ComparisonType::GreaterThanOrEqual => ordering != Less,
        }
    }

    /// The comparison with its operands swapped: `a < b` is `b > a`
    pub fn flip(&self) -> ComparisonType {
        match self {
            ComparisonType::LessThan => ComparisonType::GreaterThan,
            ComparisonType::LessThanOrEqual => ComparisonType::GreaterThanOrEqual,
            ComparisonType::GreaterThan => ComparisonType::LessThan,
            ComparisonType::GreaterThanOrEqual => ComparisonType::LessThanOrEqual,
            other => *other,
        }
    }
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonType::Equal => "=",
            ComparisonType::NotEqual => "<>",
            ComparisonType::LessThan => "<",
            ComparisonType::LessThanOrEqual => "<=",
            ComparisonType::GreaterThan => ">",
            ComparisonType::GreaterThanOrEqual => ">=",
        };
        write!(f, "{}", op)
    }
}

impl LogicalType {
    /// The physical layout used for this type
    pub fn physical_type(&self) -> PhysicalType {
        match self {
            LogicalType::Null => PhysicalType::Invalid,
            LogicalType::Boolean => PhysicalType::Bool,
            LogicalType::TinyInt => PhysicalType::Int8,
            LogicalType::SmallInt => PhysicalType::Int16,
            LogicalType::Integer => PhysicalType::Int32,
            LogicalType::BigInt => PhysicalType::Int64,
            LogicalType::HugeInt => PhysicalType::Int128,
            LogicalType::Float => PhysicalType::Float,
            LogicalType::Double => PhysicalType::Double,
            LogicalType::Varchar => PhysicalType::Varchar,
            LogicalType::List(_) => PhysicalType::List,
            LogicalType::Struct(_) => PhysicalType::Struct,
        }
    }

    /// Returns true if this type is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::TinyInt
                | LogicalType::SmallInt
                | LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::HugeInt
                | LogicalType::Float
                | LogicalType::Double
        )
    }

    /// Returns true if this type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::TinyInt
                | LogicalType::SmallInt
                | LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::HugeInt
        )
    }

    /// Returns true if this type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(self, LogicalType::Float | LogicalType::Double)
    }

    /// Returns true if this type is a nested type (list, struct)
    pub fn is_nested(&self) -> bool {
        matches!(self, LogicalType::List(_) | LogicalType::Struct(_))
    }

    /// Returns the size in bytes for fixed-size types, None for variable-size
    pub fn physical_size(&self) -> Option<usize> {
        self.physical_type().fixed_width()
    }

    /// Try to find a common supertype for two types
    pub fn common_supertype(&self, other: &LogicalType) -> Option<LogicalType> {
        if self == other {
            return Some(self.clone());
        }

        // NULL can be cast to any type
        if *self == LogicalType::Null {
            return Some(other.clone());
        }
        if *other == LogicalType::Null {
            return Some(self.clone());
        }

        if self.is_numeric() && other.is_numeric() {
            return Some(self.promote_numeric(other));
        }

        None
    }

    /// Promote two numeric types to a common type
    fn promote_numeric(&self, other: &LogicalType) -> LogicalType {
        if self.is_floating_point() || other.is_floating_point() {
            return LogicalType::Double;
        }

        let self_size = self.physical_size().unwrap_or(0);
        let other_size = other.physical_size().unwrap_or(0);

        if self_size >= other_size {
            self.clone()
        } else {
            other.clone()
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Null => write!(f, "NULL"),
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::TinyInt => write!(f, "TINYINT"),
            LogicalType::SmallInt => write!(f, "SMALLINT"),
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::BigInt => write!(f, "BIGINT"),
            LogicalType::HugeInt => write!(f, "HUGEINT"),
            LogicalType::Float => write!(f, "FLOAT"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::Varchar => write!(f, "VARCHAR"),
            LogicalType::List(inner) => write!(f, "{}[]", inner),
            LogicalType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", name, ty)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric() {
        assert!(LogicalType::Integer.is_numeric());
        assert!(LogicalType::Double.is_numeric());
        assert!(!LogicalType::Varchar.is_numeric());
        assert!(!LogicalType::Boolean.is_numeric());
    }

    #[test]
    fn test_physical_type() {
        assert_eq!(LogicalType::Boolean.physical_type(), PhysicalType::Bool);
        assert_eq!(LogicalType::Integer.physical_type(), PhysicalType::Int32);
        assert_eq!(LogicalType::HugeInt.physical_size(), Some(16));
        assert_eq!(LogicalType::Varchar.physical_size(), None);
        assert!(!PhysicalType::List.is_numeric());
    }

    #[test]
    fn test_common_supertype() {
        assert_eq!(
            LogicalType::Integer.common_supertype(&LogicalType::BigInt),
            Some(LogicalType::BigInt)
        );
        assert_eq!(
            LogicalType::Integer.common_supertype(&LogicalType::Float),
            Some(LogicalType::Double)
        );
        assert_eq!(LogicalType::Integer.common_supertype(&LogicalType::Varchar), None);
    }

    #[test]
    fn test_comparison_type() {
        use std::cmp::Ordering;
        assert!(ComparisonType::LessThanOrEqual.matches(Ordering::Equal));
        assert!(!ComparisonType::GreaterThan.matches(Ordering::Equal));
        assert_eq!(ComparisonType::LessThan.flip(), ComparisonType::GreaterThan);
        assert_eq!(ComparisonType::Equal.flip(), ComparisonType::Equal);
    }

    #[test]
    fn test_display() {
        assert_eq!(LogicalType::Integer.to_string(), "INTEGER");
        assert_eq!(
            LogicalType::List(Box::new(LogicalType::Integer)).to_string(),
            "INTEGER[]"
        );
    }
}
