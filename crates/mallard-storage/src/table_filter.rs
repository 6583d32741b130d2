//! Filters pushed down into table scans

use mallard_common::{ComparisonType, Error, LogicalType, Result, Value};
use std::fmt;

/// `column <comparison> constant`, evaluated inside the storage layer
#[derive(Debug, Clone, PartialEq)]
pub struct TableFilter {
    pub column_index: usize,
    pub comparison: ComparisonType,
    pub constant: Value,
}

impl TableFilter {
    pub fn new(column_index: usize, comparison: ComparisonType, constant: impl Into<Value>) -> Self {
        TableFilter {
            column_index,
            comparison,
            constant: constant.into(),
        }
    }

    /// Whether a non-NULL `value` passes the filter
    pub fn matches(&self, value: &Value) -> bool {
        !value.is_null() && self.comparison.matches(value.total_cmp(&self.constant))
    }

    /// The filter with its constant cast to the column type
    pub fn cast_to(&self, column_type: &LogicalType) -> Result<TableFilter> {
        if self.constant.is_null() {
            return Err(Error::invalid_type(
                column_type,
                "filter constant cannot be NULL",
            ));
        }
        let constant = self.constant.try_cast(column_type).map_err(|_| {
            Error::invalid_type(
                column_type,
                format!("filter constant {} does not match the column", self.constant),
            )
        })?;
        Ok(TableFilter {
            column_index: self.column_index,
            comparison: self.comparison,
            constant,
        })
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.column_index, self.comparison, self.constant)
    }
}

/// Shape of the filters accepted by a segment `select`
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FilterShape<'a> {
    /// One comparison
    Single(&'a TableFilter),
    /// A lower bound (`>`/`>=`) and an upper bound (`<`/`<=`)
    Between {
        lower: &'a TableFilter,
        upper: &'a TableFilter,
    },
}

impl<'a> FilterShape<'a> {
    /// Classifies a filter list, accepting the two bounds in either order
    pub(crate) fn classify(filters: &'a [TableFilter]) -> Result<FilterShape<'a>> {
        let is_lower = |f: &TableFilter| {
            matches!(
                f.comparison,
                ComparisonType::GreaterThan | ComparisonType::GreaterThanOrEqual
            )
        };
        let is_upper = |f: &TableFilter| {
            matches!(
                f.comparison,
                ComparisonType::LessThan | ComparisonType::LessThanOrEqual
            )
        };
        match filters {
            [single] if single.comparison != ComparisonType::NotEqual => {
                Ok(FilterShape::Single(single))
            }
            [a, b] if is_lower(a) && is_upper(b) => Ok(FilterShape::Between { lower: a, upper: b }),
            [a, b] if is_upper(a) && is_lower(b) => Ok(FilterShape::Between { lower: b, upper: a }),
            _ => Err(Error::NotImplemented(format!(
                "segment select with filters [{}]",
                filters
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_excludes_null() {
        let filter = TableFilter::new(0, ComparisonType::GreaterThan, 5);
        assert!(filter.matches(&Value::Integer(6)));
        assert!(!filter.matches(&Value::Integer(5)));
        assert!(!filter.matches(&Value::Null));
    }

    #[test]
    fn test_cast_to() {
        let filter = TableFilter::new(0, ComparisonType::Equal, 3);
        let cast = filter.cast_to(&LogicalType::BigInt).unwrap();
        assert_eq!(cast.constant, Value::BigInt(3));

        let bad = TableFilter::new(0, ComparisonType::Equal, "abc");
        assert!(matches!(
            bad.cast_to(&LogicalType::Integer),
            Err(Error::InvalidType { .. })
        ));
    }

    #[test]
    fn test_classify() {
        let lower = TableFilter::new(0, ComparisonType::GreaterThan, 5);
        let upper = TableFilter::new(0, ComparisonType::LessThanOrEqual, 20);

        let pair = [upper.clone(), lower.clone()];
        match FilterShape::classify(&pair).unwrap() {
            FilterShape::Between { lower: l, upper: u } => {
                assert_eq!(l, &lower);
                assert_eq!(u, &upper);
            }
            other => panic!("unexpected shape {:?}", other),
        }

        let two_lower = [lower.clone(), lower];
        assert!(matches!(
            FilterShape::classify(&two_lower),
            Err(Error::NotImplemented(_))
        ));
        assert!(FilterShape::classify(&[]).is_err());
    }
}
