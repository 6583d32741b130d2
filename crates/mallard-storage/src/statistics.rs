//! Per-segment statistics

use crate::encode::NumericType;
use crate::table_filter::TableFilter;
use mallard_common::{ComparisonType, PhysicalType, Result, Value};
use std::cmp::Ordering;

/// Running min/max/null-presence of the values stored in a segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStatistics {
    pub physical_type: PhysicalType,
    pub min: Value,
    pub max: Value,
    pub has_null: bool,
}

impl SegmentStatistics {
    /// Empty statistics: `min` starts at the type maximum and `max` at the
    /// type minimum so that the first value replaces both
    pub fn new(physical_type: PhysicalType) -> Result<Self> {
        crate::dispatch_numeric!(physical_type, T => Ok(Self::typed::<T>(physical_type)))
    }

    fn typed<T: NumericType>(physical_type: PhysicalType) -> Self {
        SegmentStatistics {
            physical_type,
            min: T::max_value().to_value(),
            max: T::min_value().to_value(),
            has_null: false,
        }
    }

    /// Returns true once at least one non-NULL value was recorded
    pub fn has_values(&self) -> bool {
        self.min.total_cmp(&self.max) != Ordering::Greater
    }

    /// Widens min/max to include `[min, max]`
    pub fn update_range<T: NumericType>(&mut self, min: T, max: T) {
        if T::from_value(&self.min).map_or(true, |cur| min.total_cmp(&cur) == Ordering::Less) {
            self.min = min.to_value();
        }
        if T::from_value(&self.max).map_or(true, |cur| max.total_cmp(&cur) == Ordering::Greater) {
            self.max = max.to_value();
        }
    }

    /// Widens min/max to include a single value
    pub fn update<T: NumericType>(&mut self, value: T) {
        self.update_range(value, value);
    }

    /// Whether a segment with these statistics can contain rows passing
    /// all of `filters` (constants must already have the segment type)
    pub fn check_zonemap(&self, filters: &[TableFilter]) -> bool {
        if !self.has_values() {
            return false;
        }
        filters.iter().all(|filter| {
            let c = &filter.constant;
            match filter.comparison {
                ComparisonType::Equal => {
                    self.min.total_cmp(c) != Ordering::Greater
                        && self.max.total_cmp(c) != Ordering::Less
                }
                ComparisonType::NotEqual => {
                    !(self.min.total_cmp(c) == Ordering::Equal
                        && self.max.total_cmp(c) == Ordering::Equal)
                }
                ComparisonType::LessThan => self.min.total_cmp(c) == Ordering::Less,
                ComparisonType::LessThanOrEqual => self.min.total_cmp(c) != Ordering::Greater,
                ComparisonType::GreaterThan => self.max.total_cmp(c) == Ordering::Greater,
                ComparisonType::GreaterThanOrEqual => self.max.total_cmp(c) != Ordering::Less,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let stats = SegmentStatistics::new(PhysicalType::Int32).unwrap();
        assert_eq!(stats.min, Value::Integer(i32::MAX));
        assert_eq!(stats.max, Value::Integer(i32::MIN));
        assert!(!stats.has_values());
        assert!(SegmentStatistics::new(PhysicalType::Varchar).is_err());
    }

    #[test]
    fn test_update() {
        let mut stats = SegmentStatistics::new(PhysicalType::Int32).unwrap();
        stats.update(5i32);
        stats.update_range(-3i32, 2i32);
        assert_eq!(stats.min, Value::Integer(-3));
        assert_eq!(stats.max, Value::Integer(5));
    }

    #[test]
    fn test_check_zonemap() {
        let mut stats = SegmentStatistics::new(PhysicalType::Int32).unwrap();
        assert!(!stats.check_zonemap(&[]));
        stats.update_range(10i32, 20i32);

        let f = |cmp, v: i32| TableFilter::new(0, cmp, v);
        assert!(stats.check_zonemap(&[f(ComparisonType::Equal, 15)]));
        assert!(!stats.check_zonemap(&[f(ComparisonType::Equal, 25)]));
        assert!(!stats.check_zonemap(&[f(ComparisonType::LessThan, 10)]));
        assert!(stats.check_zonemap(&[f(ComparisonType::LessThanOrEqual, 10)]));
        assert!(!stats.check_zonemap(&[f(ComparisonType::GreaterThan, 20)]));
        assert!(stats.check_zonemap(&[
            f(ComparisonType::GreaterThan, 5),
            f(ComparisonType::LessThan, 12)
        ]));
    }
}
