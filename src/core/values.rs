//! In-memory symbol table of `(metric key, period) -> value` used during a recompute.
//!
//! The table remembers where each value came from and which slots failed, so that
//! downstream formulas can tell a missing input from a failed one. Ordered maps keep
//! iteration deterministic, which is what makes persisted output reproducible.

use crate::core::period::Period;
use crate::entities::ValueSource;
use std::collections::{BTreeMap, BTreeSet};

/// A value held in the table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    /// Current value
    pub value: f64,
    /// Computed or overridden
    pub source: ValueSource,
}

/// Symbol table for one recompute run
#[derive(Debug, Default)]
pub struct ValueTable {
    values: BTreeMap<Period, BTreeMap<String, Slot>>,
    failed: BTreeMap<Period, BTreeSet<String>>,
}

impl ValueTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a computed value, clearing any failure mark for the slot.
    pub fn set_computed(&mut self, key: &str, period: Period, value: f64) {
        self.set(key, period, value, ValueSource::Computed);
    }

    /// Stores an override. Always wins, including over a failed computation.
    pub fn set_overridden(&mut self, key: &str, period: Period, value: f64) {
        self.set(key, period, value, ValueSource::Overridden);
    }

    fn set(&mut self, key: &str, period: Period, value: f64, source: ValueSource) {
        if let Some(failed) = self.failed.get_mut(&period) {
            failed.remove(key);
        }
        self.values
            .entry(period)
            .or_default()
            .insert(key.to_string(), Slot { value, source });
    }

    /// Marks a slot as failed and drops any value it held.
    pub fn mark_failed(&mut self, key: &str, period: Period) {
        if let Some(values) = self.values.get_mut(&period) {
            values.remove(key);
        }
        self.failed
            .entry(period)
            .or_default()
            .insert(key.to_string());
    }

    /// The value of `key` in `period`, if one is available.
    #[must_use]
    pub fn value(&self, key: &str, period: Period) -> Option<f64> {
        self.slot(key, period).map(|slot| slot.value)
    }

    /// The full slot of `key` in `period`.
    #[must_use]
    pub fn slot(&self, key: &str, period: Period) -> Option<&Slot> {
        self.values.get(&period)?.get(key)
    }

    /// Whether the computation of `key` in `period` failed.
    #[must_use]
    pub fn is_failed(&self, key: &str, period: Period) -> bool {
        self.failed
            .get(&period)
            .is_some_and(|failed| failed.contains(key))
    }

    /// All slots that belong to `year`, ordered by month then key.
    pub fn year_slots(&self, year: i32) -> impl Iterator<Item = (Period, &str, &Slot)> {
        self.values
            .iter()
            .filter(move |(period, _)| period.year() == year)
            .flat_map(|(period, slots)| {
                slots
                    .iter()
                    .map(move |(key, slot)| (*period, key.as_str(), slot))
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_override_replaces_failure() {
        let period = Period::new(2026, 1).unwrap();
        let mut table = ValueTable::new();

        table.mark_failed("mrr", period);
        assert!(table.is_failed("mrr", period));
        assert_eq!(table.value("mrr", period), None);

        table.set_overridden("mrr", period, 120_000.0);
        assert!(!table.is_failed("mrr", period));
        let slot = table.slot("mrr", period).unwrap();
        assert_eq!(slot.value, 120_000.0);
        assert_eq!(slot.source, ValueSource::Overridden);
    }

    #[test]
    fn test_mark_failed_drops_value() {
        let period = Period::new(2026, 2).unwrap();
        let mut table = ValueTable::new();
        table.set_computed("mrr", period, 1.0);
        table.mark_failed("mrr", period);
        assert_eq!(table.value("mrr", period), None);
    }

    #[test]
    fn test_year_slots_filters_and_orders() {
        let mut table = ValueTable::new();
        let december = Period::new(2025, 12).unwrap();
        let february = Period::new(2026, 2).unwrap();
        let january = Period::new(2026, 1).unwrap();
        table.set_computed("mrr", december, 1.0);
        table.set_computed("revenue", february, 2.0);
        table.set_computed("mrr", february, 3.0);
        table.set_computed("mrr", january, 4.0);

        let slots: Vec<(Period, &str, f64)> = table
            .year_slots(2026)
            .map(|(period, key, slot)| (period, key, slot.value))
            .collect();
        assert_eq!(
            slots,
            vec![
                (january, "mrr", 4.0),
                (february, "mrr", 3.0),
                (february, "revenue", 2.0),
            ]
        );
    }
}
