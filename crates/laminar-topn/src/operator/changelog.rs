//! Changelog records emitted by the Top-N operator.
//!
//! Downstream consumers apply these in order to reconstruct the visible
//! Top-N result. Operations map to Z-set weights:
//! - `Insert`: +1 weight
//! - `Delete`: -1 weight
//! - `UpdateBefore`: -1 weight (first half of update)
//! - `UpdateAfter`: +1 weight (second half of update)

use super::Event;

/// CDC operation type for changelog records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdcOperation {
    /// Insert a new record (+1 weight)
    Insert,
    /// Delete an existing record (-1 weight)
    Delete,
    /// Retraction of previous value before update (-1 weight)
    UpdateBefore,
    /// New value after update (+1 weight)
    UpdateAfter,
}

impl CdcOperation {
    /// Returns the Z-set weight for this operation.
    #[must_use]
    pub fn weight(&self) -> i32 {
        match self {
            Self::Insert | Self::UpdateAfter => 1,
            Self::Delete | Self::UpdateBefore => -1,
        }
    }

    /// Returns true if this is an insert-type operation.
    #[must_use]
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert | Self::UpdateAfter)
    }

    /// Returns true if this is a delete-type operation.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::UpdateBefore)
    }

    /// Short code used in logs and test fixtures (`+I`, `-D`, `-U`, `+U`).
    #[must_use]
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Insert => "+I",
            Self::Delete => "-D",
            Self::UpdateBefore => "-U",
            Self::UpdateAfter => "+U",
        }
    }
}

/// A changelog record with Z-set weight.
///
/// `rank` is populated only when the operator is configured to output rank
/// numbers.
#[derive(Debug, Clone)]
pub struct ChangelogRecord {
    /// The CDC operation type
    pub operation: CdcOperation,
    /// Z-set weight (+1 for insert, -1 for delete)
    pub weight: i32,
    /// Timestamp when this change was emitted
    pub emit_timestamp: i64,
    /// 1-based rank of the row, when rank numbers are output
    pub rank: Option<u64>,
    /// The event data
    pub event: Event,
}

impl ChangelogRecord {
    /// Creates a changelog record from raw parts.
    #[must_use]
    pub fn new(operation: CdcOperation, event: Event, emit_timestamp: i64) -> Self {
        Self {
            operation,
            weight: operation.weight(),
            emit_timestamp,
            rank: None,
            event,
        }
    }

    /// Creates an insert changelog record.
    #[must_use]
    pub fn insert(event: Event, emit_timestamp: i64) -> Self {
        Self::new(CdcOperation::Insert, event, emit_timestamp)
    }

    /// Creates a delete changelog record.
    #[must_use]
    pub fn delete(event: Event, emit_timestamp: i64) -> Self {
        Self::new(CdcOperation::Delete, event, emit_timestamp)
    }

    /// Creates an update retraction pair (before and after records).
    ///
    /// The first should be emitted before the second to properly
    /// retract the old value.
    #[must_use]
    pub fn update(old_event: Event, new_event: Event, emit_timestamp: i64) -> (Self, Self) {
        (
            Self::new(CdcOperation::UpdateBefore, old_event, emit_timestamp),
            Self::new(CdcOperation::UpdateAfter, new_event, emit_timestamp),
        )
    }

    /// Attaches a rank number.
    #[must_use]
    pub fn with_rank(mut self, rank: u64) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Returns true if this is an insert-type record.
    #[must_use]
    pub fn is_insert(&self) -> bool {
        self.operation.is_insert()
    }

    /// Returns true if this is a delete-type record.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation.is_delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, RecordBatch};
    use std::sync::Arc;

    fn make_event(value: i64) -> Event {
        let array = Arc::new(Int64Array::from(vec![value]));
        Event::new(0, RecordBatch::try_from_iter(vec![("v", array as _)]).unwrap())
    }

    #[test]
    fn test_changelog_record_types() {
        let record = ChangelogRecord::insert(make_event(1), 1);
        assert_eq!(record.operation, CdcOperation::Insert);
        assert_eq!(record.weight, 1);
        assert!(record.rank.is_none());

        let record = ChangelogRecord::delete(make_event(1), 1);
        assert_eq!(record.operation, CdcOperation::Delete);
        assert_eq!(record.weight, -1);

        let (before, after) = ChangelogRecord::update(make_event(1), make_event(2), 1);
        assert_eq!(before.operation, CdcOperation::UpdateBefore);
        assert_eq!(before.weight, -1);
        assert_eq!(after.operation, CdcOperation::UpdateAfter);
        assert_eq!(after.weight, 1);
    }

    #[test]
    fn test_with_rank() {
        let record = ChangelogRecord::insert(make_event(1), 5).with_rank(3);
        assert_eq!(record.rank, Some(3));
        assert!(record.is_insert());
        assert!(!record.is_delete());
    }

    #[test]
    fn test_short_codes() {
        assert_eq!(CdcOperation::Insert.short_code(), "+I");
        assert_eq!(CdcOperation::Delete.short_code(), "-D");
        assert_eq!(CdcOperation::UpdateBefore.short_code(), "-U");
        assert_eq!(CdcOperation::UpdateAfter.short_code(), "+U");
    }
}
