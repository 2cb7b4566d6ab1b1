//! Rank output algorithms.
//!
//! Both algorithms run after the input row has been committed to the
//! partition buffer and its group rewritten to state. They emit the changes
//! to the visible window and retire rows that can no longer be visible.

use super::changelog::{CdcOperation, ChangelogRecord};
use super::sort_key::SortKey;
use super::topn_buffer::TopNBuffer;
use super::{Event, OperatorError, OutputVec};
use crate::config::TopNConfig;
use crate::state::{StateStore, TopNStateKeys};

/// Output algorithm, fixed at operator construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RankOutput {
    /// Tracks ranks and emits update pairs for every displaced row.
    WithRowNumber,
    /// Emits a delete for the retired worst row and an insert for the new
    /// row. Valid only for a window starting at rank 1 without rank output.
    WithoutRowNumber,
}

impl RankOutput {
    pub(crate) fn select(config: &TopNConfig) -> Self {
        if config.needs_row_numbers() {
            Self::WithRowNumber
        } else {
            Self::WithoutRowNumber
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::WithRowNumber => "with_row_number",
            Self::WithoutRowNumber => "without_row_number",
        }
    }

    pub(crate) fn emit(
        self,
        emission: RankEmission<'_>,
        sort_key: &[u8],
        input: &Event,
        out: &mut OutputVec,
    ) -> Result<(), OperatorError> {
        match self {
            Self::WithRowNumber => emission.with_row_number(sort_key, input, out),
            Self::WithoutRowNumber => emission.without_row_number(input, out),
        }
    }
}

/// Inclusive 1-based rank window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RankWindow {
    pub(crate) start: u64,
    pub(crate) end: u64,
}

impl RankWindow {
    fn within_end(self, rank: u64) -> bool {
        rank <= self.end
    }

    fn contains(self, rank: u64) -> bool {
        rank >= self.start && rank <= self.end
    }
}

/// Everything one emission pass touches for a single partition.
pub(crate) struct RankEmission<'a> {
    pub(crate) buffer: &'a mut TopNBuffer<SortKey, Event>,
    pub(crate) state: &'a mut dyn StateStore,
    pub(crate) keys: &'a TopNStateKeys,
    pub(crate) partition_key: &'a [u8],
    pub(crate) window: RankWindow,
    pub(crate) generate_update_before: bool,
    pub(crate) output_rank_number: bool,
    pub(crate) emit_timestamp: i64,
}

fn row_count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

impl RankEmission<'_> {
    fn ranked(&self, operation: CdcOperation, row: &Event, rank: u64) -> ChangelogRecord {
        let record = ChangelogRecord::new(operation, row.clone(), self.emit_timestamp);
        if self.output_rank_number {
            record.with_rank(rank)
        } else {
            record
        }
    }

    fn collect_insert(&self, out: &mut OutputVec, row: &Event, rank: u64) {
        if self.window.contains(rank) {
            out.push(self.ranked(CdcOperation::Insert, row, rank));
        }
    }

    fn collect_update_before(&self, out: &mut OutputVec, row: &Event, rank: u64) {
        if self.generate_update_before && self.window.contains(rank) {
            out.push(self.ranked(CdcOperation::UpdateBefore, row, rank));
        }
    }

    fn collect_update_after(&self, out: &mut OutputVec, row: &Event, rank: u64) {
        if self.window.contains(rank) {
            out.push(self.ranked(CdcOperation::UpdateAfter, row, rank));
        }
    }

    /// Walks groups best first. Rows after the input's group shift down one
    /// rank each, emitting an update pair per rank until the window end.
    fn with_row_number(
        mut self,
        sort_key: &[u8],
        input: &Event,
        out: &mut OutputVec,
    ) -> Result<(), OperatorError> {
        let mut retired: Vec<SortKey> = Vec::new();
        {
            let mut groups = self.buffer.iter();
            let mut current_rank = 0u64;
            let mut current_row: Option<&Event> = None;
            let mut found = false;

            while self.window.within_end(current_rank) {
                let Some((key, rows)) = groups.next() else {
                    break;
                };
                // every row of this group now ranks past the window end
                if current_rank >= self.window.end {
                    retired.push(key.clone());
                }
                if !found && key.as_slice() == sort_key {
                    current_rank += row_count(rows.len());
                    current_row = Some(input);
                    found = true;
                } else if found {
                    for prev in rows {
                        if !self.window.within_end(current_rank) {
                            break;
                        }
                        self.collect_update_before(out, prev, current_rank);
                        if let Some(row) = current_row {
                            self.collect_update_after(out, row, current_rank);
                        }
                        current_row = Some(prev);
                        current_rank += 1;
                    }
                } else {
                    current_rank += row_count(rows.len());
                }
            }

            if self.window.within_end(current_rank) {
                if let Some(row) = current_row {
                    self.collect_insert(out, row, current_rank);
                }
            }

            retired.extend(groups.map(|(key, _)| key.clone()));
        }

        for key in retired {
            self.buffer.remove_all(&key);
            self.keys
                .remove_rows(&mut *self.state, self.partition_key, &key)?;
        }
        Ok(())
    }

    /// Retires the single worst row once the buffer exceeds the window.
    fn without_row_number(mut self, input: &Event, out: &mut OutputVec) -> Result<(), OperatorError> {
        if row_count(self.buffer.len()) > self.window.end {
            let (last_key, size) = self
                .buffer
                .last_entry()
                .map(|(key, rows)| (key.clone(), rows.len()))
                .ok_or_else(|| {
                    OperatorError::InvariantViolation(
                        "buffer exceeds the rank window but has no worst group".to_string(),
                    )
                })?;
            if size == 0 {
                return Err(OperatorError::InvariantViolation(
                    "worst sort-key group is empty".to_string(),
                ));
            }

            let last = if size == 1 {
                let row = self.buffer.remove_all(&last_key).and_then(|mut rows| rows.pop());
                self.keys
                    .remove_rows(&mut *self.state, self.partition_key, &last_key)?;
                row
            } else {
                let row = self.buffer.remove_last();
                let remaining = self.buffer.get(&last_key).unwrap_or_default();
                self.keys
                    .put_rows(&mut *self.state, self.partition_key, &last_key, remaining)?;
                row
            };
            let last = last.ok_or_else(|| {
                OperatorError::InvariantViolation("worst row vanished during removal".to_string())
            })?;

            if input.same_row(&last) {
                return Ok(());
            }
            out.push(ChangelogRecord::delete(last, self.emit_timestamp));
        }
        out.push(ChangelogRecord::insert(input.clone(), self.emit_timestamp));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use arrow_array::{Int64Array, RecordBatch};
    use std::sync::Arc;

    fn row(v: i64) -> Event {
        let batch =
            RecordBatch::try_from_iter(vec![("v", Arc::new(Int64Array::from(vec![v])) as _)])
                .unwrap();
        Event::new(v, batch)
    }

    fn value(event: &Event) -> i64 {
        event.data.column(0).as_primitive::<Int64Type>().value(0)
    }

    struct Harness {
        output: RankOutput,
        buffer: TopNBuffer<SortKey, Event>,
        store: InMemoryStore,
        keys: TopNStateKeys,
        window: RankWindow,
        generate_update_before: bool,
        output_rank_number: bool,
    }

    impl Harness {
        fn new(output: RankOutput, start: u64, end: u64) -> Self {
            Self {
                output,
                buffer: TopNBuffer::new(),
                store: InMemoryStore::new(),
                keys: TopNStateKeys::new("rank").unwrap(),
                window: RankWindow { start, end },
                generate_update_before: true,
                output_rank_number: true,
            }
        }

        /// Commits `(key, v)` and returns `(code, v, rank)` per record.
        fn insert(&mut self, key: u8, v: i64) -> Vec<(&'static str, i64, Option<u64>)> {
            let input = row(v);
            let sort_key = vec![key];
            self.buffer.put(sort_key.clone(), input.clone());
            self.keys
                .put_rows(
                    &mut self.store,
                    b"p",
                    &sort_key,
                    self.buffer.get(&sort_key).unwrap(),
                )
                .unwrap();
            let mut out = OutputVec::new();
            let emission = RankEmission {
                buffer: &mut self.buffer,
                state: &mut self.store,
                keys: &self.keys,
                partition_key: b"p",
                window: self.window,
                generate_update_before: self.generate_update_before,
                output_rank_number: self.output_rank_number,
                emit_timestamp: 0,
            };
            self.output
                .emit(emission, &sort_key, &input, &mut out)
                .unwrap();
            out.iter()
                .map(|r| (r.operation.short_code(), value(&r.event), r.rank))
                .collect()
        }

        fn values(&self) -> Vec<i64> {
            self.buffer.rows().map(value).collect()
        }
    }

    #[test]
    fn test_with_row_number_fills_window() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 1, 3);
        assert_eq!(h.insert(5, 50), vec![("+I", 50, Some(1))]);
        assert_eq!(h.insert(7, 70), vec![("+I", 70, Some(2))]);
        assert_eq!(
            h.insert(6, 60),
            vec![("-U", 70, Some(2)), ("+U", 60, Some(2)), ("+I", 70, Some(3))]
        );
        assert_eq!(h.values(), vec![50, 60, 70]);
    }

    #[test]
    fn test_with_row_number_cascade_retires_overflow() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 1, 3);
        h.insert(1, 10);
        h.insert(2, 20);
        h.insert(3, 30);
        assert_eq!(
            h.insert(0, 5),
            vec![
                ("-U", 10, Some(1)),
                ("+U", 5, Some(1)),
                ("-U", 20, Some(2)),
                ("+U", 10, Some(2)),
                ("-U", 30, Some(3)),
                ("+U", 20, Some(3)),
            ]
        );
        assert_eq!(h.values(), vec![5, 10, 20]);
        let persisted = h.keys.restore_buffer(&h.store, b"p").unwrap();
        assert_eq!(persisted.rows().map(value).collect::<Vec<_>>(), vec![5, 10, 20]);
    }

    #[test]
    fn test_with_row_number_tie_at_end() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 1, 2);
        h.insert(1, 10);
        h.insert(2, 20);
        // ties with 10, lands at rank 2 and pushes 20 out
        assert_eq!(
            h.insert(1, 11),
            vec![("-U", 20, Some(2)), ("+U", 11, Some(2))]
        );
        assert_eq!(h.values(), vec![10, 11]);
    }

    #[test]
    fn test_with_row_number_offset_hides_leading_ranks() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 2, 3);
        assert!(h.insert(5, 50).is_empty());
        assert_eq!(h.insert(6, 60), vec![("+I", 60, Some(2))]);
        // rank 1 changes are hidden, rank 2 and 3 are visible
        assert_eq!(
            h.insert(4, 40),
            vec![("-U", 60, Some(2)), ("+U", 50, Some(2)), ("+I", 60, Some(3))]
        );
    }

    #[test]
    fn test_with_row_number_without_update_before() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 1, 2);
        h.generate_update_before = false;
        h.insert(2, 20);
        assert_eq!(h.insert(1, 10), vec![("+U", 10, Some(1)), ("+I", 20, Some(2))]);
    }

    #[test]
    fn test_with_row_number_offset_without_rank_output() {
        let mut h = Harness::new(RankOutput::WithRowNumber, 2, 2);
        h.output_rank_number = false;
        h.insert(5, 50);
        assert_eq!(h.insert(6, 60), vec![("+I", 60, None)]);
    }

    #[test]
    fn test_without_row_number_replaces_worst() {
        let mut h = Harness::new(RankOutput::WithoutRowNumber, 1, 2);
        assert_eq!(h.insert(5, 50), vec![("+I", 50, None)]);
        assert_eq!(h.insert(7, 70), vec![("+I", 70, None)]);
        assert_eq!(h.insert(6, 60), vec![("-D", 70, None), ("+I", 60, None)]);
        assert_eq!(h.values(), vec![50, 60]);
        assert_eq!(h.keys.scan_partition(&h.store, b"p").unwrap().len(), 2);
    }

    #[test]
    fn test_without_row_number_removes_last_of_tied_group() {
        let mut h = Harness::new(RankOutput::WithoutRowNumber, 1, 2);
        h.insert(5, 50);
        h.insert(5, 51);
        assert_eq!(h.insert(1, 10), vec![("-D", 51, None), ("+I", 10, None)]);
        let groups = h.keys.scan_partition(&h.store, b"p").unwrap();
        assert_eq!(groups.len(), 2);
        let tied: Vec<i64> = groups[1].1.iter().map(value).collect();
        assert_eq!(tied, vec![50]);
    }

    #[test]
    fn test_without_row_number_suppresses_equal_row() {
        let mut h = Harness::new(RankOutput::WithoutRowNumber, 1, 1);
        assert_eq!(h.insert(5, 50), vec![("+I", 50, None)]);
        assert!(h.insert(5, 50).is_empty());
        assert_eq!(h.values(), vec![50]);
    }

    #[test]
    fn test_select_algorithm() {
        use crate::config::RankRange;
        use crate::operator::sort_key::TopNSortColumn;

        let base = || {
            TopNConfig::builder("t")
                .sort_column(TopNSortColumn::ascending("v"))
                .rank_range(RankRange::constant(1, 5))
        };
        assert_eq!(
            RankOutput::select(&base().build().unwrap()),
            RankOutput::WithoutRowNumber
        );
        assert_eq!(
            RankOutput::select(&base().output_rank_number(true).build().unwrap()),
            RankOutput::WithRowNumber
        );
        assert_eq!(
            RankOutput::select(&base().rank_range(RankRange::constant(2, 5)).build().unwrap()),
            RankOutput::WithRowNumber
        );
    }
}
