//! # Append-Only Top-N Operator
//!
//! Keeps the best rows of each partition of an insert-only stream and emits
//! the changelog of the visible ranking.
//!
//! ## Processing
//!
//! For every input row:
//!
//! 1. derive the partition and sort keys
//! 2. resolve the rank end (constant, or persisted per partition)
//! 3. fetch the partition buffer from the cache, replaying it from state on
//!    a miss
//! 4. drop the row if it cannot rank inside the window
//! 5. append it to its sort-key group and rewrite that group in state
//! 6. emit changes with the output algorithm chosen at construction
//!
//! The state store is authoritative. The cache may lose a partition at any
//! time and a later row replays it, so output never depends on whether a
//! partition was cached.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = TopNConfig::builder("top_sales")
//!     .partition_column(PartitionColumn::new("region"))
//!     .sort_column(TopNSortColumn::descending("amount"))
//!     .rank_range(RankRange::constant(1, 10))
//!     .output_rank_number(true)
//!     .build()?;
//! let mut operator = AppendOnlyTopNOperator::new(config)?;
//! let changes = operator.process(&event, &mut ctx)?;
//! ```

use super::rank_output::{RankEmission, RankOutput, RankWindow};
use super::sort_key::{read_rank_end, PartitionKeySelector, SortKey, SortKeySelector};
use super::topn_buffer::TopNBuffer;
use super::{Event, Operator, OperatorContext, OperatorError, OutputVec};
use crate::cache::PartitionCache;
use crate::config::{ConfigError, RankRange, TopNConfig};
use crate::metrics::{collect_metrics, TopNCounters, TopNMetrics};
use crate::state::{StateStore, TopNStateKeys};

/// Buffer type cached per partition.
pub type PartitionBuffer = TopNBuffer<SortKey, Event>;

/// Incremental Top-N over an insert-only stream.
pub struct AppendOnlyTopNOperator {
    config: TopNConfig,
    sort_keys: SortKeySelector,
    partition_keys: PartitionKeySelector,
    state_keys: TopNStateKeys,
    output: RankOutput,
    /// Working set of partition buffers. Never authoritative.
    cache: PartitionCache<PartitionBuffer>,
    counters: TopNCounters,
}

impl AppendOnlyTopNOperator {
    /// Creates the operator from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: TopNConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state_keys = TopNStateKeys::new(&config.operator_id)
            .map_err(|_| ConfigError::OperatorIdTooLong(config.operator_id.len()))?;
        let output = RankOutput::select(&config);
        let cache = PartitionCache::new(config.cache_entries(), config.cache_ttl);

        tracing::info!(
            "Top{} operator {} uses the {} algorithm with an LRU cache of {} partitions",
            config.default_topn_size(),
            config.operator_id,
            output.name(),
            cache.max_entries()
        );

        Ok(Self {
            sort_keys: SortKeySelector::new(config.sort_columns.clone()),
            partition_keys: PartitionKeySelector::new(config.partition_columns.clone()),
            state_keys,
            output,
            cache,
            counters: TopNCounters::default(),
            config,
        })
    }

    /// Returns the operator configuration.
    #[must_use]
    pub fn config(&self) -> &TopNConfig {
        &self.config
    }

    /// Returns the operator id.
    #[must_use]
    pub fn operator_id(&self) -> &str {
        &self.config.operator_id
    }

    /// Derives the partition key of an event.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if a partition column cannot be read.
    pub fn partition_key(&self, event: &Event) -> Result<Vec<u8>, OperatorError> {
        self.partition_keys.key(event)
    }

    /// Returns the cached buffer of a partition without touching LRU order.
    ///
    /// `None` means "not cached", not "empty".
    #[must_use]
    pub fn cached_buffer(&self, partition_key: &[u8]) -> Option<&PartitionBuffer> {
        self.cache.peek(partition_key)
    }

    /// Number of partitions currently cached.
    #[must_use]
    pub fn cached_partition_count(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached buffer. Later rows replay from state.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Returns a snapshot of the operator metrics.
    #[must_use]
    pub fn metrics(&self) -> TopNMetrics {
        collect_metrics(&self.counters, &self.cache)
    }

    /// Resets the operator-owned counters.
    pub fn reset_metrics(&mut self) {
        self.counters.reset();
    }

    fn process_partition(
        &mut self,
        event: &Event,
        partition_key: &[u8],
        sort_key: &SortKey,
        ctx: &mut OperatorContext,
    ) -> Result<OutputVec, OperatorError> {
        let Self {
            config,
            state_keys,
            output,
            cache,
            counters,
            ..
        } = self;

        let rank_end = resolve_rank_end(
            config,
            state_keys,
            counters,
            event,
            partition_key,
            &mut *ctx.state,
        )?;

        let replay_state: &dyn StateStore = &*ctx.state;
        let (buffer, hit) = cache.get_or_try_insert_with(partition_key, || {
            state_keys.restore_buffer(replay_state, partition_key)
        })?;
        if !hit {
            tracing::debug!(
                "Restored {} rows in {} groups for a partition of {}",
                buffer.len(),
                buffer.group_count(),
                config.operator_id
            );
        }

        let mut out = OutputVec::new();
        if !admits(buffer, sort_key, config.default_topn_size()) {
            return Ok(out);
        }

        buffer.put(sort_key.clone(), event.clone());
        let group = buffer.get(sort_key).unwrap_or_default();
        state_keys.put_rows(&mut *ctx.state, partition_key, sort_key, group)?;

        let emission = RankEmission {
            buffer,
            state: &mut *ctx.state,
            keys: state_keys,
            partition_key,
            window: RankWindow {
                start: config.rank_range.start(),
                end: rank_end,
            },
            generate_update_before: config.generate_update_before,
            output_rank_number: config.output_rank_number,
            emit_timestamp: ctx.processing_time,
        };
        output.emit(emission, sort_key, event, &mut out)?;
        Ok(out)
    }
}

impl Operator for AppendOnlyTopNOperator {
    fn process(
        &mut self,
        event: &Event,
        ctx: &mut OperatorContext,
    ) -> Result<OutputVec, OperatorError> {
        self.counters.requests += 1;
        let partition_key = self.partition_keys.key(event)?;
        let sort_key = self.sort_keys.key(event)?;

        let result = self.process_partition(event, &partition_key, &sort_key, ctx);
        if let Err(e) = &result {
            // the buffer may be ahead of state; the next row replays
            self.cache.invalidate(&partition_key);
            tracing::error!("Failed to process row in {}: {e}", self.config.operator_id);
        }
        result
    }
}

/// A row is admitted if the buffer is empty, it beats the current worst
/// key, or the buffer still has room.
fn admits(buffer: &PartitionBuffer, sort_key: &[u8], default_topn_size: u64) -> bool {
    match buffer.last_entry() {
        None => true,
        Some((worst, _)) => {
            sort_key < worst.as_slice()
                || u64::try_from(buffer.len()).unwrap_or(u64::MAX) < default_topn_size
        }
    }
}

/// The first rank end seen for a partition wins; later disagreeing values
/// are counted and ignored.
fn resolve_rank_end(
    config: &TopNConfig,
    state_keys: &TopNStateKeys,
    counters: &mut TopNCounters,
    event: &Event,
    partition_key: &[u8],
    state: &mut dyn StateStore,
) -> Result<u64, OperatorError> {
    match &config.rank_range {
        RankRange::Constant { end, .. } => Ok(*end),
        RankRange::Variable { end_column } => {
            let current = read_rank_end(event, end_column)?;
            match state_keys.rank_end(state, partition_key)? {
                Some(stored) => {
                    if stored != current {
                        counters.invalid_rank_ends += 1;
                        tracing::debug!(
                            "Ignoring rank end {current} for a partition of {}, keeping {stored}",
                            config.operator_id
                        );
                    }
                    Ok(stored)
                }
                None => {
                    state_keys.put_rank_end(state, partition_key, current)?;
                    Ok(current)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::sort_key::{PartitionColumn, TopNSortColumn};
    use crate::operator::CdcOperation;
    use crate::state::InMemoryStore;
    use arrow_array::{Int64Array, RecordBatch, StringArray};
    use std::sync::Arc;

    fn row(category: &str, limit: i64, price: i64) -> Event {
        let batch = RecordBatch::try_from_iter(vec![
            ("category", Arc::new(StringArray::from(vec![category])) as _),
            ("limit", Arc::new(Int64Array::from(vec![limit])) as _),
            ("price", Arc::new(Int64Array::from(vec![price])) as _),
        ])
        .unwrap();
        Event::new(price, batch)
    }

    fn operator(rank_range: RankRange) -> AppendOnlyTopNOperator {
        let config = TopNConfig::builder("topn_test")
            .partition_column(PartitionColumn::new("category"))
            .sort_column(TopNSortColumn::ascending("price"))
            .rank_range(rank_range)
            .cache_size(100)
            .build()
            .unwrap();
        AppendOnlyTopNOperator::new(config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = TopNConfig::builder("t")
            .sort_column(TopNSortColumn::ascending("price"))
            .rank_range(RankRange::constant(1, 2))
            .build()
            .unwrap();
        config.sort_columns.clear();
        assert!(matches!(
            AppendOnlyTopNOperator::new(config),
            Err(ConfigError::NoSortColumns)
        ));
    }

    #[test]
    fn test_cache_hits_and_misses() {
        let mut op = operator(RankRange::constant(1, 2));
        let mut store = InMemoryStore::new();
        let mut ctx = OperatorContext::new(0, &mut store);

        op.process(&row("a", 0, 1), &mut ctx).unwrap();
        op.process(&row("a", 0, 2), &mut ctx).unwrap();
        op.process(&row("b", 0, 1), &mut ctx).unwrap();

        let metrics = op.metrics();
        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cached_partitions, 2);
        assert_eq!(metrics.cache_capacity, 50);
        assert_eq!(op.cached_partition_count(), 2);
    }

    #[test]
    fn test_cached_buffer_mirrors_state() {
        let mut op = operator(RankRange::constant(1, 2));
        let mut store = InMemoryStore::new();
        {
            let mut ctx = OperatorContext::new(0, &mut store);
            for price in [5, 3, 9, 1] {
                op.process(&row("a", 0, price), &mut ctx).unwrap();
            }
        }
        let pk = op.partition_key(&row("a", 0, 0)).unwrap();
        let cached: Vec<i64> = op
            .cached_buffer(&pk)
            .unwrap()
            .rows()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(cached, vec![1, 3]);

        let keys = TopNStateKeys::new("topn_test").unwrap();
        let replayed: Vec<i64> = keys
            .restore_buffer(&store, &pk)
            .unwrap()
            .rows()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(replayed, cached);
    }

    #[test]
    fn test_rejected_row_touches_nothing() {
        let mut op = operator(RankRange::constant(1, 1));
        let mut store = InMemoryStore::new();
        let mut ctx = OperatorContext::new(0, &mut store);
        op.process(&row("a", 0, 1), &mut ctx).unwrap();
        let before = ctx.state.len();

        let out = op.process(&row("a", 0, 7), &mut ctx).unwrap();
        assert!(out.is_empty());
        assert_eq!(ctx.state.len(), before);
    }

    #[test]
    fn test_variable_rank_end_first_value_wins() {
        let mut op = operator(RankRange::variable("limit"));
        let mut store = InMemoryStore::new();
        let mut ctx = OperatorContext::new(0, &mut store);

        op.process(&row("a", 1, 10), &mut ctx).unwrap();
        // limit 5 is ignored; the window stays at 1
        let out = op.process(&row("a", 5, 4), &mut ctx).unwrap();
        let ops: Vec<CdcOperation> = out.iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec![CdcOperation::Delete, CdcOperation::Insert]);
        assert_eq!(op.metrics().invalid_rank_ends, 1);
    }

    #[test]
    fn test_negative_rank_end_emits_nothing() {
        let mut op = operator(RankRange::variable("limit"));
        let mut store = InMemoryStore::new();
        let mut ctx = OperatorContext::new(0, &mut store);
        assert!(op.process(&row("a", -3, 10), &mut ctx).unwrap().is_empty());
        assert!(op.process(&row("a", -3, 5), &mut ctx).unwrap().is_empty());
    }

    #[test]
    fn test_missing_sort_column_is_an_error() {
        let config = TopNConfig::builder("t")
            .sort_column(TopNSortColumn::ascending("missing"))
            .rank_range(RankRange::constant(1, 2))
            .build()
            .unwrap();
        let mut op = AppendOnlyTopNOperator::new(config).unwrap();
        let mut store = InMemoryStore::new();
        let mut ctx = OperatorContext::new(0, &mut store);
        assert!(matches!(
            op.process(&row("a", 0, 1), &mut ctx),
            Err(OperatorError::MissingColumn(_))
        ));
        assert!(ctx.state.is_empty());
    }
}
