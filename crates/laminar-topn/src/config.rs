//! Top-N operator configuration.
//!
//! A [`TopNConfig`] is built once through [`TopNConfigBuilder`], validated,
//! and then owned by the operator for its whole lifetime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::operator::sort_key::{PartitionColumn, TopNSortColumn};

/// Rank window used for cache sizing when the rank end is only known per
/// partition at runtime.
pub const DEFAULT_TOPN_SIZE: u64 = 100;

/// Default cache budget, in buffered rows.
pub const DEFAULT_CACHE_SIZE: u64 = 10_000;

/// Ranking function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RankType {
    /// Dense sequential numbering, ties broken by arrival order.
    #[default]
    RowNumber,
    /// SQL `RANK()`: ties share a rank, gaps follow.
    Rank,
    /// SQL `DENSE_RANK()`: ties share a rank, no gaps.
    DenseRank,
}

/// Which ranks are kept and emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankRange {
    /// Fixed 1-based inclusive window `[start, end]`.
    Constant {
        /// First visible rank.
        start: u64,
        /// Last kept rank.
        end: u64,
    },
    /// Window `[1, end]` where `end` is read from a column of the first row
    /// seen for each partition.
    Variable {
        /// Integer column holding the rank end.
        end_column: String,
    },
}

impl RankRange {
    /// Fixed window `[start, end]`.
    #[must_use]
    pub fn constant(start: u64, end: u64) -> Self {
        Self::Constant { start, end }
    }

    /// Top-N window whose end comes from `end_column`.
    #[must_use]
    pub fn variable(end_column: impl Into<String>) -> Self {
        Self::Variable {
            end_column: end_column.into(),
        }
    }

    /// First visible rank.
    #[must_use]
    pub fn start(&self) -> u64 {
        match self {
            Self::Constant { start, .. } => *start,
            Self::Variable { .. } => 1,
        }
    }

    /// Returns true if ranks before `start` are kept but hidden.
    #[must_use]
    pub fn has_offset(&self) -> bool {
        self.start() > 1
    }

    /// The fixed rank end, if constant.
    #[must_use]
    pub fn constant_end(&self) -> Option<u64> {
        match self {
            Self::Constant { end, .. } => Some(*end),
            Self::Variable { .. } => None,
        }
    }
}

/// Configuration of an append-only Top-N operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNConfig {
    /// Operator identifier, used to namespace persisted state.
    pub operator_id: String,
    /// Ranking function.
    pub rank_type: RankType,
    /// Kept and visible ranks.
    pub rank_range: RankRange,
    /// Sort columns, most significant first.
    pub sort_columns: Vec<TopNSortColumn>,
    /// Partition columns. Empty means a single global ranking.
    pub partition_columns: Vec<PartitionColumn>,
    /// Emit update-before records ahead of update-afters.
    pub generate_update_before: bool,
    /// Attach the rank number to emitted records.
    pub output_rank_number: bool,
    /// Cache budget, in buffered rows.
    pub cache_size: u64,
    /// Expire cached partitions this long after they were written.
    ///
    /// Only the cache expires. Persisted groups are kept until they fall
    /// out of the rank window, and an expired partition replays them.
    pub cache_ttl: Option<Duration>,
}

impl TopNConfig {
    /// Creates a builder for an operator with the given id.
    #[must_use]
    pub fn builder(operator_id: impl Into<String>) -> TopNConfigBuilder {
        TopNConfigBuilder::new(operator_id)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_id.is_empty() {
            return Err(ConfigError::EmptyOperatorId);
        }
        if u16::try_from(self.operator_id.len()).is_err() {
            return Err(ConfigError::OperatorIdTooLong(self.operator_id.len()));
        }
        if self.rank_type != RankType::RowNumber {
            return Err(ConfigError::UnsupportedRankType(self.rank_type));
        }
        match &self.rank_range {
            RankRange::Constant { start, end } => {
                if *start == 0 {
                    return Err(ConfigError::InvalidRankRange(
                        "rank start must be at least 1".to_string(),
                    ));
                }
                if end < start {
                    return Err(ConfigError::InvalidRankRange(format!(
                        "rank end {end} is before rank start {start}"
                    )));
                }
            }
            RankRange::Variable { end_column } => {
                if end_column.is_empty() {
                    return Err(ConfigError::InvalidRankRange(
                        "rank end column name is empty".to_string(),
                    ));
                }
            }
        }
        if self.sort_columns.is_empty() {
            return Err(ConfigError::NoSortColumns);
        }
        if self.cache_size == 0 {
            return Err(ConfigError::ZeroCacheSize);
        }
        if self.cache_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(ConfigError::ZeroCacheTtl);
        }
        Ok(())
    }

    /// Rank window used to size the cache.
    #[must_use]
    pub fn default_topn_size(&self) -> u64 {
        self.rank_range.constant_end().unwrap_or(DEFAULT_TOPN_SIZE)
    }

    /// Number of partitions the cache may hold.
    #[must_use]
    pub fn cache_entries(&self) -> usize {
        let entries = (self.cache_size / self.default_topn_size().max(1)).max(1);
        usize::try_from(entries).unwrap_or(usize::MAX)
    }

    /// Returns true if the rank-numbered output algorithm is required.
    #[must_use]
    pub fn needs_row_numbers(&self) -> bool {
        self.output_rank_number || self.rank_range.has_offset()
    }
}

/// Builder for [`TopNConfig`].
#[derive(Debug)]
pub struct TopNConfigBuilder {
    operator_id: String,
    rank_type: RankType,
    rank_range: Option<RankRange>,
    sort_columns: Vec<TopNSortColumn>,
    partition_columns: Vec<PartitionColumn>,
    generate_update_before: bool,
    output_rank_number: bool,
    cache_size: u64,
    cache_ttl: Option<Duration>,
}

impl TopNConfigBuilder {
    fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            rank_type: RankType::RowNumber,
            rank_range: None,
            sort_columns: Vec::new(),
            partition_columns: Vec::new(),
            generate_update_before: true,
            output_rank_number: false,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: None,
        }
    }

    /// Sets the ranking function.
    #[must_use]
    pub fn rank_type(mut self, rank_type: RankType) -> Self {
        self.rank_type = rank_type;
        self
    }

    /// Sets the rank range (required).
    #[must_use]
    pub fn rank_range(mut self, rank_range: RankRange) -> Self {
        self.rank_range = Some(rank_range);
        self
    }

    /// Appends a sort column.
    #[must_use]
    pub fn sort_column(mut self, column: TopNSortColumn) -> Self {
        self.sort_columns.push(column);
        self
    }

    /// Appends a partition column.
    #[must_use]
    pub fn partition_column(mut self, column: PartitionColumn) -> Self {
        self.partition_columns.push(column);
        self
    }

    /// Sets whether update-before records are emitted.
    #[must_use]
    pub fn generate_update_before(mut self, enabled: bool) -> Self {
        self.generate_update_before = enabled;
        self
    }

    /// Sets whether rank numbers are attached to output.
    #[must_use]
    pub fn output_rank_number(mut self, enabled: bool) -> Self {
        self.output_rank_number = enabled;
        self
    }

    /// Sets the cache budget in rows.
    #[must_use]
    pub fn cache_size(mut self, rows: u64) -> Self {
        self.cache_size = rows;
        self
    }

    /// Sets the cache expire-after-write duration.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRankRange` if no rank range was set,
    /// or any error from [`TopNConfig::validate`].
    pub fn build(self) -> Result<TopNConfig, ConfigError> {
        let config = TopNConfig {
            operator_id: self.operator_id,
            rank_type: self.rank_type,
            rank_range: self.rank_range.ok_or(ConfigError::MissingRankRange)?,
            sort_columns: self.sort_columns,
            partition_columns: self.partition_columns,
            generate_update_before: self.generate_update_before,
            output_rank_number: self.output_rank_number,
            cache_size: self.cache_size,
            cache_ttl: self.cache_ttl,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors, fatal at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Operator id is empty
    #[error("Operator id must not be empty")]
    EmptyOperatorId,

    /// Operator id does not fit the state key namespace
    #[error("Operator id is {0} bytes, at most 65535 are allowed")]
    OperatorIdTooLong(usize),

    /// Ranking function cannot be maintained on an insert-only stream
    #[error("Rank type {0:?} is not supported by the append-only Top-N operator")]
    UnsupportedRankType(RankType),

    /// No rank range was configured
    #[error("Rank range is required")]
    MissingRankRange,

    /// Rank range bounds are inconsistent
    #[error("Invalid rank range: {0}")]
    InvalidRankRange(String),

    /// No sort columns were configured
    #[error("At least one sort column is required")]
    NoSortColumns,

    /// Cache budget is zero
    #[error("Cache size must be greater than zero")]
    ZeroCacheSize,

    /// Cache TTL is zero
    #[error("Cache TTL must be greater than zero")]
    ZeroCacheTtl,
}
