//! # `LaminarDB` Top-N
//!
//! Incremental Top-N ranking over partitioned, insert-only streams.
//!
//! This crate provides:
//! - **Operator**: [`AppendOnlyTopNOperator`], which keeps the best N rows
//!   per partition and emits changelog records describing every change to
//!   the visible result
//! - **Buffer**: [`TopNBuffer`], the ordered multi-map mirroring one
//!   partition's ranking state
//! - **Cache**: [`PartitionCache`], a bounded LRU (with optional TTL) that
//!   holds the working set of buffers
//! - **State Store**: the authoritative keyed store that buffers are
//!   rebuilt from after eviction or restart
//!
//! ## Design Principles
//!
//! 1. **The store is the source of truth** - the cache may drop a partition
//!    at any time; a miss replays the partition from state
//! 2. **One algorithm per configuration** - the rank output algorithm is
//!    selected once at construction
//! 3. **No silent drops** - every failure is returned to the caller
//!
//! ## Example
//!
//! ```rust,ignore
//! use laminar_topn::config::{RankRange, TopNConfig};
//! use laminar_topn::operator::sort_key::{PartitionColumn, TopNSortColumn};
//! use laminar_topn::operator::{Operator, OperatorContext};
//! use laminar_topn::state::InMemoryStore;
//! use laminar_topn::AppendOnlyTopNOperator;
//!
//! let config = TopNConfig::builder("top_books")
//!     .partition_column(PartitionColumn::new("category"))
//!     .sort_column(TopNSortColumn::descending("sales"))
//!     .rank_range(RankRange::constant(1, 3))
//!     .build()?;
//! let mut op = AppendOnlyTopNOperator::new(config)?;
//!
//! let mut state = InMemoryStore::new();
//! let mut ctx = OperatorContext::new(0, &mut state);
//! let changes = op.process(&event, &mut ctx)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod metrics;
pub mod operator;
pub mod state;

// Re-export key types
pub use cache::PartitionCache;
pub use config::{ConfigError, TopNConfig};
pub use operator::append_only_topn::AppendOnlyTopNOperator;
pub use operator::topn_buffer::TopNBuffer;

/// Result type for laminar-topn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for laminar-topn
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// State store errors
    #[error("State error: {0}")]
    State(#[from] state::StateError),

    /// Operator errors
    #[error("Operator error: {0}")]
    Operator(#[from] operator::OperatorError),
}
