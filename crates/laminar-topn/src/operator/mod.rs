//! # Operator Module
//!
//! The append-only Top-N operator and the pieces it is assembled from.
//!
//! ## Layout
//!
//! - [`sort_key`]: sort and partition key derivation (memcomparable bytes)
//! - [`topn_buffer`]: per-partition ordered multi-map
//! - [`changelog`]: change records emitted downstream
//! - [`append_only_topn`]: the rank maintenance engine
//!
//! Operators receive one [`Event`] at a time together with an
//! [`OperatorContext`] that exposes the keyed state store.

use arrow_array::RecordBatch;
use smallvec::SmallVec;

use crate::state::StateStore;

pub mod append_only_topn;
pub mod changelog;
mod rank_output;
pub mod sort_key;
pub mod topn_buffer;

pub use changelog::{CdcOperation, ChangelogRecord};

/// An event flowing through the system
#[derive(Debug, Clone)]
pub struct Event {
    /// Timestamp of the event
    pub timestamp: i64,
    /// Event payload as a single-row Arrow `RecordBatch`
    pub data: RecordBatch,
}

impl Event {
    /// Creates a new event.
    #[must_use]
    pub fn new(timestamp: i64, data: RecordBatch) -> Self {
        Self { timestamp, data }
    }

    /// Returns true if both events carry the same row.
    ///
    /// Compares schema and column values; timestamps are ignored.
    #[must_use]
    pub fn same_row(&self, other: &Event) -> bool {
        self.data == other.data
    }
}

/// Collection type for operator output.
///
/// Most inputs produce at most a delete/insert or a single update pair.
pub type OutputVec = SmallVec<[ChangelogRecord; 4]>;

/// Context provided to operators during processing
pub struct OperatorContext<'a> {
    /// Current processing time, used as the emit timestamp of changes
    pub processing_time: i64,
    /// Keyed state store access
    pub state: &'a mut dyn StateStore,
}

impl<'a> OperatorContext<'a> {
    /// Creates a context over the given state store.
    pub fn new(processing_time: i64, state: &'a mut dyn StateStore) -> Self {
        Self {
            processing_time,
            state,
        }
    }
}

/// Trait implemented by streaming operators
pub trait Operator: Send {
    /// Process an incoming event, returning the changes it caused.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if keys cannot be derived from the event or
    /// the state store fails. The error is fatal for the partition.
    fn process(
        &mut self,
        event: &Event,
        ctx: &mut OperatorContext,
    ) -> Result<OutputVec, OperatorError>;
}

/// Errors that can occur in operators
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// State access error
    #[error("State access failed: {0}")]
    State(#[from] crate::state::StateError),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A key column is not present in the event schema
    #[error("Column not found: {0}")]
    MissingColumn(String),

    /// A key column has a type that cannot be encoded
    #[error("Unsupported type {data_type} for column {column}")]
    UnsupportedType {
        /// Column name
        column: String,
        /// Arrow data type of the column
        data_type: String,
    },

    /// The rank end column is NULL
    #[error("Rank end column {0} is NULL")]
    NullRankEnd(String),

    /// The event carries no rows
    #[error("Event contains no rows")]
    EmptyEvent,

    /// The event carries more than one row
    #[error("Event contains {0} rows, expected one")]
    MultiRowEvent(usize),

    /// Internal ranking state is inconsistent
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}
