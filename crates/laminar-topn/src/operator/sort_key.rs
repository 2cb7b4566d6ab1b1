//! # Sort and Partition Keys
//!
//! Derives the ranking keys of an event from its columns.
//!
//! Sort keys use a memcomparable byte encoding: comparing two encoded keys
//! with `Ord for [u8]` gives the same answer as comparing the source
//! columns under their configured direction and NULL placement. The byte
//! order is therefore the comparator of every [`TopNBuffer`] the operator
//! builds.
//!
//! Partition keys only need to be injective, so they use a simpler
//! tagged little-endian encoding.
//!
//! [`TopNBuffer`]: super::topn_buffer::TopNBuffer

use arrow_array::{
    Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray, UInt64Array,
};
use arrow_schema::{DataType, TimeUnit};
use serde::{Deserialize, Serialize};

use super::{Event, OperatorError};

/// Memcomparable sort key.
pub type SortKey = Vec<u8>;

/// Configuration for a sort column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNSortColumn {
    /// Column name in the event schema
    pub column_name: String,
    /// Sort in descending order
    pub descending: bool,
    /// Place NULL values before non-NULL values
    pub nulls_first: bool,
}

impl TopNSortColumn {
    /// Creates a new ascending sort column.
    #[must_use]
    pub fn ascending(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            descending: false,
            nulls_first: false,
        }
    }

    /// Creates a new descending sort column.
    #[must_use]
    pub fn descending(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            descending: true,
            nulls_first: false,
        }
    }

    /// Sets whether nulls should sort first.
    #[must_use]
    pub fn with_nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = nulls_first;
        self
    }
}

/// Configuration for a partition key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionColumn {
    /// Column name in the event schema.
    pub column_name: String,
}

impl PartitionColumn {
    /// Creates a new partition column.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
        }
    }
}

/// Projects an event onto its memcomparable sort key.
#[derive(Debug, Clone)]
pub struct SortKeySelector {
    columns: Vec<TopNSortColumn>,
}

impl SortKeySelector {
    /// Creates a selector over the given sort columns.
    #[must_use]
    pub fn new(columns: Vec<TopNSortColumn>) -> Self {
        Self { columns }
    }

    /// Returns the configured sort columns.
    #[must_use]
    pub fn columns(&self) -> &[TopNSortColumn] {
        &self.columns
    }

    /// Extracts the sort key of a single-row `event`.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if a sort column is missing, has an
    /// unsupported type, or the event does not hold exactly one row.
    pub fn key(&self, event: &Event) -> Result<SortKey, OperatorError> {
        let mut key = Vec::new();

        for spec in &self.columns {
            let array = column(event, &spec.column_name)?;

            if array.is_null(0) {
                encode_null(spec.nulls_first, &mut key);
                continue;
            }

            encode_not_null(spec.nulls_first, &mut key);
            match array.data_type() {
                DataType::Int64 => {
                    let arr = downcast::<Int64Array>(array, &spec.column_name)?;
                    encode_i64(arr.value(0), spec.descending, &mut key);
                }
                DataType::Int32 => {
                    let arr = downcast::<Int32Array>(array, &spec.column_name)?;
                    encode_i64(i64::from(arr.value(0)), spec.descending, &mut key);
                }
                DataType::UInt64 => {
                    let arr = downcast::<UInt64Array>(array, &spec.column_name)?;
                    encode_u64(arr.value(0), spec.descending, &mut key);
                }
                DataType::Float64 => {
                    let arr = downcast::<Float64Array>(array, &spec.column_name)?;
                    encode_f64(arr.value(0), spec.descending, &mut key);
                }
                DataType::Utf8 => {
                    let arr = downcast::<StringArray>(array, &spec.column_name)?;
                    encode_utf8(arr.value(0), spec.descending, &mut key);
                }
                DataType::Timestamp(TimeUnit::Microsecond, _) => {
                    let arr = downcast::<TimestampMicrosecondArray>(array, &spec.column_name)?;
                    encode_i64(arr.value(0), spec.descending, &mut key);
                }
                other => return Err(unsupported(&spec.column_name, other)),
            }
        }

        Ok(key)
    }
}

/// Projects an event onto its partition key.
#[derive(Debug, Clone)]
pub struct PartitionKeySelector {
    columns: Vec<PartitionColumn>,
}

impl PartitionKeySelector {
    /// Creates a selector over the given partition columns.
    ///
    /// With no columns every event maps to the same (empty) key.
    #[must_use]
    pub fn new(columns: Vec<PartitionColumn>) -> Self {
        Self { columns }
    }

    /// Extracts the partition key of a single-row `event`.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if a partition column is missing, has an
    /// unsupported type, or the event does not hold exactly one row.
    pub fn key(&self, event: &Event) -> Result<Vec<u8>, OperatorError> {
        ensure_single_row(event)?;
        let mut key = Vec::new();

        for col in &self.columns {
            let array = column(event, &col.column_name)?;

            if array.is_null(0) {
                key.push(0x00); // null marker
                continue;
            }

            key.push(0x01); // non-null marker

            match array.data_type() {
                DataType::Int64 => {
                    let arr = downcast::<Int64Array>(array, &col.column_name)?;
                    key.extend_from_slice(&arr.value(0).to_le_bytes());
                }
                DataType::Int32 => {
                    let arr = downcast::<Int32Array>(array, &col.column_name)?;
                    key.extend_from_slice(&arr.value(0).to_le_bytes());
                }
                DataType::UInt64 => {
                    let arr = downcast::<UInt64Array>(array, &col.column_name)?;
                    key.extend_from_slice(&arr.value(0).to_le_bytes());
                }
                DataType::Utf8 => {
                    let arr = downcast::<StringArray>(array, &col.column_name)?;
                    let val = arr.value(0);
                    // length prefix keeps ("ab","c") and ("a","bc") apart
                    let len = u32::try_from(val.len()).unwrap_or(u32::MAX);
                    key.extend_from_slice(&len.to_le_bytes());
                    key.extend_from_slice(val.as_bytes());
                }
                DataType::Float64 => {
                    let arr = downcast::<Float64Array>(array, &col.column_name)?;
                    key.extend_from_slice(&arr.value(0).to_bits().to_le_bytes());
                }
                other => return Err(unsupported(&col.column_name, other)),
            }
        }

        Ok(key)
    }
}

/// Reads a per-row rank end from an integer column.
///
/// Negative values clamp to 0, which leaves the partition's window empty.
///
/// # Errors
///
/// Returns `OperatorError` if the column is missing, NULL, or not an
/// integer column.
pub fn read_rank_end(event: &Event, column_name: &str) -> Result<u64, OperatorError> {
    let array = column(event, column_name)?;
    if array.is_null(0) {
        return Err(OperatorError::NullRankEnd(column_name.to_string()));
    }
    let value = match array.data_type() {
        DataType::Int64 => downcast::<Int64Array>(array, column_name)?.value(0),
        DataType::Int32 => i64::from(downcast::<Int32Array>(array, column_name)?.value(0)),
        DataType::UInt64 => {
            return Ok(downcast::<UInt64Array>(array, column_name)?.value(0));
        }
        other => return Err(unsupported(column_name, other)),
    };
    Ok(u64::try_from(value).unwrap_or(0))
}

fn ensure_single_row(event: &Event) -> Result<(), OperatorError> {
    match event.data.num_rows() {
        1 => Ok(()),
        0 => Err(OperatorError::EmptyEvent),
        rows => Err(OperatorError::MultiRowEvent(rows)),
    }
}

fn column<'a>(event: &'a Event, name: &str) -> Result<&'a ArrayRef, OperatorError> {
    ensure_single_row(event)?;
    let batch = &event.data;
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| OperatorError::MissingColumn(name.to_string()))?;
    Ok(batch.column(idx))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T, OperatorError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| unsupported(name, array.data_type()))
}

fn unsupported(column: &str, data_type: &DataType) -> OperatorError {
    OperatorError::UnsupportedType {
        column: column.to_string(),
        data_type: data_type.to_string(),
    }
}

// === Sort key encoding helpers ===

/// Encodes a null value marker into the sort key.
///
/// The marker is never bit-flipped, so NULL placement depends only on
/// `nulls_first`, whatever the column direction.
pub fn encode_null(nulls_first: bool, key: &mut Vec<u8>) {
    key.push(if nulls_first { 0x00 } else { 0x01 });
}

/// Encodes a non-null value marker into the sort key.
pub fn encode_not_null(nulls_first: bool, key: &mut Vec<u8>) {
    key.push(if nulls_first { 0x01 } else { 0x00 });
}

/// Encodes an i64 value as memcomparable bytes.
///
/// XOR with sign bit to convert signed comparison to unsigned,
/// then big-endian encoding. Optionally flip all bits for descending.
pub fn encode_i64(val: i64, descending: bool, key: &mut Vec<u8>) {
    #[allow(clippy::cast_sign_loss)]
    let unsigned = (val as u64) ^ (1u64 << 63);
    encode_u64(unsigned, descending, key);
}

/// Encodes a u64 value as memcomparable big-endian bytes.
pub fn encode_u64(val: u64, descending: bool, key: &mut Vec<u8>) {
    let bytes = val.to_be_bytes();
    if descending {
        key.extend(bytes.iter().map(|b| !b));
    } else {
        key.extend_from_slice(&bytes);
    }
}

/// Encodes an f64 value as memcomparable bytes.
///
/// Positive values get their sign bit flipped, negative values get every
/// bit flipped. Finite values, infinities and NaN all order correctly.
pub fn encode_f64(val: f64, descending: bool, key: &mut Vec<u8>) {
    let bits = val.to_bits();
    let encoded = if bits & (1u64 << 63) == 0 {
        bits ^ (1u64 << 63)
    } else {
        !bits
    };
    encode_u64(encoded, descending, key);
}

/// Encodes a UTF-8 string as memcomparable bytes.
///
/// Embedded 0x00 bytes are escaped as 0x00 0xFF and the string ends with
/// 0x00 0x00, so no encoded string is a prefix of another and the next
/// column's bytes never take part in the comparison. For descending order,
/// flips all bits.
pub fn encode_utf8(val: &str, descending: bool, key: &mut Vec<u8>) {
    let start = key.len();
    for &byte in val.as_bytes() {
        key.push(byte);
        if byte == 0x00 {
            key.push(0xFF);
        }
    }
    key.extend_from_slice(&[0x00, 0x00]);
    if descending {
        for byte in &mut key[start..] {
            *byte = !*byte;
        }
    }
}
