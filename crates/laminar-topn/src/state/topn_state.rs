//! Persistent layout of Top-N ranking state.
//!
//! Every key is namespaced by the operator id so several operators can
//! share one store:
//!
//! ```text
//! [id_len: u16 BE][operator_id][tag: u8][pk_len: u32 BE][partition_key][sort_key?]
//! ```
//!
//! - tag `0x01`: one sort-key group, value = rkyv `Vec<StoredRow>`
//! - tag `0x02`: the partition's variable rank end, value = rkyv `u64`
//!
//! The partition key is length-prefixed, so a prefix scan for one partition
//! never matches a partition whose key merely starts with the same bytes.
//! Sort keys are memcomparable, so a prefix scan yields groups best first.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use super::{StateError, StateStore, StateStoreExt};
use crate::operator::sort_key::SortKey;
use crate::operator::topn_buffer::TopNBuffer;
use crate::operator::{Event, OperatorError};

const GROUP_TAG: u8 = 0x01;
const RANK_END_TAG: u8 = 0x02;

/// One persisted row: the event timestamp plus its batch as an Arrow IPC
/// stream.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct StoredRow {
    /// Event timestamp.
    pub timestamp: i64,
    /// Serialized record batch data.
    pub data: Vec<u8>,
}

impl StoredRow {
    /// Serializes an event into a fresh, unshared row copy.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::SerializationFailed` if IPC encoding fails.
    pub fn from_event(event: &Event) -> Result<Self, OperatorError> {
        let mut buf = Vec::new();
        {
            let mut writer =
                arrow_ipc::writer::StreamWriter::try_new(&mut buf, &event.data.schema())
                    .map_err(|e| OperatorError::SerializationFailed(e.to_string()))?;
            writer
                .write(&event.data)
                .map_err(|e| OperatorError::SerializationFailed(e.to_string()))?;
            writer
                .finish()
                .map_err(|e| OperatorError::SerializationFailed(e.to_string()))?;
        }
        Ok(Self {
            timestamp: event.timestamp,
            data: buf,
        })
    }

    /// Decodes the row back into an event.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError::SerializationFailed` if the bytes are not a
    /// single-batch IPC stream.
    pub fn to_event(&self) -> Result<Event, OperatorError> {
        let cursor = std::io::Cursor::new(self.data.as_slice());
        let mut reader = arrow_ipc::reader::StreamReader::try_new(cursor, None)
            .map_err(|e| OperatorError::SerializationFailed(e.to_string()))?;
        let batch = reader
            .next()
            .ok_or_else(|| OperatorError::SerializationFailed("Empty batch data".to_string()))?
            .map_err(|e| OperatorError::SerializationFailed(e.to_string()))?;
        Ok(Event::new(self.timestamp, batch))
    }
}

/// Key builder and typed accessors for one operator's ranking state.
#[derive(Debug, Clone)]
pub struct TopNStateKeys {
    /// `[id_len][operator_id]`
    namespace: Vec<u8>,
}

impl TopNStateKeys {
    /// Creates the key space for `operator_id`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotSupported` if the id is longer than
    /// `u16::MAX` bytes.
    pub fn new(operator_id: &str) -> Result<Self, StateError> {
        let id_len = u16::try_from(operator_id.len()).map_err(|_| {
            StateError::NotSupported(format!(
                "operator id of {} bytes exceeds the key namespace limit",
                operator_id.len()
            ))
        })?;
        let mut namespace = Vec::with_capacity(2 + operator_id.len());
        namespace.extend_from_slice(&id_len.to_be_bytes());
        namespace.extend_from_slice(operator_id.as_bytes());
        Ok(Self { namespace })
    }

    fn tagged(&self, tag: u8, partition_key: &[u8], extra: usize) -> Vec<u8> {
        let pk_len = u32::try_from(partition_key.len()).unwrap_or(u32::MAX);
        let mut key =
            Vec::with_capacity(self.namespace.len() + 5 + partition_key.len() + extra);
        key.extend_from_slice(&self.namespace);
        key.push(tag);
        key.extend_from_slice(&pk_len.to_be_bytes());
        key.extend_from_slice(partition_key);
        key
    }

    /// Prefix shared by every group of one partition.
    #[must_use]
    pub fn group_prefix(&self, partition_key: &[u8]) -> Vec<u8> {
        self.tagged(GROUP_TAG, partition_key, 0)
    }

    /// Key of one sort-key group.
    #[must_use]
    pub fn group_key(&self, partition_key: &[u8], sort_key: &[u8]) -> Vec<u8> {
        let mut key = self.tagged(GROUP_TAG, partition_key, sort_key.len());
        key.extend_from_slice(sort_key);
        key
    }

    /// Key of the partition's persisted rank end.
    #[must_use]
    pub fn rank_end_key(&self, partition_key: &[u8]) -> Vec<u8> {
        self.tagged(RANK_END_TAG, partition_key, 0)
    }

    /// Writes a fresh copy of one group.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if a row cannot be encoded or the write fails.
    pub fn put_rows(
        &self,
        state: &mut dyn StateStore,
        partition_key: &[u8],
        sort_key: &[u8],
        rows: &[Event],
    ) -> Result<(), OperatorError> {
        let stored = rows
            .iter()
            .map(StoredRow::from_event)
            .collect::<Result<Vec<_>, _>>()?;
        state.put_typed(&self.group_key(partition_key, sort_key), &stored)?;
        Ok(())
    }

    /// Deletes one group.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the delete fails.
    pub fn remove_rows(
        &self,
        state: &mut dyn StateStore,
        partition_key: &[u8],
        sort_key: &[u8],
    ) -> Result<(), StateError> {
        state.delete(&self.group_key(partition_key, sort_key))
    }

    /// Reads every group of a partition, best sort key first.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if a stored group cannot be decoded.
    pub fn scan_partition(
        &self,
        state: &dyn StateStore,
        partition_key: &[u8],
    ) -> Result<Vec<(SortKey, Vec<Event>)>, OperatorError> {
        let prefix = self.group_prefix(partition_key);
        let mut groups = Vec::new();
        for (key, value) in state.prefix_scan(&prefix) {
            let sort_key = key[prefix.len()..].to_vec();
            let archived = rkyv::access::<rkyv::Archived<Vec<StoredRow>>, rkyv::rancor::Error>(
                &value,
            )
            .map_err(|e| StateError::Corruption(e.to_string()))?;
            let stored = rkyv::deserialize::<Vec<StoredRow>, rkyv::rancor::Error>(archived)
                .map_err(|e| StateError::Serialization(e.to_string()))?;
            let rows = stored
                .iter()
                .map(StoredRow::to_event)
                .collect::<Result<Vec<_>, _>>()?;
            groups.push((sort_key, rows));
        }
        Ok(groups)
    }

    /// Rebuilds a partition's buffer by replaying its persisted groups.
    ///
    /// # Errors
    ///
    /// Returns `OperatorError` if any group fails to decode; no partial
    /// buffer is returned.
    pub fn restore_buffer(
        &self,
        state: &dyn StateStore,
        partition_key: &[u8],
    ) -> Result<TopNBuffer<SortKey, Event>, OperatorError> {
        let mut buffer = TopNBuffer::new();
        for (sort_key, rows) in self.scan_partition(state, partition_key)? {
            buffer.put_all(sort_key, rows);
        }
        Ok(buffer)
    }

    /// Reads the partition's persisted rank end.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the stored value cannot be decoded.
    pub fn rank_end(
        &self,
        state: &dyn StateStore,
        partition_key: &[u8],
    ) -> Result<Option<u64>, StateError> {
        state.get_typed::<u64>(&self.rank_end_key(partition_key))
    }

    /// Persists the partition's rank end.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the write fails.
    pub fn put_rank_end(
        &self,
        state: &mut dyn StateStore,
        partition_key: &[u8],
        rank_end: u64,
    ) -> Result<(), StateError> {
        state.put_typed(&self.rank_end_key(partition_key), &rank_end)
    }
}
