//! # Top-N Buffer
//!
//! Ordered multi-map from sort key to the rows sharing that key.
//!
//! Groups are ordered by `K`'s `Ord` (smallest = best rank). Rows inside a
//! group keep their append order, which is the tie-break between rows with
//! equal sort keys. A running row count is kept next to the map so `len()`
//! is O(1).
//!
//! One buffer mirrors the persisted ranking state of a single partition.

use std::collections::BTreeMap;

/// Sorted multi-map holding one partition's ranked rows.
#[derive(Debug, Clone)]
pub struct TopNBuffer<K, R> {
    groups: BTreeMap<K, Vec<R>>,
    /// Total rows across all groups.
    size: usize,
}

impl<K: Ord, R> TopNBuffer<K, R> {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
            size: 0,
        }
    }

    /// Appends `row` to the group for `key`, creating the group if absent.
    ///
    /// Returns the total number of rows in the buffer.
    pub fn put(&mut self, key: K, row: R) -> usize {
        self.groups.entry(key).or_default().push(row);
        self.size += 1;
        self.size
    }

    /// Appends `rows` to the group for `key`, keeping their relative order.
    ///
    /// Used when replaying persisted state. An empty `rows` leaves the
    /// buffer untouched.
    pub fn put_all(&mut self, key: K, rows: Vec<R>) {
        if rows.is_empty() {
            return;
        }
        self.size += rows.len();
        self.groups.entry(key).or_default().extend(rows);
    }

    /// Returns the rows stored under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&[R]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Returns true if a group exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.groups.contains_key(key)
    }

    /// Removes the whole group for `key`, returning its rows.
    pub fn remove_all(&mut self, key: &K) -> Option<Vec<R>> {
        let rows = self.groups.remove(key)?;
        self.size -= rows.len();
        Some(rows)
    }

    /// Removes the last row of the worst group.
    ///
    /// The group is dropped once it becomes empty. Returns `None` on an
    /// empty buffer.
    pub fn remove_last(&mut self) -> Option<R> {
        let mut entry = self.groups.last_entry()?;
        let row = entry.get_mut().pop();
        if entry.get().is_empty() {
            entry.remove();
        }
        if row.is_some() {
            self.size -= 1;
        }
        row
    }

    /// Returns the worst-ranked group.
    #[must_use]
    pub fn last_entry(&self) -> Option<(&K, &[R])> {
        self.groups
            .last_key_value()
            .map(|(key, rows)| (key, rows.as_slice()))
    }

    /// Returns the worst-ranked row.
    #[must_use]
    pub fn last_element(&self) -> Option<&R> {
        self.groups.values().next_back().and_then(|rows| rows.last())
    }

    /// Returns the row at 1-based `rank`, counting ties in append order.
    #[must_use]
    pub fn get_element(&self, rank: usize) -> Option<&R> {
        if rank == 0 {
            return None;
        }
        self.rows().nth(rank - 1)
    }

    /// Iterates groups from best to worst.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[R])> {
        self.groups.iter().map(|(key, rows)| (key, rows.as_slice()))
    }

    /// Iterates rows from best to worst.
    pub fn rows(&self) -> impl Iterator<Item = &R> {
        self.groups.values().flatten()
    }

    /// Total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the buffer holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of distinct sort keys.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl<K: Ord, R> Default for TopNBuffer<K, R> {
    fn default() -> Self {
        Self::new()
    }
}
