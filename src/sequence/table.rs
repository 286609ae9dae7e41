//! Columnar materialization of sequence records.
//!
//! Column order is always `[idx, timestamp, ...payload columns sorted by name]`.
//! Payload columns are nullable: a record that lacks a column contributes `None`
//! to it, and a column first seen late is backfilled with `None` for earlier rows.
//!
//! Rows are kept in arrival order. Records streamed over the network may arrive
//! out of order or with gaps, so callers that need `idx` order must use
//! [`Table::sorted_by_idx`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::{IDX_KEY, Record, TIMESTAMP_KEY};
use super::value::Value;

/// Materialized sequence contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    idx: Vec<u64>,
    timestamp_us: Vec<u64>,
    columns: BTreeMap<String, Vec<Option<Value>>>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    /// Column names in materialization order
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.columns.len() + 2);
        names.push(IDX_KEY);
        names.push(TIMESTAMP_KEY);
        names.extend(self.columns.keys().map(String::as_str));
        names
    }

    /// The `idx` column
    pub fn idx(&self) -> &[u64] {
        &self.idx
    }

    /// The `timestamp` column (microseconds since epoch)
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamp_us
    }

    /// A payload column by name
    pub fn column(&self, name: &str) -> Option<&[Option<Value>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Highest `idx` present, if any
    pub fn max_idx(&self) -> Option<u64> {
        self.idx.iter().copied().max()
    }

    /// Reassemble row `i` as a record
    pub fn row(&self, i: usize) -> Option<Record> {
        if i >= self.len() {
            return None;
        }
        let values = self
            .columns
            .iter()
            .filter_map(|(name, col)| col[i].clone().map(|v| (name.clone(), v)))
            .collect();
        Some(Record::new(self.idx[i], self.timestamp_us[i], values))
    }

    /// Iterate rows in stored order
    pub fn rows(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// Append records as new rows
    pub fn extend_records(&mut self, records: &[Record]) {
        if records.is_empty() {
            return;
        }

        let start = self.len();
        let total = start + records.len();

        // Columns introduced by this batch start out null for existing rows
        for record in records {
            for name in record.values.keys() {
                self.columns
                    .entry(name.clone())
                    .or_insert_with(|| vec![None; start]);
            }
        }

        for col in self.columns.values_mut() {
            col.reserve(records.len());
        }
        self.idx.reserve(records.len());
        self.timestamp_us.reserve(records.len());

        for record in records {
            self.idx.push(record.idx);
            self.timestamp_us.push(record.timestamp_us);
            for (name, col) in self.columns.iter_mut() {
                col.push(record.values.get(name).cloned());
            }
        }

        debug_assert!(self.columns.values().all(|c| c.len() == total));
    }

    /// Copy of the table with rows ordered by ascending `idx`
    ///
    /// Rows sharing an `idx` keep their relative order.
    pub fn sorted_by_idx(&self) -> Table {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.idx[i]);

        Table {
            idx: order.iter().map(|&i| self.idx[i]).collect(),
            timestamp_us: order.iter().map(|&i| self.timestamp_us[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), order.iter().map(|&i| col[i].clone()).collect()))
                .collect(),
        }
    }
}
