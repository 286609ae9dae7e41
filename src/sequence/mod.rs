//! Append-only, timestamped, index-tracked logs of records.
//!
//! A [`Sequence`] buffers appended records in a pending list and merges them
//! into a columnar [`Table`] on [`Sequence::flush`]. The same sequence accepts
//! records from two sources:
//!
//! - **Local appends** ([`Sequence::append`]): the sequence assigns `idx` and
//!   `timestamp`. If a stream hook is attached, the record is forwarded to the
//!   hook before it is buffered locally.
//! - **Remote records** ([`Sequence::receive_remote`]): records that crossed
//!   the network already carry the sender's `idx` and `timestamp` and are
//!   buffered verbatim. Later local appends continue after the highest
//!   remote `idx` seen.
//!
//! Remote records can be lost or reordered in transit, so the table is not
//! guaranteed to be sorted by `idx` and may contain gaps.

pub mod record;
pub mod table;
pub mod value;

pub use record::{IDX_KEY, Record, TIMESTAMP_KEY, now_us};
pub use table::Table;
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Forwarding hook installed on a streamed sequence
///
/// Called with the field name the sequence is registered under and the
/// freshly created record. Must not block indefinitely.
pub type StreamHook = Arc<dyn Fn(&str, &Record) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct StreamLink {
    name: String,
    hook: StreamHook,
}

/// Append-only log of records belonging to one run field
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Sequence {
    pending: Vec<Record>,
    table: Table,
    next_idx: u64,
    /// Never persisted: a loaded sequence always starts detached
    #[serde(skip)]
    stream: Option<StreamLink>,
}

impl Sequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequence from pre-existing rows
    ///
    /// Local indices continue after the highest `idx` already present; rows
    /// are not assumed to be ordered.
    pub fn from_table(table: Table) -> Self {
        let next_idx = table.max_idx().map_or(0, |m| m + 1);
        Self {
            pending: Vec::new(),
            table,
            next_idx,
            stream: None,
        }
    }

    /// Append a record of tracked values
    ///
    /// Fails with [`Error::ReservedKey`] if `idx` or `timestamp` is supplied,
    /// leaving the sequence untouched. When streaming, errors raised by the
    /// hook (e.g. [`Error::PayloadTooLarge`]) are returned and the record is
    /// not buffered locally; its `idx` stays consumed.
    pub fn append<I, K, V>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut values = BTreeMap::new();
        for (key, value) in fields {
            let key = key.into();
            if record::is_reserved(&key) {
                return Err(Error::ReservedKey(key));
            }
            values.insert(key, value.into());
        }

        let record = Record::new(self.next_idx, now_us(), values);
        self.next_idx += 1;

        if let Some(link) = &self.stream {
            (link.hook)(&link.name, &record)?;
        }

        self.pending.push(record);
        Ok(())
    }

    /// Install the forwarding hook; every later local append also streams
    pub fn attach_stream(&mut self, name: impl Into<String>, hook: StreamHook) {
        self.stream = Some(StreamLink {
            name: name.into(),
            hook,
        });
    }

    /// Remove the forwarding hook
    pub fn detach_stream(&mut self) {
        self.stream = None;
    }

    /// Check if a forwarding hook is attached
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Buffer a record received from the network as-is
    ///
    /// The record keeps the `idx` and `timestamp` assigned by the remote
    /// sender. The local counter only moves forward, past the remote `idx`.
    pub fn receive_remote(&mut self, record: Record) {
        self.next_idx = self.next_idx.max(record.idx.saturating_add(1));
        self.pending.push(record);
    }

    /// Merge pending records into the table
    ///
    /// Idempotent: flushing with nothing pending leaves the table unchanged.
    pub fn flush(&mut self) -> &mut Self {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.table.extend_records(&pending);
        }
        self
    }

    /// Flush and return the materialized table
    pub fn table(&mut self) -> &Table {
        self.flush();
        &self.table
    }

    /// Flush and return the number of materialized rows
    pub fn size(&mut self) -> usize {
        self.flush();
        self.table.len()
    }

    /// Number of rows across pending and materialized state
    pub fn len(&self) -> usize {
        self.table.len() + self.pending.len()
    }

    /// Check if the sequence holds no rows at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop pending (not yet flushed) records
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Index the next local append will receive
    pub fn next_idx(&self) -> u64 {
        self.next_idx
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("pending", &self.pending.len())
            .field("rows", &self.table.len())
            .field("next_idx", &self.next_idx)
            .field("stream", &self.stream.as_ref().map(|s| s.name.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn v_column(table: &Table) -> Vec<i64> {
        table
            .column("v")
            .unwrap()
            .iter()
            .map(|c| c.as_ref().and_then(Value::as_i64).unwrap())
            .collect()
    }

    #[test]
    fn test_reserved_keys_rejected() {
        let mut seq = Sequence::new();
        seq.append([("a", 1)]).unwrap();

        for key in ["idx", "timestamp"] {
            let err = seq.append([(key, 5)]).unwrap_err();
            assert!(matches!(err, Error::ReservedKey(ref k) if k == key));
        }

        // Nothing else was recorded and no index was consumed
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.next_idx(), 1);
    }

    #[test]
    fn test_local_append_ordered() {
        let mut seq = Sequence::new();
        for i in 0..10 {
            seq.append([("v", i)]).unwrap();
        }
        assert_eq!(seq.len(), 10);

        let table = seq.table();
        assert_eq!(table.idx(), &(0..10).collect::<Vec<u64>>()[..]);
        assert_eq!(v_column(table), (0..10).collect::<Vec<i64>>());
        assert!(table.timestamps().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_flush_idempotent() {
        let mut seq = Sequence::new();
        seq.append([("a", 1.5), ("b", 2.5)]).unwrap();

        let first = seq.flush().table().clone();
        let second = seq.flush().table().clone();
        assert_eq!(first, second);
        assert_eq!(first.column_names(), vec!["idx", "timestamp", "a", "b"]);
    }

    #[test]
    fn test_size_and_len() {
        let mut seq = Sequence::new();
        seq.append([("a", 1)]).unwrap();
        seq.flush();
        seq.append([("a", 2)]).unwrap();

        assert_eq!(seq.len(), 2);
        assert_eq!(seq.size(), 2);
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_clear_drops_pending_only() {
        let mut seq = Sequence::new();
        seq.append([("a", 1)]).unwrap();
        seq.flush();
        seq.append([("a", 2)]).unwrap();
        seq.clear();
        assert_eq!(seq.size(), 1);
    }

    #[test]
    fn test_receive_remote_verbatim() {
        let mut seq = Sequence::new();
        seq.receive_remote(Record::new(7, 42, BTreeMap::new()));
        seq.receive_remote(Record::new(3, 41, BTreeMap::new()));

        let table = seq.table();
        assert_eq!(table.idx(), &[7, 3]);
        assert_eq!(table.timestamps(), &[42, 41]);

        // Out-of-order arrivals never move the counter backwards
        assert_eq!(seq.next_idx(), 8);
    }

    #[test]
    fn test_append_after_remote_records_continues_index() {
        let mut seq = Sequence::new();
        for idx in [1, 0, 2] {
            seq.receive_remote(Record::new(idx, idx, BTreeMap::new()));
        }

        let bytes = postcard::to_allocvec(&seq).unwrap();
        let mut restored: Sequence = postcard::from_bytes(&bytes).unwrap();
        restored.append([("v", 99)]).unwrap();

        assert_eq!(restored.table().idx(), &[1, 0, 2, 3]);
    }

    #[test]
    fn test_from_table_continues_index() {
        let mut table = Table::new();
        table.extend_records(&[
            Record::new(4, 1, BTreeMap::new()),
            Record::new(9, 2, BTreeMap::new()),
            Record::new(2, 3, BTreeMap::new()),
        ]);
        let mut seq = Sequence::from_table(table);
        seq.append([("a", 1)]).unwrap();
        assert_eq!(seq.table().idx(), &[4, 9, 2, 10]);
    }

    #[test]
    fn test_stream_hook_sees_record_before_local_append() {
        let seen: Arc<Mutex<Vec<(String, u64, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut seq = Sequence::new();
        seq.append([("v", 0)]).unwrap();
        seq.attach_stream(
            "metrics",
            Arc::new(move |name: &str, record: &Record| -> Result<()> {
                sink.lock().push((name.to_string(), record.idx, record.values.len()));
                Ok(())
            }),
        );
        assert!(seq.is_streaming());
        seq.append([("v", 1)]).unwrap();
        seq.detach_stream();
        seq.append([("v", 2)]).unwrap();

        assert_eq!(*seen.lock(), vec![("metrics".to_string(), 1, 1)]);
        assert_eq!(seq.size(), 3);
    }

    #[test]
    fn test_stream_hook_error_propagates() {
        let mut seq = Sequence::new();
        seq.attach_stream(
            "metrics",
            Arc::new(|_: &str, _: &Record| -> Result<()> {
                Err(Error::PayloadTooLarge {
                    size: 2000,
                    budget: 1500,
                })
            }),
        );

        let err = seq.append([("v", 1)]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.next_idx(), 1);
    }

    #[test]
    fn test_stream_link_not_persisted() {
        let mut seq = Sequence::new();
        seq.attach_stream("metrics", Arc::new(|_: &str, _: &Record| -> Result<()> { Ok(()) }));
        seq.append([("v", 1)]).unwrap();

        let bytes = postcard::to_allocvec(&seq).unwrap();
        let mut restored: Sequence = postcard::from_bytes(&bytes).unwrap();
        assert!(!restored.is_streaming());
        assert_eq!(restored.next_idx(), 1);
        assert_eq!(restored.size(), 1);
    }
}
