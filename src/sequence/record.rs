//! A single timestamped, indexed entry of a sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::Value;

/// Reserved key holding the record index
pub const IDX_KEY: &str = "idx";

/// Reserved key holding the record timestamp
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Check whether a payload key collides with the reserved columns
pub fn is_reserved(key: &str) -> bool {
    key == IDX_KEY || key == TIMESTAMP_KEY
}

/// One entry of a [`Sequence`](super::Sequence)
///
/// `idx` and `timestamp_us` are assigned by the sequence that created the
/// record; `values` holds the caller's payload keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Position assigned at append time (gaps indicate lost records)
    pub idx: u64,
    /// Microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Payload columns
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record with the given index and timestamp
    pub fn new(idx: u64, timestamp_us: u64, values: BTreeMap<String, Value>) -> Self {
        Self {
            idx,
            timestamp_us,
            values,
        }
    }

    /// Payload value for `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Current wall-clock time in microseconds since the Unix epoch
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
