//! Datagram payload definitions

use serde::{Deserialize, Serialize};

use crate::sequence::Record;

/// Current wire message version
pub const WIRE_VERSION: u16 = 1;

/// One streamed sequence record, tagged with its owner
///
/// Every datagram carries exactly one message. Fields are positional in
/// postcard, so any layout change must bump [`WIRE_VERSION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub version: u16,
    pub experiment_id: String,
    pub run_id: String,
    pub field_name: String,
    pub record: Record,
}

impl WireMessage {
    /// Wrap a record at the current wire version
    pub fn new(
        experiment_id: impl Into<String>,
        run_id: impl Into<String>,
        field_name: impl Into<String>,
        record: Record,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            experiment_id: experiment_id.into(),
            run_id: run_id.into(),
            field_name: field_name.into(),
            record,
        }
    }
}
