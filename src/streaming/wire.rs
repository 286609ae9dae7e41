//! Wire format serialization abstraction
//!
//! # Datagram Layout
//!
//! Datagrams carry no framing: one datagram is one encoded
//! [`WireMessage`], so the payload is the whole datagram.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ WireMessage { version, experiment_id, run_id,    │
//! │               field_name, record }               │
//! │ Postcard binary or JSON                          │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Formats
//!
//! ### Postcard (Default)
//! - Compact, positional; a field layout change requires a version bump
//! - Use case: regular operation, keeps records well under the datagram budget
//!
//! ### JSON
//! - Human-readable, unknown fields are ignored on decode
//! - Use case: debugging, non-Rust senders
//!
//! ## Safety
//!
//! Decoding only ever produces the declared serde types. Malformed bytes or
//! an unsupported version yield [`Error::Codec`]; nothing is executed on
//! behalf of the sender.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::streaming::messages::{WIRE_VERSION, WireMessage};

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    #[default]
    Postcard,
    /// JSON format - human-readable for debugging
    Json,
}

/// Codec for a single wire format
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    format: WireFormat,
}

impl Codec {
    /// Create a new codec for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Serialize a value to bytes
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => Ok(postcard::to_allocvec(value)?),
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserialize bytes to a value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Postcard => Ok(postcard::from_bytes(bytes)?),
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Deserialize a datagram, rejecting unsupported message versions
    pub fn decode_message(&self, bytes: &[u8]) -> Result<WireMessage> {
        let message: WireMessage = self.decode(bytes)?;
        if message.version != WIRE_VERSION {
            return Err(Error::Codec(format!(
                "Unsupported wire version {} (expected {})",
                message.version, WIRE_VERSION
            )));
        }
        Ok(message)
    }
}
