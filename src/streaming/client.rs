//! Sending half of the datastream
//!
//! A [`StreamClient`] is bound to one run. Every call encodes one message and
//! sends it as a single datagram to the configured server address.
//!
//! Delivery is best-effort:
//! - a payload over the datagram budget is rejected before any socket call
//! - an OS-level send failure (full kernel buffer, no listener) is counted and
//!   swallowed
//! - datagrams may be lost or reordered in transit
//!
//! Each successful or failed send is followed by a fixed pause so a tight
//! append loop cannot flood the receiver.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DatastreamConfig;
use crate::error::{Error, Result};
use crate::sequence::Record;
use crate::streaming::messages::WireMessage;
use crate::streaming::transport::{Address, DatagramSocket};
use crate::streaming::wire::Codec;

/// Snapshot of client counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientStats {
    /// Datagrams handed to the socket (including failed sends)
    pub messages: u64,
    /// Sends the OS refused
    pub errors: u64,
    /// Time since the client was created
    pub elapsed: Duration,
}

impl ClientStats {
    /// Messages per second over the client's lifetime
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages as f64 / secs
        } else {
            0.0
        }
    }
}

/// Datagram sender for one run
#[derive(Debug)]
pub struct StreamClient {
    socket: DatagramSocket,
    target: Address,
    codec: Codec,
    budget: usize,
    throttle: Duration,
    experiment_id: String,
    run_id: String,
    messages: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

impl StreamClient {
    /// Open an unconnected socket towards the configured client address
    pub fn new(
        config: &DatastreamConfig,
        experiment_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Result<Self> {
        let target = Address::resolve(config.kind, &config.client_address)?;
        let socket = DatagramSocket::unbound_for(&target)?;
        let experiment_id = experiment_id.into();
        let run_id = run_id.into();

        log::debug!(
            "Datastream client for run {} of experiment {} sending to {}",
            run_id,
            experiment_id,
            target
        );

        Ok(Self {
            socket,
            budget: target.budget(),
            target,
            codec: Codec::new(config.wire_format),
            throttle: config.client_send_throttle()?,
            experiment_id,
            run_id,
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Encode `value` and send it as one datagram
    ///
    /// Only [`Error::PayloadTooLarge`] and codec failures are returned; OS
    /// send failures are counted in [`ClientStats::errors`].
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        if bytes.len() > self.budget {
            return Err(Error::PayloadTooLarge {
                size: bytes.len(),
                budget: self.budget,
            });
        }

        self.messages.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.socket.send_to(&bytes, &self.target) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            log::trace!("Datagram to {} dropped: {}", self.target, e);
        }

        if !self.throttle.is_zero() {
            thread::sleep(self.throttle);
        }
        Ok(())
    }

    /// Send a sequence record tagged with this client's run
    pub fn send_sequence_record(&self, field_name: &str, record: &Record) -> Result<()> {
        let message = WireMessage::new(
            self.experiment_id.as_str(),
            self.run_id.as_str(),
            field_name,
            record.clone(),
        );
        self.send(&message)
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }

    /// Log and return the current counters
    pub fn report(&self) -> ClientStats {
        let stats = self.stats();
        log::info!(
            "Datastream client: {} messages, {} errors, {:.1} msg/s",
            stats.messages,
            stats.errors,
            stats.rate()
        );
        stats
    }

    /// Release the socket and report final counters
    pub fn close(self) -> ClientStats {
        self.report()
    }
}
