//! Datagram streaming of sequence records to a persisting server

pub mod client;
pub mod messages;
pub mod server;
pub mod signal;
pub mod transport;
pub mod wire;
pub mod writer;

pub use client::{ClientStats, StreamClient};
pub use messages::{WIRE_VERSION, WireMessage};
pub use server::{ServerHandle, ServerState, ServerStats, StreamServer};
pub use signal::Signal;
pub use transport::{Address, DatagramSocket, INET_BUDGET, LOCAL_BUDGET, TransportKind};
pub use wire::{Codec, WireFormat};
pub use writer::{BatchSummary, BatchWriter, WorkingSet, WriterMonitor, WriterState, WriterStats};
