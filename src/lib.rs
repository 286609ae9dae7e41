//! trackstream - experiment tracking with real-time datagram streaming
//!
//! A running computation appends measurements to [`Sequence`] fields of a
//! [`Run`]. While a run is streaming, every append is also sent as one
//! datagram to a [`StreamServer`], whose [`BatchWriter`] applies the records
//! to the stored experiment and persists it in batches.
//!
//! ```no_run
//! use trackstream::{DatastreamConfig, Experiment, IdGenerator, MemoryStore, Store, StreamServer};
//! use trackstream::IfExists;
//!
//! let store = MemoryStore::new();
//! let mut ids = IdGenerator::random();
//! let mut experiment = Experiment::new("demo", &mut ids);
//! experiment.add_run(&mut ids).init_sequence("metrics");
//! store.persist(&experiment, IfExists::Fail)?;
//!
//! let config = DatastreamConfig::default();
//! let mut server = StreamServer::new(&config, store.clone())?;
//! server.start(false)?;
//!
//! let run = experiment.first_run_mut().expect("one run");
//! run.stream_scope(&config, |run| {
//!     let metrics = run.sequence_mut("metrics").expect("declared above");
//!     for step in 0..10 {
//!         metrics.append([("loss", 1.0 / (step + 1) as f64)])?;
//!     }
//!     Ok(())
//! })?;
//!
//! server.stop()?;
//! # Ok::<(), trackstream::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod sequence;
pub mod storage;
pub mod streaming;

// Re-export commonly used types
pub use config::{AppConfig, DatastreamConfig};
pub use error::{Error, Result};
pub use model::{Experiment, Field, IdGenerator, Run};
pub use sequence::{Record, Sequence, Table, Value};
pub use storage::{FileStore, IfExists, MemoryStore, Store};
pub use streaming::{BatchWriter, StreamClient, StreamServer, TransportKind, WireFormat};
