//! Receiving half of the datastream
//!
//! # Lifecycle
//!
//! ```text
//! Init ──start()──► Binding ──bind ok──► Listening ──stop()──► Terminating ──► Closed
//!                      │
//!                      ├──bind failed──► Closed (Error::Bind)
//!                      └──writer or thread start failed──► Closed
//! ```
//!
//! `start()` binds the socket on the caller's thread, starts the
//! [`BatchWriter`], spawns the receive thread and returns once that thread
//! reports ready. The receive thread polls a non-blocking socket, decodes
//! each datagram and enqueues it for the writer. On exit it closes the
//! socket, removes a local socket file and stops the writer.

use crossbeam_channel::Sender;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::DatastreamConfig;
use crate::error::{Error, Result};
use crate::storage::Store;
use crate::streaming::messages::WireMessage;
use crate::streaming::signal::Signal;
use crate::streaming::transport::{Address, DatagramSocket};
use crate::streaming::wire::Codec;
use crate::streaming::writer::{BatchWriter, WriterMonitor, WriterStats};

/// Receive buffer size; larger than either datagram budget so oversized
/// datagrams from foreign senders are read whole and rejected by the codec
const MAX_DATAGRAM_SIZE: usize = 65536;

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Binding,
    Listening,
    Terminating,
    Closed,
}

impl ServerState {
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Init => "init",
            ServerState::Binding => "binding",
            ServerState::Listening => "listening",
            ServerState::Terminating => "terminating",
            ServerState::Closed => "closed",
        }
    }
}

/// Final counters of a stopped server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerStats {
    /// Datagrams received
    pub messages: u64,
    /// Datagrams that failed to decode
    pub decode_errors: u64,
    /// Time spent listening
    pub elapsed: Duration,
    /// Final writer counters
    pub writer: WriterStats,
}

impl ServerStats {
    /// Datagrams per second while listening
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct ServerCounters {
    messages: AtomicU64,
    decode_errors: AtomicU64,
}

/// Requests a blocking server to shut down
///
/// Safe to use from a signal handler thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    terminate: Signal,
}

impl ServerHandle {
    /// Ask the receive loop to exit
    pub fn request_stop(&self) {
        self.terminate.set();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.terminate.is_set()
    }
}

/// Datagram server feeding a [`BatchWriter`]
pub struct StreamServer {
    state: ServerState,
    address: Address,
    codec: Codec,
    recv_throttle: Duration,
    writer: Option<BatchWriter>,
    writer_monitor: WriterMonitor,
    ready: Signal,
    received: Signal,
    terminate: Signal,
    counters: Arc<ServerCounters>,
    bound: Option<Address>,
    handle: Option<JoinHandle<Result<ServerStats>>>,
}

impl StreamServer {
    /// Create a server for `config.server_address`, persisting through `store`
    pub fn new<S: Store + 'static>(config: &DatastreamConfig, store: S) -> Result<Self> {
        let address = Address::resolve(config.kind, &config.server_address)?;
        let writer = BatchWriter::new(store, config.writer_persist_throttle()?);

        Ok(Self {
            state: ServerState::Init,
            address,
            codec: Codec::new(config.wire_format),
            recv_throttle: config.server_recv_throttle()?,
            writer_monitor: writer.monitor(),
            writer: Some(writer),
            ready: Signal::new(),
            received: Signal::new(),
            terminate: Signal::new(),
            counters: Arc::new(ServerCounters::default()),
            bound: None,
            handle: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Handle for requesting shutdown from another thread
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            terminate: self.terminate.clone(),
        }
    }

    /// Set once the receive thread is running
    pub fn ready(&self) -> &Signal {
        &self.ready
    }

    /// Set on every datagram received
    pub fn received(&self) -> &Signal {
        &self.received
    }

    /// Observer for the batch writer owned by this server
    pub fn writer_monitor(&self) -> &WriterMonitor {
        &self.writer_monitor
    }

    /// Address actually bound (resolves port 0 for INET)
    pub fn local_address(&self) -> Option<&Address> {
        self.bound.as_ref()
    }

    /// Datagrams received so far
    pub fn messages(&self) -> u64 {
        self.counters.messages.load(Ordering::Relaxed)
    }

    fn transition(&mut self, operation: &'static str, to: ServerState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (ServerState::Init, ServerState::Binding)
                | (ServerState::Binding, ServerState::Listening)
                | (ServerState::Binding, ServerState::Closed)
                | (ServerState::Listening, ServerState::Terminating)
                | (ServerState::Terminating, ServerState::Closed)
        );
        if !allowed {
            return Err(Error::InvalidState {
                component: "server",
                state: self.state.name(),
                operation,
            });
        }
        log::debug!("Datastream server: {} -> {}", self.state.name(), to.name());
        self.state = to;
        Ok(())
    }

    /// Bind, start the writer and the receive thread
    ///
    /// Returns once the receive thread is ready. With `blocking`, keeps the
    /// caller until [`ServerHandle::request_stop`] is called, then stops the
    /// server before returning.
    pub fn start(&mut self, blocking: bool) -> Result<ServerHandle> {
        self.transition("start", ServerState::Binding)?;

        let socket = match self.bind() {
            Ok(socket) => socket,
            Err(e) => {
                self.transition("start", ServerState::Closed)?;
                return Err(e);
            }
        };
        match socket.local_address() {
            Ok(bound) => self.bound = bound.or_else(|| Some(self.address.clone())),
            Err(e) => {
                drop(socket);
                return Err(self.abort_start(e.into()));
            }
        }

        let Some(mut writer) = self.writer.take() else {
            drop(socket);
            let state = self.state.name();
            return Err(self.abort_start(Error::InvalidState {
                component: "server",
                state,
                operation: "start",
            }));
        };
        if let Err(e) = writer.start() {
            drop(socket);
            return Err(self.abort_start(e));
        }

        let worker = ReceiveWorker {
            socket,
            address: self.address.clone(),
            codec: self.codec,
            sink: writer.sender(),
            writer,
            recv_throttle: self.recv_throttle,
            ready: self.ready.clone(),
            received: self.received.clone(),
            terminate: self.terminate.clone(),
            counters: Arc::clone(&self.counters),
        };
        // A failed spawn drops the worker, closing the socket and stopping the writer
        let handle = match thread::Builder::new()
            .name("datastream-recv".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => return Err(self.abort_start(e.into())),
        };
        self.handle = Some(handle);

        self.ready.wait();
        self.transition("start", ServerState::Listening)?;
        log::info!("Datastream server listening on {}", self.address);

        if blocking {
            self.terminate.wait();
            self.stop()?;
        }
        Ok(self.handle())
    }

    /// Close a half-started server; the socket must already be dropped
    fn abort_start(&mut self, error: Error) -> Error {
        if let Err(e) = self.transition("start", ServerState::Closed) {
            log::error!("Datastream server: {}", e);
        }
        self.bound = None;
        if let Address::Local(path) = &self.address
            && let Err(e) = fs::remove_file(path)
            && e.kind() != ErrorKind::NotFound
        {
            log::warn!("Could not remove socket {}: {}", path.display(), e);
        }
        error
    }

    fn bind(&self) -> Result<DatagramSocket> {
        if let Address::Local(path) = &self.address
            && path.exists()
        {
            log::warn!("Removing stale socket {}", path.display());
            if let Err(e) = fs::remove_file(path)
                && e.kind() != ErrorKind::NotFound
            {
                return Err(Error::Bind {
                    address: self.address.to_string(),
                    source: e,
                });
            }
        }

        let socket = DatagramSocket::bind(&self.address).map_err(|source| Error::Bind {
            address: self.address.to_string(),
            source,
        })?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    /// Stop the receive thread and the writer, returning final counters
    ///
    /// Store failures hit by the writer are returned here.
    pub fn stop(&mut self) -> Result<ServerStats> {
        self.transition("stop", ServerState::Terminating)?;
        self.terminate.set();

        let outcome = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::WorkerPanicked("datastream-recv"))?,
            None => Err(Error::WorkerPanicked("datastream-recv")),
        };
        self.transition("stop", ServerState::Closed)?;
        outcome
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if self.state == ServerState::Listening
            && let Err(e) = self.stop()
        {
            log::error!("Datastream server failed during drop: {}", e);
        }
    }
}

struct ReceiveWorker {
    socket: DatagramSocket,
    address: Address,
    codec: Codec,
    sink: Sender<WireMessage>,
    writer: BatchWriter,
    recv_throttle: Duration,
    ready: Signal,
    received: Signal,
    terminate: Signal,
    counters: Arc<ServerCounters>,
}

impl ReceiveWorker {
    fn run(self) -> Result<ServerStats> {
        let started = Instant::now();
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        self.ready.set();

        while !self.terminate.is_set() {
            let len = match self.socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.recv_throttle);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("Datastream recv error: {}", e);
                    thread::sleep(self.recv_throttle);
                    continue;
                }
            };

            self.counters.messages.fetch_add(1, Ordering::Relaxed);
            match self.codec.decode_message(&buffer[..len]) {
                Ok(message) => {
                    if self.sink.send(message).is_err() {
                        log::warn!("Batch writer gone, datagram discarded");
                    }
                }
                Err(e) => {
                    self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Discarding undecodable datagram ({} bytes): {}", len, e);
                }
            }
            self.received.set();
            thread::sleep(self.recv_throttle);
        }

        self.shutdown(started.elapsed())
    }

    fn shutdown(self, elapsed: Duration) -> Result<ServerStats> {
        let ReceiveWorker {
            socket,
            address,
            mut writer,
            counters,
            ..
        } = self;
        drop(socket);

        let messages = counters.messages.load(Ordering::Relaxed);
        let decode_errors = counters.decode_errors.load(Ordering::Relaxed);
        let rate = if elapsed.as_secs_f64() > 0.0 {
            messages as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        log::info!(
            "Datastream server on {} closed: {} messages ({} undecodable), {:.1} msg/s",
            address,
            messages,
            decode_errors,
            rate
        );

        if let Address::Local(path) = &address
            && let Err(e) = fs::remove_file(path)
            && e.kind() != ErrorKind::NotFound
        {
            log::warn!("Could not remove socket {}: {}", path.display(), e);
        }

        let writer = writer.stop()?;
        Ok(ServerStats {
            messages,
            decode_errors,
            elapsed,
            writer,
        })
    }
}
