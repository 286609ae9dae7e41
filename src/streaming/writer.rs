//! Batch writer: applies streamed records to experiments and persists them
//!
//! # Pipeline
//!
//! ```text
//! StreamServer ──enqueue──► unbounded queue ──drain len()──► batch
//!                                                             │
//!                              ┌──────────────────────────────┘
//!                              ▼
//!              WorkingSet::process_batch
//!                 load experiment (cached for the writer's lifetime)
//!                 resolve run, resolve/create sequence field
//!                 Sequence::receive_remote
//!                 persist touched experiments (IfExists::Replace)
//! ```
//!
//! The writer thread waits one throttle interval before the first drain so
//! an initial burst is persisted in a single batch, then drains whatever is
//! queued at that instant, processes it, and waits again.
//!
//! Messages still queued when the writer stops are lost. Messages that cannot
//! be resolved (unknown experiment, run, or a field that is not a sequence)
//! are logged and dropped. Store failures end the writer thread, set
//! [`WriterMonitor::failed`] and surface from [`BatchWriter::stop`].

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::Experiment;
use crate::storage::{IfExists, Store};
use crate::streaming::messages::WireMessage;
use crate::streaming::signal::Signal;

/// Writer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Init,
    Running,
    Stopped,
}

impl WriterState {
    pub fn name(&self) -> &'static str {
        match self {
            WriterState::Init => "init",
            WriterState::Running => "running",
            WriterState::Stopped => "stopped",
        }
    }
}

/// Outcome of one [`WorkingSet::process_batch`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Messages taken from the batch
    pub processed: u64,
    /// Messages that could not be resolved
    pub dropped: u64,
    /// Experiments written to the store
    pub persisted: u64,
}

/// Experiments loaded by the writer, plus the batch being assembled
pub struct WorkingSet {
    store: Box<dyn Store>,
    experiments: HashMap<String, Experiment>,
    batch: Vec<WireMessage>,
}

impl WorkingSet {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            experiments: HashMap::new(),
            batch: Vec::new(),
        }
    }

    /// Queue a message for the next [`process_batch`](Self::process_batch)
    pub fn push(&mut self, message: WireMessage) {
        self.batch.push(message);
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Number of experiments currently cached
    pub fn cached(&self) -> usize {
        self.experiments.len()
    }

    /// Apply every batched message, then persist touched experiments
    ///
    /// Unresolvable messages are dropped with an error log. Any other store
    /// error is returned; the batch is consumed either way.
    pub fn process_batch(&mut self) -> Result<BatchSummary> {
        let batch = std::mem::take(&mut self.batch);
        let mut summary = BatchSummary::default();
        let mut touched = BTreeSet::new();

        for message in batch {
            summary.processed += 1;
            let id_experiment = message.experiment_id.clone();
            match self.apply(message) {
                Ok(()) => {
                    touched.insert(id_experiment);
                }
                Err(Unresolved { message, error }) => {
                    if !is_resolution_error(&error) {
                        return Err(error);
                    }
                    summary.dropped += 1;
                    log::error!(
                        "Invalid message: id_experiment={} id_run={} field_name={}: {}",
                        message.experiment_id,
                        message.run_id,
                        message.field_name,
                        error
                    );
                }
            }
        }

        for id_experiment in &touched {
            if let Some(experiment) = self.experiments.get(id_experiment) {
                self.store.persist(experiment, IfExists::Replace)?;
                summary.persisted += 1;
            }
        }

        if summary.processed > 0 {
            log::debug!(
                "Batch: {} messages, {} dropped, {} experiments persisted",
                summary.processed,
                summary.dropped,
                summary.persisted
            );
        }
        Ok(summary)
    }

    fn apply(&mut self, message: WireMessage) -> std::result::Result<(), Unresolved> {
        if !self.experiments.contains_key(&message.experiment_id) {
            match self.store.load(&message.experiment_id) {
                Ok(experiment) => {
                    self.experiments
                        .insert(message.experiment_id.clone(), experiment);
                }
                Err(error) => return Err(Unresolved { message, error }),
            }
        }

        let Some(experiment) = self.experiments.get_mut(&message.experiment_id) else {
            let error = Error::ExperimentNotFound(message.experiment_id.clone());
            return Err(Unresolved { message, error });
        };
        let sequence = match experiment
            .run_mut(&message.run_id)
            .and_then(|run| run.sequence_or_insert(&message.field_name))
        {
            Ok(sequence) => sequence,
            Err(error) => return Err(Unresolved { message, error }),
        };

        log::trace!(
            "Record idx={} -> {}/{}/{}",
            message.record.idx,
            message.experiment_id,
            message.run_id,
            message.field_name
        );
        sequence.receive_remote(message.record);
        Ok(())
    }
}

/// A message handed back together with the reason it was not applied
struct Unresolved {
    message: WireMessage,
    error: Error,
}

fn is_resolution_error(error: &Error) -> bool {
    matches!(
        error,
        Error::ExperimentNotFound(_) | Error::RunNotFound { .. } | Error::FieldTypeMismatch { .. }
    )
}

/// Snapshot of writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Messages taken off the queue and handled (applied or dropped)
    pub processed: u64,
    /// Messages dropped as unresolvable
    pub dropped: u64,
    /// Experiment writes issued to the store
    pub persisted: u64,
    /// Non-empty batches processed
    pub batches: u64,
}

#[derive(Debug, Default)]
struct WriterCounters {
    processed: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    batches: AtomicU64,
}

/// Observer handle on a running writer
///
/// Cheap to clone; stays valid after the writer stops.
#[derive(Debug, Clone, Default)]
pub struct WriterMonitor {
    counters: Arc<WriterCounters>,
    received: Signal,
    failed: Signal,
}

impl WriterMonitor {
    /// Set after every processed batch
    pub fn received(&self) -> &Signal {
        &self.received
    }

    /// Set when a store failure has ended the writer thread
    ///
    /// Nothing drains the queue afterwards; the error itself is returned by
    /// [`BatchWriter::stop`].
    pub fn failed(&self) -> &Signal {
        &self.failed
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_set()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
        }
    }

    fn record(&self, summary: &BatchSummary) {
        self.counters
            .processed
            .fetch_add(summary.processed, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(summary.dropped, Ordering::Relaxed);
        self.counters
            .persisted
            .fetch_add(summary.persisted, Ordering::Relaxed);
        if summary.processed > 0 {
            self.counters.batches.fetch_add(1, Ordering::Relaxed);
        }
        self.received.set();
    }
}

/// Background consumer of streamed messages
pub struct BatchWriter {
    state: WriterState,
    store: Option<Box<dyn Store>>,
    tx: Sender<WireMessage>,
    rx: Receiver<WireMessage>,
    persist_throttle: Duration,
    terminate: Signal,
    monitor: WriterMonitor,
    handle: Option<JoinHandle<Result<()>>>,
}

impl BatchWriter {
    /// Create a writer persisting through `store`
    pub fn new<S: Store + 'static>(store: S, persist_throttle: Duration) -> Self {
        let (tx, rx) = unbounded();
        let store: Box<dyn Store> = Box::new(store);
        Self {
            state: WriterState::Init,
            store: Some(store),
            tx,
            rx,
            persist_throttle,
            terminate: Signal::new(),
            monitor: WriterMonitor::default(),
            handle: None,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Producer side of the queue
    pub fn sender(&self) -> Sender<WireMessage> {
        self.tx.clone()
    }

    /// Queue one message; never blocks
    pub fn enqueue(&self, message: WireMessage) {
        // The writer owns the receiver, so the queue cannot be disconnected
        let _ = self.tx.send(message);
    }

    /// Messages waiting in the queue
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn monitor(&self) -> WriterMonitor {
        self.monitor.clone()
    }

    fn transition(&mut self, operation: &'static str, to: WriterState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (WriterState::Init, WriterState::Running) | (WriterState::Running, WriterState::Stopped)
        );
        if !allowed {
            return Err(Error::InvalidState {
                component: "writer",
                state: self.state.name(),
                operation,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Spawn the writer thread
    pub fn start(&mut self) -> Result<()> {
        self.transition("start", WriterState::Running)?;
        let Some(store) = self.store.take() else {
            return Err(Error::InvalidState {
                component: "writer",
                state: self.state.name(),
                operation: "start",
            });
        };

        let worker = WriterWorker {
            working_set: WorkingSet::new(store),
            rx: self.rx.clone(),
            persist_throttle: self.persist_throttle,
            terminate: self.terminate.clone(),
            monitor: self.monitor.clone(),
        };
        let handle = thread::Builder::new()
            .name("datastream-writer".into())
            .spawn(move || worker.run())?;
        self.handle = Some(handle);

        log::info!(
            "Batch writer started (persist every {:?})",
            self.persist_throttle
        );
        Ok(())
    }

    /// Signal the thread to finish and wait for it
    ///
    /// The thread processes its current batch one last time before exiting.
    /// Returns the first store error the thread hit, if any.
    pub fn stop(&mut self) -> Result<WriterStats> {
        self.transition("stop", WriterState::Stopped)?;
        self.terminate.set();

        let outcome = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::WorkerPanicked("datastream-writer"))?,
            None => Ok(()),
        };

        let stats = self.monitor.stats();
        let lost = self.rx.len();
        log::info!(
            "Batch writer stopped: {} processed, {} dropped, {} persisted, {} left in queue",
            stats.processed,
            stats.dropped,
            stats.persisted,
            lost
        );
        outcome.map(|()| stats)
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Running
            && let Err(e) = self.stop()
        {
            log::error!("Batch writer failed during drop: {}", e);
        }
    }
}

struct WriterWorker {
    working_set: WorkingSet,
    rx: Receiver<WireMessage>,
    persist_throttle: Duration,
    terminate: Signal,
    monitor: WriterMonitor,
}

impl WriterWorker {
    fn run(mut self) -> Result<()> {
        // Warm-up: let the first burst accumulate
        self.terminate.wait_timeout(self.persist_throttle);

        while !self.terminate.is_set() {
            let available = self.rx.len();
            if available > 0 {
                for _ in 0..available {
                    match self.rx.try_recv() {
                        Ok(message) => self.working_set.push(message),
                        Err(_) => break,
                    }
                }
                self.process()?;
            }
            self.terminate.wait_timeout(self.persist_throttle);
        }

        // Flush whatever was already dequeued
        self.process()?;
        Ok(())
    }

    fn process(&mut self) -> Result<()> {
        match self.working_set.process_batch() {
            Ok(summary) => {
                self.monitor.record(&summary);
                Ok(())
            }
            Err(e) => {
                log::error!("Batch writer persistence failed, writer exiting: {}", e);
                self.monitor.failed.set();
                Err(e)
            }
        }
    }
}
