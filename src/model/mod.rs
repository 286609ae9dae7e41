//! Minimal experiment/run object model.
//!
//! Only what the streaming pipeline needs: an experiment owns runs keyed by
//! id, and a run owns named fields that are either plain values or
//! [`Sequence`]s. Sequences are the only fields that can be streamed.

pub mod ids;

pub use ids::IdGenerator;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DatastreamConfig;
use crate::error::{Error, Result};
use crate::sequence::{Record, Sequence, StreamHook, Value};
use crate::streaming::StreamClient;

/// A named field of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Field {
    Value(Value),
    Sequence(Sequence),
}

impl Field {
    /// Sequence view of the field
    pub fn as_sequence_mut(&mut self) -> Option<&mut Sequence> {
        match self {
            Field::Sequence(seq) => Some(seq),
            Field::Value(_) => None,
        }
    }
}

/// One independent run of an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id_experiment: String,
    pub id_run: String,
    pub fields: BTreeMap<String, Field>,
}

impl Run {
    /// Create a run with no fields
    pub fn new(id_experiment: impl Into<String>, id_run: impl Into<String>) -> Self {
        Self {
            id_experiment: id_experiment.into(),
            id_run: id_run.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a plain value field
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), Field::Value(value.into()));
    }

    /// Create (or reset) an empty sequence field
    pub fn init_sequence(&mut self, name: impl Into<String>) {
        self.fields
            .insert(name.into(), Field::Sequence(Sequence::new()));
    }

    /// Sequence field by name, `None` if absent or not a sequence
    pub fn sequence_mut(&mut self, name: &str) -> Option<&mut Sequence> {
        self.fields.get_mut(name).and_then(Field::as_sequence_mut)
    }

    /// Sequence field by name, creating an empty one if absent
    ///
    /// Fails with [`Error::FieldTypeMismatch`] if the field holds a value.
    pub fn sequence_or_insert(&mut self, name: &str) -> Result<&mut Sequence> {
        let field = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| Field::Sequence(Sequence::new()));
        match field {
            Field::Sequence(seq) => Ok(seq),
            Field::Value(_) => Err(Error::FieldTypeMismatch {
                id_run: self.id_run.clone(),
                field_name: name.to_string(),
            }),
        }
    }

    /// Link every sequence field to `client`
    ///
    /// Sequences must exist before attaching; fields added later are not
    /// streamed.
    pub fn attach_stream(&mut self, client: &Arc<StreamClient>) {
        for (name, field) in self.fields.iter_mut() {
            if let Field::Sequence(seq) = field {
                log::debug!("Linking field '{}' to datastream", name);
                let client = Arc::clone(client);
                let hook: StreamHook = Arc::new(move |field_name: &str, record: &Record| {
                    client.send_sequence_record(field_name, record)
                });
                seq.attach_stream(name.clone(), hook);
            }
        }
    }

    /// Unlink every sequence field
    pub fn detach_stream(&mut self) {
        for field in self.fields.values_mut() {
            if let Field::Sequence(seq) = field {
                seq.detach_stream();
            }
        }
    }

    /// Run `f` with all sequence fields streaming to the configured server
    ///
    /// The client is bound to this run's identifiers. Sequences are always
    /// detached and the client closed afterwards, even if `f` returns an error.
    pub fn stream_scope<T, F>(&mut self, config: &DatastreamConfig, f: F) -> Result<T>
    where
        F: FnOnce(&mut Run) -> Result<T>,
    {
        let client = Arc::new(StreamClient::new(
            config,
            self.id_experiment.clone(),
            self.id_run.clone(),
        )?);
        self.attach_stream(&client);

        let result = f(self);

        self.detach_stream();
        match Arc::try_unwrap(client) {
            Ok(client) => {
                client.close();
            }
            Err(client) => {
                log::warn!("Datastream client still shared at scope exit");
                client.report();
            }
        }
        result
    }
}

/// A tracked experiment composed of independent runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id_experiment: String,
    pub name: String,
    pub runs: BTreeMap<String, Run>,
}

impl Experiment {
    /// Create an empty experiment with a fresh identifier
    pub fn new(name: impl Into<String>, ids: &mut IdGenerator) -> Self {
        Self {
            id_experiment: ids.next_id(),
            name: name.into(),
            runs: BTreeMap::new(),
        }
    }

    /// Add a run with a fresh identifier
    pub fn add_run(&mut self, ids: &mut IdGenerator) -> &mut Run {
        let id_run = ids.next_id();
        self.runs
            .entry(id_run.clone())
            .or_insert_with(|| Run::new(self.id_experiment.clone(), id_run))
    }

    /// Run by id
    pub fn run(&self, id_run: &str) -> Option<&Run> {
        self.runs.get(id_run)
    }

    /// Run by id, failing with [`Error::RunNotFound`]
    pub fn run_mut(&mut self, id_run: &str) -> Result<&mut Run> {
        let id_experiment = &self.id_experiment;
        self.runs.get_mut(id_run).ok_or_else(|| Error::RunNotFound {
            id_experiment: id_experiment.clone(),
            id_run: id_run.to_string(),
        })
    }

    /// First run in id order
    pub fn first_run_mut(&mut self) -> Option<&mut Run> {
        self.runs.values_mut().next()
    }
}
