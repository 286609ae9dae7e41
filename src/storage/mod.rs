//! Persistence boundary for experiments.
//!
//! The streaming pipeline only needs two operations from storage: load an
//! experiment by id, and persist an experiment with an overwrite policy.
//! [`MemoryStore`] is a shared in-process store; [`FileStore`] keeps one
//! postcard-encoded file per experiment under a directory.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Experiment;

/// Behaviour when persisting an experiment that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Refuse with [`Error::ExperimentExists`](crate::Error::ExperimentExists)
    #[default]
    Fail,
    /// Overwrite the stored copy
    Replace,
}

/// Experiment storage
///
/// Implementations must be usable from the batch writer thread, which owns
/// its store exclusively.
pub trait Store: Send {
    /// Load an experiment, failing with
    /// [`Error::ExperimentNotFound`](crate::Error::ExperimentNotFound)
    fn load(&self, id_experiment: &str) -> Result<Experiment>;

    /// Persist an experiment; pending sequence records are included as-is
    fn persist(&self, experiment: &Experiment, if_exists: IfExists) -> Result<()>;

    /// Check if an experiment is stored
    fn contains(&self, id_experiment: &str) -> Result<bool>;
}

impl<S: Store + Sync + ?Sized> Store for std::sync::Arc<S> {
    fn load(&self, id_experiment: &str) -> Result<Experiment> {
        (**self).load(id_experiment)
    }

    fn persist(&self, experiment: &Experiment, if_exists: IfExists) -> Result<()> {
        (**self).persist(experiment, if_exists)
    }

    fn contains(&self, id_experiment: &str) -> Result<bool> {
        (**self).contains(id_experiment)
    }
}
