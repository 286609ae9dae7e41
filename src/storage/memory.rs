//! In-process experiment store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{IfExists, Store};
use crate::error::{Error, Result};
use crate::model::Experiment;

/// Shared in-memory store
///
/// Experiments are kept in their encoded form, so a load always returns an
/// independent copy with detached sequences. Clones share the same contents:
/// a test (or an embedding application) can keep a handle while the batch
/// writer owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    experiments: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored experiments
    pub fn len(&self) -> usize {
        self.experiments.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.experiments.lock().is_empty()
    }
}

impl Store for MemoryStore {
    fn load(&self, id_experiment: &str) -> Result<Experiment> {
        let experiments = self.experiments.lock();
        let bytes = experiments
            .get(id_experiment)
            .ok_or_else(|| Error::ExperimentNotFound(id_experiment.to_string()))?;
        postcard::from_bytes(bytes).map_err(|e| Error::Store(e.to_string()))
    }

    fn persist(&self, experiment: &Experiment, if_exists: IfExists) -> Result<()> {
        let bytes = postcard::to_allocvec(experiment).map_err(|e| Error::Store(e.to_string()))?;
        let mut experiments = self.experiments.lock();
        if if_exists == IfExists::Fail && experiments.contains_key(&experiment.id_experiment) {
            return Err(Error::ExperimentExists(experiment.id_experiment.clone()));
        }
        experiments.insert(experiment.id_experiment.clone(), bytes);
        Ok(())
    }

    fn contains(&self, id_experiment: &str) -> Result<bool> {
        Ok(self.experiments.lock().contains_key(id_experiment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdGenerator;

    #[test]
    fn test_persist_and_load() {
        let store = MemoryStore::new();
        let mut ids = IdGenerator::sequential(0, 1);
        let experiment = Experiment::new("test", &mut ids);

        store.persist(&experiment, IfExists::Fail).unwrap();
        let loaded = store.load(&experiment.id_experiment).unwrap();
        assert_eq!(loaded.name, "test");
        assert!(store.contains(&experiment.id_experiment).unwrap());
    }

    #[test]
    fn test_fail_policy_refuses_overwrite() {
        let store = MemoryStore::new();
        let mut ids = IdGenerator::sequential(0, 1);
        let mut experiment = Experiment::new("test", &mut ids);
        store.persist(&experiment, IfExists::Fail).unwrap();

        experiment.name = "renamed".to_string();
        let err = store.persist(&experiment, IfExists::Fail).unwrap_err();
        assert!(matches!(err, Error::ExperimentExists(_)));

        store.persist(&experiment, IfExists::Replace).unwrap();
        assert_eq!(store.load(&experiment.id_experiment).unwrap().name, "renamed");
    }

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let handle = store.clone();
        let mut ids = IdGenerator::sequential(0, 1);
        store
            .persist(&Experiment::new("test", &mut ids), IfExists::Fail)
            .unwrap();
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn test_missing_experiment() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load("nope").unwrap_err(),
            Error::ExperimentNotFound(_)
        ));
    }
}
