//! Directory-backed experiment store.
//!
//! # File Format
//!
//! Each experiment is stored as `{id_experiment}.exp`:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬──────────────────────────┐
//! │ Magic (4 bytes)  │ Version (u16 LE) │ Postcard Experiment      │
//! │ "TSEX"           │                  │ (variable)               │
//! └──────────────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a half-written experiment.

use std::fs;
use std::path::{Path, PathBuf};

use super::{IfExists, Store};
use crate::error::{Error, Result};
use crate::model::Experiment;

/// Magic bytes at start of an experiment file
pub const EXPERIMENT_MAGIC: [u8; 4] = *b"TSEX";

/// Current experiment file format version
pub const EXPERIMENT_VERSION: u16 = 1;

const HEADER_SIZE: usize = 6;

/// Store keeping one file per experiment
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `base_path`, creating the directory if needed
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }
        log::debug!("File store at {}", base_path.display());
        Ok(Self { base_path })
    }

    /// Directory holding the experiment files
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn experiment_path(&self, id_experiment: &str) -> Result<PathBuf> {
        // Ids become file names; refuse anything that could escape the directory
        if id_experiment.is_empty()
            || id_experiment.contains(['/', '\\'])
            || id_experiment.starts_with('.')
        {
            return Err(Error::Store(format!(
                "Invalid experiment id '{}'",
                id_experiment
            )));
        }
        Ok(self.base_path.join(format!("{}.exp", id_experiment)))
    }

    /// Ids of all stored experiments
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = fs::read_dir(&self.base_path)?
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "exp") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn decode(bytes: &[u8]) -> Result<Experiment> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != EXPERIMENT_MAGIC {
        return Err(Error::Store("Not an experiment file".to_string()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != EXPERIMENT_VERSION {
        return Err(Error::Store(format!(
            "Unsupported experiment file version {}",
            version
        )));
    }
    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| Error::Store(e.to_string()))
}

fn encode(experiment: &Experiment) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(experiment).map_err(|e| Error::Store(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&EXPERIMENT_MAGIC);
    bytes.extend_from_slice(&EXPERIMENT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

impl Store for FileStore {
    fn load(&self, id_experiment: &str) -> Result<Experiment> {
        let path = self.experiment_path(id_experiment)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ExperimentNotFound(id_experiment.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        decode(&bytes)
    }

    fn persist(&self, experiment: &Experiment, if_exists: IfExists) -> Result<()> {
        let path = self.experiment_path(&experiment.id_experiment)?;
        if if_exists == IfExists::Fail && path.exists() {
            return Err(Error::ExperimentExists(experiment.id_experiment.clone()));
        }

        let bytes = encode(experiment)?;
        let tmp_path = path.with_extension("exp.tmp");
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &path)?;

        log::trace!(
            "Persisted experiment {} ({} bytes)",
            experiment.id_experiment,
            bytes.len()
        );
        Ok(())
    }

    fn contains(&self, id_experiment: &str) -> Result<bool> {
        Ok(self.experiment_path(id_experiment)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdGenerator;
    use tempfile::TempDir;

    fn experiment_with_sequence() -> Experiment {
        let mut ids = IdGenerator::sequential(0, 1);
        let mut experiment = Experiment::new("test", &mut ids);
        let run = experiment.add_run(&mut ids);
        run.init_sequence("metrics");
        let seq = run.sequence_mut("metrics").unwrap();
        seq.append([("loss", 0.5)]).unwrap();
        seq.append([("loss", 0.25)]).unwrap();
        experiment
    }

    #[test]
    fn test_round_trip_keeps_sequence_rows() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let experiment = experiment_with_sequence();

        store.persist(&experiment, IfExists::Fail).unwrap();
        let mut loaded = store.load(&experiment.id_experiment).unwrap();

        let seq = loaded.first_run_mut().unwrap().sequence_mut("metrics").unwrap();
        assert_eq!(seq.size(), 2);
        assert_eq!(seq.next_idx(), 2);
        assert_eq!(store.list().unwrap(), vec![experiment.id_experiment.clone()]);
    }

    #[test]
    fn test_replace_policy() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();
        let mut experiment = experiment_with_sequence();
        store.persist(&experiment, IfExists::Fail).unwrap();

        experiment.name = "renamed".to_string();
        assert!(matches!(
            store.persist(&experiment, IfExists::Fail).unwrap_err(),
            Error::ExperimentExists(_)
        ));
        store.persist(&experiment, IfExists::Replace).unwrap();
        assert_eq!(store.load(&experiment.id_experiment).unwrap().name, "renamed");
    }

    #[test]
    fn test_missing_and_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load("absent").unwrap_err(),
            Error::ExperimentNotFound(_)
        ));
        assert!(matches!(
            store.load("../escape").unwrap_err(),
            Error::Store(_)
        ));
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("junk.exp"), b"garbage").unwrap();
        assert!(matches!(store.load("junk").unwrap_err(), Error::Store(_)));
    }
}
