//! Snapshot persistence with file locking.
//!
//! The whole working set (cohorts plus patient void state) lives in one
//! JSON file. Reads take a shared lock; writes go to a temp file that is
//! renamed over the original. `update` additionally holds an exclusive
//! lock on a sidecar `.lock` file for the full load-modify-save cycle, so
//! concurrent processes cannot lose each other's changes.

use crate::patient::PatientDirectory;
use crate::store::MemoryStore;
use crate::{Error, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Everything persisted between runs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub cohorts: MemoryStore,
    #[serde(default)]
    pub patients: PatientDirectory,
}

impl Snapshot {
    /// Load a snapshot with shared locking
    ///
    /// Returns an empty snapshot if the file doesn't exist. Unlike a missing
    /// file, an unreadable or corrupt one is an error: cohort history is
    /// never silently replaced by an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store file at {:?}, starting empty", path);
            return Ok(Self {
                cohorts: MemoryStore::new(),
                patients: PatientDirectory::default(),
            });
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let snapshot: Snapshot = serde_json::from_str(&contents)
            .map_err(|e| Error::Store(format!("failed to parse {:?}: {}", path, e)))?;

        tracing::debug!(
            "Loaded {} cohort(s) and {} patient record(s) from {:?}",
            snapshot.cohorts.len(),
            snapshot.patients.len(),
            path
        );
        Ok(snapshot)
    }

    /// Save the snapshot atomically
    ///
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = parent_dir(path)?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store to {:?}", path);
        Ok(())
    }

    /// Load, modify and save under an exclusive lock
    ///
    /// Nothing is written if `f` fails.
    pub fn update<F, T>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>,
    {
        let parent = parent_dir(path)?;
        std::fs::create_dir_all(parent)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(Self::lock_path(path))?;
        lock.lock_exclusive()?;

        let result = Self::load(path).and_then(|mut snapshot| {
            let value = f(&mut snapshot)?;
            snapshot.save(path)?;
            Ok(value)
        });

        lock.unlock()?;
        result
    }

    /// Sidecar file used to serialize `update` calls
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        path.with_file_name(name)
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(Path::new(".")),
        Some(parent) => Ok(parent),
        None => Err(Error::Store(format!("store path {:?} has no parent", path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::Cohort;
    use crate::store::CohortStore;
    use crate::types::{CohortId, PatientRef, UserRef};
    use crate::patient::PatientLookup;
    use chrono::Utc;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        let mut snapshot = Snapshot::default();
        snapshot
            .cohorts
            .save(Cohort::with_patients("Example Cohort", "", [PatientRef(2)]))
            .unwrap();
        snapshot
            .patients
            .void_patient(PatientRef(9), &UserRef::new("admin"), "duplicate", Utc::now())
            .unwrap();
        snapshot.save(&path).unwrap();

        let loaded = Snapshot::load(&path).unwrap();
        let cohort = loaded.cohorts.get(CohortId(1)).unwrap().unwrap();
        assert_eq!(cohort.name, "Example Cohort");
        assert!(cohort.contains(PatientRef(2)));
        assert!(loaded.patients.is_voided(PatientRef(9)));
        assert_eq!(
            loaded.cohorts.cohort_ids_referencing(PatientRef(2)).unwrap(),
            vec![CohortId(1)]
        );
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::load(&temp_dir.path().join("missing.json")).unwrap();

        assert!(snapshot.cohorts.is_empty());
        assert!(snapshot.patients.is_empty());
    }

    #[test]
    fn test_corrupted_store_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        assert!(matches!(Snapshot::load(&path), Err(Error::Store(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ invalid json }");
    }

    #[test]
    fn test_update_persists_changes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        let id = Snapshot::update(&path, |snapshot| {
            let cohort = snapshot.cohorts.save(Cohort::new("Example Cohort", ""))?;
            Ok(cohort.id())
        })
        .unwrap();

        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(id, Some(CohortId(1)));
        assert_eq!(loaded.cohorts.len(), 1);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        let result: Result<()> = Snapshot::update(&path, |snapshot| {
            snapshot.cohorts.save(Cohort::new("Example Cohort", ""))?;
            Err(Error::InvalidArgument("rejected".into()))
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        Snapshot::default().save(&path).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "store.json")
            .collect();
        assert!(extras.is_empty(), "Expected only store.json, found extras: {:?}", extras);
    }

    #[test]
    fn test_lock_path_is_sidecar() {
        let path = Path::new("/tmp/cohort/store.json");
        assert_eq!(Snapshot::lock_path(path), PathBuf::from("/tmp/cohort/store.json.lock"));
    }
}
