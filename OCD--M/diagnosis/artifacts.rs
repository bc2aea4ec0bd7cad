use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::classical_ml::{RandomForest, StandardScaler};

/// Well-known name of the persisted scaler.
pub const SCALER_ARTIFACT: &str = "scaler.json";
/// Well-known name of the persisted classifier.
pub const MODEL_ARTIFACT: &str = "ocd_model.json";

/// Storage for the fitted (scaler, classifier) pair. Saves overwrite.
pub trait ArtifactStore: Send + Sync {
    /// Replaces the stored scaler.
    fn save_scaler(&self, scaler: &StandardScaler) -> Result<(), ArtifactError>;
    /// Replaces the stored classifier.
    fn save_model(&self, model: &RandomForest) -> Result<(), ArtifactError>;
    /// Reads the stored scaler.
    fn load_scaler(&self) -> Result<StandardScaler, ArtifactError>;
    /// Reads the stored classifier.
    fn load_model(&self) -> Result<RandomForest, ArtifactError>;
}

/// JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    /// Store rooted at `dir`; the directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of an artifact.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_of(name);
        // readers only ever see a complete file; the rename replaces it in one step
        let staging = self.path_of(&format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
        let result = write_staged(&staging, value)
            .and_then(|()| fs::rename(&staging, &target).map_err(ArtifactError::from));
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let path = self.path_of(name);
        let contents = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Directory holding the artifacts.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_staged<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

impl ArtifactStore for FileArtifactStore {
    fn save_scaler(&self, scaler: &StandardScaler) -> Result<(), ArtifactError> {
        self.write(SCALER_ARTIFACT, scaler)
    }

    fn save_model(&self, model: &RandomForest) -> Result<(), ArtifactError> {
        self.write(MODEL_ARTIFACT, model)
    }

    fn load_scaler(&self) -> Result<StandardScaler, ArtifactError> {
        self.read(SCALER_ARTIFACT)
    }

    fn load_model(&self) -> Result<RandomForest, ArtifactError> {
        self.read(MODEL_ARTIFACT)
    }
}

/// Process-local store, cloned handles share contents.
#[derive(Debug, Default, Clone)]
pub struct MemoryArtifactStore {
    scaler: Arc<RwLock<Option<StandardScaler>>>,
    model: Arc<RwLock<Option<RandomForest>>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn save_scaler(&self, scaler: &StandardScaler) -> Result<(), ArtifactError> {
        *self.scaler.write() = Some(scaler.clone());
        Ok(())
    }

    fn save_model(&self, model: &RandomForest) -> Result<(), ArtifactError> {
        *self.model.write() = Some(model.clone());
        Ok(())
    }

    fn load_scaler(&self) -> Result<StandardScaler, ArtifactError> {
        self.scaler
            .read()
            .clone()
            .ok_or_else(|| ArtifactError::NotFound {
                name: SCALER_ARTIFACT.into(),
            })
    }

    fn load_model(&self) -> Result<RandomForest, ArtifactError> {
        self.model
            .read()
            .clone()
            .ok_or_else(|| ArtifactError::NotFound {
                name: MODEL_ARTIFACT.into(),
            })
    }
}

/// Artifact persistence failures.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Nothing has been saved under this name yet.
    #[error("artifact `{name}` not found")]
    NotFound {
        /// Artifact name.
        name: String,
    },
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classical_ml::ForestParams;
    use ndarray::array;
    use tempfile::tempdir;

    fn fitted() -> (StandardScaler, RandomForest) {
        let x = array![[1.0, 2.0], [2.0, 1.0], [8.0, 9.0], [9.0, 8.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        let scaler = StandardScaler::fit(x.view(), &names).unwrap();
        let params = ForestParams {
            n_trees: 5,
            ..ForestParams::default()
        };
        let model = RandomForest::fit(x.view(), &[0, 0, 1, 1], params).unwrap();
        (scaler, model)
    }

    #[test]
    fn file_store_round_trips_and_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path().join("artifacts"));
        let (scaler, model) = fitted();
        store.save_scaler(&scaler).unwrap();
        store.save_model(&model).unwrap();
        assert_eq!(store.load_scaler().unwrap(), scaler);
        assert_eq!(store.load_model().unwrap(), model);

        let x = array![[0.0, 0.0], [4.0, 4.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        let replacement = StandardScaler::fit(x.view(), &names).unwrap();
        store.save_scaler(&replacement).unwrap();
        assert_eq!(store.load_scaler().unwrap(), replacement);

        let leftovers = fs::read_dir(store.dir())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_artifacts_report_not_found() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        assert!(matches!(
            store.load_model(),
            Err(ArtifactError::NotFound { ref name }) if name == MODEL_ARTIFACT
        ));

        let memory = MemoryArtifactStore::new();
        assert!(matches!(
            memory.load_scaler(),
            Err(ArtifactError::NotFound { ref name }) if name == SCALER_ARTIFACT
        ));
    }

    #[test]
    fn memory_store_handles_share_state() {
        let store = MemoryArtifactStore::new();
        let handle = store.clone();
        let (scaler, model) = fitted();
        store.save_scaler(&scaler).unwrap();
        store.save_model(&model).unwrap();
        assert_eq!(handle.load_scaler().unwrap(), scaler);
        assert_eq!(handle.load_model().unwrap().n_trees(), 5);
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SCALER_ARTIFACT), b"{not json").unwrap();
        let store = FileArtifactStore::new(dir.path());
        assert!(matches!(store.load_scaler(), Err(ArtifactError::Json(_))));
    }

    #[test]
    fn failed_rename_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        // a non-empty directory squats on the target name
        fs::create_dir_all(store.path_of(SCALER_ARTIFACT).join("occupied")).unwrap();
        let (scaler, _) = fitted();
        assert!(matches!(
            store.save_scaler(&scaler),
            Err(ArtifactError::Io(_))
        ));
        let staged = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(staged, 0);
    }
}
