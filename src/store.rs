use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::enroll::EnrolledModel;
use crate::error::StoreError;
use crate::features::{FeaturePolicy, FEATURE_VERSION, RICH_DIM};

/// Bump when the serialized record layout changes.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Versioned envelope the engine persists; the storage backend only ever
/// sees opaque bytes.
#[derive(Serialize, Deserialize)]
struct ModelRecord {
    version: u32,
    feature_version: u32,
    policy: FeaturePolicy,
    model: EnrolledModel,
}

/// Opaque, device-bound durable key-value storage. Injected so tests can
/// substitute an in-memory double.
pub trait ModelStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    /// `Ok(None)` is the valid "no enrollment yet" state, not an error.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn revoke(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Serialize and persist a model under `key`, replacing any previous
/// enrollment wholesale.
pub fn save_model(
    store: &mut dyn ModelStore,
    key: &str,
    model: &EnrolledModel,
) -> Result<(), StoreError> {
    let record = ModelRecord {
        version: MODEL_FORMAT_VERSION,
        feature_version: FEATURE_VERSION,
        policy: model.policy(),
        model: model.clone(),
    };
    let bytes =
        serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    store.save(key, &bytes)?;
    info!("saved {:?} model under '{key}'", record.policy);
    Ok(())
}

/// Load and validate a persisted model. Missing keys are `Ok(None)`;
/// unparseable or incompatible records are corrupt.
pub fn load_model(
    store: &dyn ModelStore,
    key: &str,
) -> Result<Option<EnrolledModel>, StoreError> {
    let Some(bytes) = store.load(key)? else {
        debug!("no enrollment under '{key}'");
        return Ok(None);
    };
    let record: ModelRecord = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if record.version != MODEL_FORMAT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported record version {}",
            record.version
        )));
    }
    if record.feature_version != FEATURE_VERSION {
        return Err(StoreError::Corrupt(format!(
            "feature layout version {} does not match {}",
            record.feature_version, FEATURE_VERSION
        )));
    }
    if let EnrolledModel::Rich(rich) = &record.model {
        if rich.dims != RICH_DIM {
            return Err(StoreError::Corrupt(format!(
                "rich model has {} dims, expected {RICH_DIM}",
                rich.dims
            )));
        }
    }
    Ok(Some(record.model))
}

/// Hash-map backed store for tests and in-process callers.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModelStore for MemoryStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store with atomic replace: records are written to a
/// temporary file and renamed into place.
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.model.json"))
    }
}

impl ModelStore for FileStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(key);
        let staging = self.directory.join(format!("{key}.model.tmp"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enroll::RichModel;
    use crate::features::LightweightFeatures;
    use crate::gmm::Gmm;

    fn sample_model() -> EnrolledModel {
        EnrolledModel::Rich(RichModel {
            dims: RICH_DIM,
            mean: (0..RICH_DIM).map(|d| d as f64 * 0.5).collect(),
            std: vec![1.25; RICH_DIM],
            tolerance: vec![3.125; RICH_DIM],
            gmm: Gmm {
                weights: vec![0.6, 0.4],
                means: vec![vec![0.0; RICH_DIM], vec![1.0; RICH_DIM]],
                variances: vec![vec![0.5; RICH_DIM], vec![0.75; RICH_DIM]],
            },
        })
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut store = MemoryStore::new();
        let model = sample_model();
        save_model(&mut store, "wearer", &model).unwrap();
        let loaded = load_model(&store, "wearer").unwrap().unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn lightweight_round_trip() {
        let mut store = MemoryStore::new();
        let model = EnrolledModel::Lightweight {
            template: LightweightFeatures {
                mean: 71.25,
                stdev: 2.5,
                slope_energy: 4.75,
                sample_count: 12,
                histogram: [0.25, 0.25, 0.125, 0.125, 0.125, 0.125],
            },
        };
        save_model(&mut store, "wearer", &model).unwrap();
        assert_eq!(load_model(&store, "wearer").unwrap().unwrap(), model);
    }

    #[test]
    fn missing_key_is_not_an_error() {
        let store = MemoryStore::new();
        assert!(load_model(&store, "nobody").unwrap().is_none());
    }

    #[test]
    fn garbage_bytes_report_corrupt() {
        let mut store = MemoryStore::new();
        store.save("wearer", b"not json at all").unwrap();
        assert!(matches!(
            load_model(&store, "wearer"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn version_mismatch_reports_corrupt() {
        let mut store = MemoryStore::new();
        save_model(&mut store, "wearer", &sample_model()).unwrap();
        let mut bytes = store.load("wearer").unwrap().unwrap();
        let text = String::from_utf8(bytes.clone())
            .unwrap()
            .replacen("\"version\":1", "\"version\":99", 1);
        bytes = text.into_bytes();
        store.save("wearer", &bytes).unwrap();
        assert!(matches!(
            load_model(&store, "wearer"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn revoke_deletes_the_enrollment() {
        let mut store = MemoryStore::new();
        save_model(&mut store, "wearer", &sample_model()).unwrap();
        store.revoke("wearer").unwrap();
        assert!(load_model(&store, "wearer").unwrap().is_none());
    }

    #[test]
    fn re_enrollment_replaces_wholesale() {
        let mut store = MemoryStore::new();
        save_model(&mut store, "wearer", &sample_model()).unwrap();
        let replacement = EnrolledModel::Lightweight {
            template: LightweightFeatures {
                mean: 65.0,
                stdev: 1.0,
                slope_energy: 2.0,
                sample_count: 9,
                histogram: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            },
        };
        save_model(&mut store, "wearer", &replacement).unwrap();
        assert_eq!(load_model(&store, "wearer").unwrap().unwrap(), replacement);
    }

    #[test]
    fn file_store_round_trip_and_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        let model = sample_model();
        save_model(&mut store, "wearer", &model).unwrap();
        assert_eq!(load_model(&store, "wearer").unwrap().unwrap(), model);
        // No stray staging file left behind after the rename.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
        store.revoke("wearer").unwrap();
        assert!(load_model(&store, "wearer").unwrap().is_none());
        store.revoke("wearer").unwrap();
    }
}
