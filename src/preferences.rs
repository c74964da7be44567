//! Durable role-to-device preferences

use crate::errors::CameraError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// String key-value store that outlives a session
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CameraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CameraError>;
    fn remove(&self, key: &str) -> Result<(), CameraError>;
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, CameraError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CameraError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CameraError> {
        self.values().remove(key);
        Ok(())
    }
}

/// TOML-backed store; every change is written through to disk
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    /// Open the store at `path`. A missing file starts empty; a corrupt one is
    /// an error rather than silently discarded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                CameraError::Storage(format!("Failed to read preferences {:?}: {}", path, e))
            })?;
            toml::from_str::<BTreeMap<String, String>>(&contents).map_err(|e| {
                CameraError::Storage(format!("Failed to parse preferences {:?}: {}", path, e))
            })?
        } else {
            BTreeMap::new()
        };

        log::debug!("Loaded {} camera preferences from {:?}", values.len(), path);
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), CameraError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::Storage(format!("Failed to create preference directory: {}", e))
            })?;
        }

        let contents = toml::to_string(values)
            .map_err(|e| CameraError::Storage(format!("Failed to serialize preferences: {}", e)))?;
        fs::write(&self.path, contents).map_err(|e| {
            CameraError::Storage(format!("Failed to write preferences {:?}: {}", self.path, e))
        })
    }

    fn update<F: FnOnce(&mut BTreeMap<String, String>)>(&self, f: F) -> Result<(), CameraError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut values);
        self.persist(&values)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, CameraError> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CameraError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CameraError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}
