//! JSON file storage implementation
//!
//! The whole state is one JSON object mapping URL keys to records. It is loaded
//! once at construction and overwritten wholesale on every save.

use crate::storage::traits::{StateStore, StorageError, StorageResult};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// JSON document storage backend
#[derive(Debug, Default)]
pub struct JsonStateStore {
    path: Option<PathBuf>,
    state: Map<String, Value>,
    exited: bool,
}

impl JsonStateStore {
    /// Opens the store backed by a state file
    ///
    /// A missing file starts an empty state. A file that cannot be read or
    /// parsed is logged and also starts an empty state.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match Self::load(&path) {
            Ok(Some(state)) => {
                tracing::debug!(
                    "Loaded {} state entries from {}",
                    state.len(),
                    path.display()
                );
                state
            }
            Ok(None) => {
                tracing::debug!("No state file at {}, starting empty", path.display());
                Map::new()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load state file {}: {}; starting empty",
                    path.display(),
                    e
                );
                Map::new()
            }
        };

        Self {
            path: Some(path),
            state,
            exited: false,
        }
    }

    /// Creates a store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Reads a state document
    ///
    /// Returns `Ok(None)` if the file does not exist, or does not hold a JSON object.
    pub fn load(path: &Path) -> StorageResult<Option<Map<String, Value>>> {
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(Some(map)),
            _ => {
                tracing::warn!("State file {} is not a JSON object", path.display());
                Ok(None)
            }
        }
    }

    /// Path of the backing state file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Moves the backing file, e.g. when the output directory changes
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    fn persist_if(&self, persist: bool) -> StorageResult<()> {
        if persist {
            self.save()?;
        }
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.state.insert(key.to_string(), value);
    }

    fn update(&mut self, key: &str, update: Value, persist: bool) -> StorageResult<()> {
        let merge = update.is_object() && self.state.get(key).map_or(false, Value::is_object);

        match self.state.get_mut(key) {
            Some(existing) if merge => merge_value(existing, update),
            _ => {
                self.state.insert(key.to_string(), update);
            }
        }
        self.persist_if(persist)
    }

    fn push(&mut self, key: &str, value: Value, persist: bool) -> StorageResult<()> {
        match self.state.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            None => {
                self.state.insert(key.to_string(), Value::Array(vec![value]));
            }
            Some(_) => {
                tracing::debug!("Ignoring push onto non-sequence state key {}", key);
            }
        }
        self.persist_if(persist)
    }

    fn delete(&mut self, key: &str, persist: bool) -> StorageResult<()> {
        self.state.remove(key);
        self.persist_if(persist)
    }

    fn entries(&self) -> &Map<String, Value> {
        &self.state
    }

    fn save(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&self.state)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        }

        // Write next to the target and rename over it, so a crash mid-write
        // leaves the previous document intact.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, content).map_err(|source| StorageError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::trace!("Saved {} state entries to {}", self.state.len(), path.display());
        Ok(())
    }

    fn shutdown(&mut self) -> StorageResult<bool> {
        if self.exited {
            return Ok(false);
        }
        self.exited = true;
        self.save()?;
        Ok(true)
    }
}

/// Recursively merges `update` into `target`
///
/// Objects merge key by key; every other value replaces what was there.
pub fn merge_value(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                let nested = value.is_object() && target.get(&key).map_or(false, Value::is_object);

                match target.get_mut(&key) {
                    Some(existing) if nested => merge_value(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, update) => *target = update,
    }
}
