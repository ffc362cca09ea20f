//! Persistence backends for the configuration document.
//!
//! # Design
//! - `ConfigPersistence` is synchronous; callers already hold the service lock.
//! - The file store writes through a temp file and renames it into place.
//! - A missing file loads as defaults; a foreign version is rejected.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::defaults::CONFIG_VERSION;
use crate::error::{ConfigError, ConfigResult};
use crate::model::ConfigDocument;

/// Storage for the persisted document.
pub trait ConfigPersistence: Send + Sync {
    /// Load the document, returning defaults when nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored data cannot be read, decoded, or has an
    /// unsupported version.
    fn load(&self) -> ConfigResult<ConfigDocument>;

    /// Persist the document.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or writing fails.
    fn save(&self, document: &ConfigDocument) -> ConfigResult<()>;
}

fn check_version(document: ConfigDocument) -> ConfigResult<ConfigDocument> {
    if document.version == CONFIG_VERSION {
        Ok(document)
    } else {
        Err(ConfigError::UnsupportedVersion {
            found: document.version,
            expected: CONFIG_VERSION,
        })
    }
}

/// JSON document stored at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigPersistence for JsonFileStore {
    fn load(&self) -> ConfigResult<ConfigDocument> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "config file missing; using defaults");
                return Ok(ConfigDocument::default());
            }
            Err(err) => return Err(ConfigError::io("store.read", &self.path, err)),
        };
        let document = serde_json::from_slice(&bytes)
            .map_err(|err| ConfigError::serialization("store.decode", err))?;
        check_version(document)
    }

    fn save(&self, document: &ConfigDocument) -> ConfigResult<()> {
        let directory = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(directory)
            .map_err(|err| ConfigError::io("store.create_dir", directory, err))?;

        let encoded = serde_json::to_vec_pretty(document)
            .map_err(|err| ConfigError::serialization("store.encode", err))?;
        let mut temp = NamedTempFile::new_in(directory)
            .map_err(|err| ConfigError::io("store.temp_file", directory, err))?;
        temp.write_all(&encoded)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|err| ConfigError::io("store.write", temp.path(), err))?;
        temp.persist(&self.path)
            .map_err(|err| ConfigError::io("store.rename", &self.path, err.error))?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

/// In-memory store for tests and embedders without a config directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<ConfigDocument>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Empty store; loads yield defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `document`.
    #[must_use]
    pub fn with_document(document: ConfigDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved (or seeded) document.
    #[must_use]
    pub fn snapshot(&self) -> Option<ConfigDocument> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ConfigPersistence for MemoryStore {
    fn load(&self) -> ConfigResult<ConfigDocument> {
        self.snapshot()
            .map_or_else(|| Ok(ConfigDocument::default()), check_version)
    }

    fn save(&self, document: &ConfigDocument) -> ConfigResult<()> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
