//! JSON-file-backed persistent store.

use crate::data::Data;
use doorbell_core::{config::StoreConfig, error::DoorbellError, shellexpand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Persistent store for the [`Data`] aggregate.
///
/// Every file access is serialized through one lock. Cloning is cheap and
/// clones share the lock.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    /// Open the store at the configured path, creating it if missing and
    /// recreating it if corrupt.
    pub async fn new(config: &StoreConfig) -> Result<Self, DoorbellError> {
        let store = Self::open(shellexpand(&config.path));
        store.create().await?;
        if store.check_for_corruption().await {
            warn!(
                "Store at {} was unreadable and has been reset",
                store.path().display()
            );
        }
        info!("Store initialized at {}", store.path().display());
        Ok(store)
    }

    /// Handle to the file at `path`. Does not touch the filesystem.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Write a default `Data` if no file exists. Never overwrites.
    pub async fn create(&self) -> Result<(), DoorbellError> {
        let _guard = self.inner.lock.lock().await;
        if tokio::fs::try_exists(self.path()).await? {
            return Ok(());
        }
        self.write_unlocked(&Data::default()).await
    }

    /// Fresh copy of the persisted aggregate.
    pub async fn read(&self) -> Result<Data, DoorbellError> {
        let _guard = self.inner.lock.lock().await;
        self.read_unlocked().await
    }

    /// Replace the persisted aggregate.
    pub async fn write(&self, data: &Data) -> Result<(), DoorbellError> {
        let _guard = self.inner.lock.lock().await;
        self.write_unlocked(data).await
    }

    /// Read, apply `f`, and write back while holding the lock once.
    pub async fn update<F, T>(&self, f: F) -> Result<T, DoorbellError>
    where
        F: FnOnce(&mut Data) -> T,
    {
        let _guard = self.inner.lock.lock().await;
        let mut data = self.read_unlocked().await?;
        let out = f(&mut data);
        self.write_unlocked(&data).await?;
        Ok(out)
    }

    /// Remove the file. A missing file is not an error.
    pub async fn delete(&self) -> Result<(), DoorbellError> {
        let _guard = self.inner.lock.lock().await;
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("failed to delete", self.path(), e)),
        }
    }

    /// Raw file contents, for export.
    pub async fn snapshot_bytes(&self) -> Result<Vec<u8>, DoorbellError> {
        let _guard = self.inner.lock.lock().await;
        tokio::fs::read(self.path())
            .await
            .map_err(|e| storage_err("failed to read", self.path(), e))
    }

    /// Validate the file and reset it to defaults if it is missing,
    /// unreadable, or shaped differently from the current schema.
    ///
    /// Returns `true` when the file was recreated.
    pub async fn check_for_corruption(&self) -> bool {
        let _guard = self.inner.lock.lock().await;
        let problem = match tokio::fs::read(self.path()).await {
            Ok(bytes) => shape_error(&bytes),
            Err(e) => Some(e.to_string()),
        };
        let Some(problem) = problem else {
            return false;
        };

        warn!("Store {} is corrupt ({problem}), recreating", self.path().display());
        if let Err(e) = tokio::fs::remove_file(self.path()).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove corrupt store: {e}");
            }
        }
        if let Err(e) = self.write_unlocked(&Data::default()).await {
            warn!("failed to recreate store: {e}");
        }
        true
    }

    // --- Unlocked helpers (caller holds the lock) ---

    async fn read_unlocked(&self) -> Result<Data, DoorbellError> {
        let bytes = tokio::fs::read(self.path())
            .await
            .map_err(|e| storage_err("failed to read", self.path(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| storage_err("failed to parse", self.path(), e))
    }

    async fn write_unlocked(&self, data: &Data) -> Result<(), DoorbellError> {
        let path = self.path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("failed to create data dir for", path, e))?;
        }
        let json = serde_json::to_vec_pretty(data)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| storage_err("failed to write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| storage_err("failed to replace", path, e))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn storage_err(action: &str, path: &Path, e: impl std::fmt::Display) -> DoorbellError {
    DoorbellError::Storage(format!("{action} {}: {e}", path.display()))
}

/// Describe why `bytes` is not a valid `Data` document, if it isn't.
///
/// Top-level keys must match exactly; nested structs reject unknown fields
/// during deserialization.
fn shape_error(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return Some(e.to_string()),
    };
    let Some(found) = value.as_object() else {
        return Some("top level is not an object".to_string());
    };
    let expected = match serde_json::to_value(Data::default()) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => return Some("schema could not be rendered".to_string()),
    };
    let mut found_keys: Vec<&String> = found.keys().collect();
    let mut expected_keys: Vec<&String> = expected.keys().collect();
    found_keys.sort();
    expected_keys.sort();
    if found_keys != expected_keys {
        return Some(format!("fields {found_keys:?} != {expected_keys:?}"));
    }
    serde_json::from_value::<Data>(value).err().map(|e| e.to_string())
}
