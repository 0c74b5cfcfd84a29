//! Whole-document JSON files.
//!
//! A read parses the entire file; a write serializes the entire value to
//! a temporary file in the same directory and renames it over the
//! target, so a concurrent reader sees either the old or the new
//! document and never a partial one.

use crate::reconcile::types::ReconcileError;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A JSON document of type `T` stored at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name only, for messages that must not reveal directories.
    fn label(&self) -> String {
        label_of(&self.path)
    }

    /// Read the document; a missing file yields `T::default()`.
    pub fn load(&self) -> Result<T, ReconcileError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => {
                return Err(ReconcileError::store(format!(
                    "Cannot read {}: {}",
                    self.label(),
                    e.kind()
                )))
            }
        };
        if text.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| ReconcileError::store(format!("{} is not valid JSON: {}", self.label(), e)))
    }

    /// Like [`load`](Self::load) but falls back to defaults on any error.
    pub fn load_or_default(&self) -> T {
        self.load().unwrap_or_else(|e| {
            warn!("Starting from defaults: {}", e);
            T::default()
        })
    }

    /// Serialize the whole document.
    pub fn encode(&self, value: &T) -> Result<Vec<u8>, ReconcileError> {
        serde_json::to_vec_pretty(value)
            .map_err(|e| ReconcileError::store(format!("Cannot serialize {}: {}", self.label(), e)))
    }

    /// Atomically replace the document, creating its directory if needed.
    pub fn save(&self, value: &T) -> Result<(), ReconcileError> {
        let body = self.encode(value)?;
        write_atomic(&self.path, &body)
    }

    /// Write an already encoded document on the blocking pool.
    pub async fn write(&self, body: Vec<u8>) -> Result<(), ReconcileError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| ReconcileError::store(format!("Write of {} did not finish: {}", self.label(), e)))?
    }

    /// [`save`](Self::save) without blocking the async runtime.
    pub async fn persist(&self, value: &T) -> Result<(), ReconcileError> {
        let body = self.encode(value)?;
        self.write(body).await
    }
}

fn label_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string())
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), ReconcileError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |what: &str, e: std::io::Error| {
        ReconcileError::store(format!("Cannot {} {}: {}", what, label_of(path), e.kind()))
    };

    fs::create_dir_all(&dir).map_err(|e| io_err("create directory for", e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| io_err("stage", e))?;
    tmp.write_all(body).map_err(|e| io_err("write", e))?;
    tmp.as_file().sync_all().map_err(|e| io_err("sync", e))?;
    tmp.persist(path).map_err(|e| io_err("replace", e.error))?;
    Ok(())
}
