//! Human-readable JSON files holding one top-level object each.
//!
//! Every write rewrites the whole file through a temp file and a rename, so
//! a crash mid-write leaves the previous version in place.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::error::StorageError;

/// A JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or `T::default()` when the file doesn't exist yet.
    pub async fn load<T>(&self) -> Result<T, StorageError>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(T::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Write the document with two-space indentation.
    pub async fn save<T>(&self, value: &T) -> Result<(), StorageError>
    where
        T: Serialize,
    {
        let text = serde_json::to_string_pretty(value)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).await.map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
