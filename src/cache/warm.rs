//! Durable file-backed raster store, written only by the refresh cycle.
//!
//! Entry names are a deterministic function of the fingerprint, so reads
//! never need an index. Writes go through a temp file in the same
//! directory followed by an atomic rename; a concurrent reader sees either
//! the previous complete file or the new complete file. A store-level
//! marker records which schedule snapshot version the current cycle's
//! files were encoded from.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::warn;

use crate::errors::StorageError;
use crate::models::{Fingerprint, Raster, SnapshotVersion};
use crate::render::bmp;

const VERSION_MARKER: &str = ".snapshot-version";
const RASTER_SUFFIX: &str = ".raster";

#[derive(Clone)]
pub struct WarmTier {
    root: PathBuf,
    prefix: String,
    default_timezone: String,
}

impl WarmTier {
    pub fn new<P: Into<PathBuf>>(root: P, prefix: &str, default_timezone: &str) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            default_timezone: default_timezone.to_string(),
        }
    }

    pub async fn ensure_storage_dir(&self) -> Result<(), StorageError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).await?;
        }
        Ok(())
    }

    pub fn file_name(&self, fingerprint: &Fingerprint) -> String {
        fingerprint.warm_file_name(&self.prefix, &self.default_timezone)
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(self.file_name(fingerprint))
    }

    /// Read one entry. Absent entries are `Ok(None)`; an unparseable file
    /// is treated as a miss (and logged) rather than served to a display.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Raster>, StorageError> {
        let path = self.entry_path(fingerprint);
        match fs::read(&path).await {
            Ok(bytes) => {
                if bmp::parse_header(&bytes).is_none() {
                    warn!(path = %path.display(), "Warm entry failed integrity check, treating as miss");
                    return Ok(None);
                }
                Ok(Some(Raster::new(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Atomically create or replace one entry.
    pub async fn put(&self, fingerprint: &Fingerprint, raster: &Raster) -> Result<(), StorageError> {
        self.ensure_storage_dir().await?;
        let name = self.file_name(fingerprint);
        self.write_atomic(&self.root.join(&name), raster.as_bytes(), &name)
    }

    /// Remove one entry. Removing an absent entry is not an error.
    pub async fn evict(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        self.remove_file(&self.file_name(fingerprint)).await
    }

    /// Remove an entry by its listed file name.
    pub async fn remove_file(&self, name: &str) -> Result<(), StorageError> {
        let path = self.root.join(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// File names of every entry currently present, sorted for determinism.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if let Some(name) = item.file_name().to_str() {
                if name.ends_with(RASTER_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Record the snapshot version this cycle's entries were encoded from.
    pub async fn write_version_marker(&self, version: &SnapshotVersion) -> Result<(), StorageError> {
        self.ensure_storage_dir().await?;
        self.write_atomic(
            &self.root.join(VERSION_MARKER),
            version.as_str().as_bytes(),
            VERSION_MARKER,
        )
    }

    pub async fn read_version_marker(&self) -> Result<Option<SnapshotVersion>, StorageError> {
        match fs::read_to_string(self.root.join(VERSION_MARKER)).await {
            Ok(contents) => Ok(Some(SnapshotVersion::parse(contents.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8], name: &str) -> Result<(), StorageError> {
        let mut temp = NamedTempFile::new_in(&self.root).map_err(StorageError::Io)?;
        temp.write_all(bytes).map_err(StorageError::Io)?;
        temp.flush().map_err(StorageError::Io)?;
        temp.persist(path).map_err(|e| StorageError::Persist {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
