//! Versioned schedule snapshot publication.
//!
//! The provisioned season data is mutated externally (a data updater drops
//! new JSON files); readers must never observe a half-updated structure.
//! The store parses everything into an immutable snapshot, stamps it with
//! the SHA-256 of the source bytes, and swaps the published `Arc` in one
//! step. In-flight encodes keep whatever snapshot they captured.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{ScheduleSnapshot, SnapshotVersion};

/// One published snapshot and its content-derived version.
#[derive(Debug, Clone)]
pub struct VersionedSnapshot {
    pub snapshot: ScheduleSnapshot,
    pub version: SnapshotVersion,
}

pub struct SnapshotStore {
    path: PathBuf,
    current: RwLock<Arc<VersionedSnapshot>>,
}

impl SnapshotStore {
    /// New store publishing an empty snapshot until the first reload.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let empty = VersionedSnapshot {
            snapshot: ScheduleSnapshot {
                seasons: Vec::new(),
                circuits: HashMap::new(),
            },
            version: SnapshotVersion::from_bytes(b""),
        };
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(empty)),
        }
    }

    /// Re-read every season file and publish the result atomically.
    ///
    /// Files are merged in name order so the version hash is stable across
    /// directory iteration order. A file that fails to parse is skipped
    /// with a warning rather than poisoning the whole snapshot.
    pub async fn reload(&self) -> Result<SnapshotVersion> {
        let mut sources: Vec<(String, Vec<u8>)> = Vec::new();

        match fs::read_dir(&self.path).await {
            Ok(mut dir) => {
                while let Some(item) = dir.next_entry().await? {
                    let name = item.file_name().to_string_lossy().to_string();
                    if !name.ends_with(".json") {
                        continue;
                    }
                    let bytes = fs::read(item.path())
                        .await
                        .with_context(|| format!("reading snapshot file {}", name))?;
                    sources.push((name, bytes));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Snapshot directory missing, publishing empty snapshot");
            }
            Err(e) => return Err(e.into()),
        }
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hash_input = Vec::new();
        let mut merged = ScheduleSnapshot {
            seasons: Vec::new(),
            circuits: HashMap::new(),
        };
        for (name, bytes) in &sources {
            hash_input.extend_from_slice(name.as_bytes());
            hash_input.extend_from_slice(bytes);
            match serde_json::from_slice::<ScheduleSnapshot>(bytes) {
                Ok(partial) => {
                    merged.seasons.extend(partial.seasons);
                    merged.circuits.extend(partial.circuits);
                }
                Err(e) => {
                    warn!("Skipping unparseable snapshot file {}: {}", name, e);
                }
            }
        }
        merged.seasons.sort_by_key(|season| season.season);

        let version = SnapshotVersion::from_bytes(&hash_input);
        let race_count: usize = merged.seasons.iter().map(|s| s.races.len()).sum();
        info!(
            version = %version,
            seasons = merged.seasons.len(),
            races = race_count,
            "Published schedule snapshot"
        );

        let published = Arc::new(VersionedSnapshot {
            snapshot: merged,
            version: version.clone(),
        });
        *self.current.write().await = published;
        Ok(version)
    }

    /// Publish a snapshot directly. Used by tests and embedded updaters.
    pub async fn publish(&self, snapshot: ScheduleSnapshot, version: SnapshotVersion) {
        *self.current.write().await = Arc::new(VersionedSnapshot { snapshot, version });
    }

    pub async fn current(&self) -> Arc<VersionedSnapshot> {
        self.current.read().await.clone()
    }

    pub async fn current_version(&self) -> SnapshotVersion {
        self.current.read().await.version.clone()
    }
}
