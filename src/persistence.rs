//! Durable storage for cache snapshots.
//!
//! The cache serializes itself into a [`CacheSnapshot`] (JSON) and hands the
//! bytes to a [`PersistenceStore`]. Client-tier caches use [`FilePersistence`]
//! so cached routes survive app restarts; server-tier caches usually run
//! without a store. Load and save failures are never fatal to the cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RouteFingerprint, RoutePayload};

/// Snapshot format version. Bump when the layout changes; older snapshots are discarded.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors from loading or saving a cache snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("snapshot version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("persistence backend failed: {0}")]
    Backend(String),
}

/// Durable key-value blob store holding one serialized cache.
pub trait PersistenceStore: Send + Sync {
    /// Load the last saved state. `Ok(None)` means nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the saved state.
    fn save(&self, state: &[u8]) -> Result<(), PersistenceError>;
}

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: RouteFingerprint,
    pub payload: RoutePayload,
    pub created_at: u64,
    pub expires_at: u64,
    pub access_count: u64,
    pub last_access_at: u64,
}

/// Serialized cache contents and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: u64,
    pub hits: u64,
    pub misses: u64,
    pub entries: Vec<SnapshotEntry>,
}

impl CacheSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let snapshot: CacheSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Single-file store. Writes go to a sibling temp file and are renamed into
/// place so a crash mid-write never leaves a truncated snapshot.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "route-cache".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PersistenceStore for FilePersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        fs::write(&tmp, state)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process store, for tests and for hosts that persist through their own channel.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the store with raw bytes.
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    pub fn stored(&self) -> Option<Vec<u8>> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl PersistenceStore for MemoryPersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    fn save(&self, state: &[u8]) -> Result<(), PersistenceError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        *guard = Some(state.to_vec());
        Ok(())
    }
}
