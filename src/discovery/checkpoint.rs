//! Durable session snapshots.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generator::GeneratorState;
use crate::schema::{DiscoveryStats, Strategy};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to resume a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub tag: String,
    pub strategy: Strategy,
    pub stats: DiscoveryStats,
    pub generator: GeneratorState,
    /// Fingerprint of the candidate pool the session ran against.
    pub pool_fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

/// Checkpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("No checkpoint at {0}")]
    Missing(PathBuf),
    #[error("Corrupt checkpoint {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    #[error("Failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A single checkpoint file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash mid-write leaves the previous checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(checkpoint)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        log::debug!(
            "Checkpoint saved to {} ({} evaluated)",
            self.path.display(),
            checkpoint.stats.evaluated
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::Missing(self.path.clone()));
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(checkpoint.version));
        }
        Ok(checkpoint)
    }

    /// Remove the checkpoint. Missing files are fine.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
