use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use rocket::serde::json::serde_json;
use rocket::tokio::fs;
use thiserror::Error;

use crate::model::VoteSession;

/// Failure to read back a snapshot. A missing snapshot is not an error.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Recovery snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Could not access recovery snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// The single-file recovery snapshot of the active vote session.
///
/// Every save writes the whole session, overwriting the previous snapshot.
#[derive(Debug, Clone)]
pub struct SessionPersistence {
    path: PathBuf,
}

impl SessionPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full session to disk, replacing any earlier snapshot.
    pub async fn save(&self, session: &VoteSession) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec(session).map_err(|e| SnapshotError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&self.path, json).await?;
        trace!("Saved {} tallies to {}", session.len(), self.path.display());
        Ok(())
    }

    /// Read the snapshot back. `Ok(None)` means there was nothing to recover.
    pub async fn load(&self) -> Result<Option<VoteSession>, SnapshotError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| SnapshotError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Delete the snapshot. Deleting an absent snapshot succeeds.
    pub async fn clear(&self) -> Result<(), SnapshotError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Cleared recovery snapshot {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
