use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rocket::serde::json::{serde_json, Value};
use rocket::tokio::fs;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::model::CandidateRecord;

/// Failure to read an exported roster file.
#[derive(Debug, Error)]
pub enum RosterFileError {
    #[error("Could not access roster file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Roster file {path} appears to be corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// The operator's candidate roster, kept in memory and mirrored to disk.
#[derive(Debug)]
pub struct RosterStore {
    path: PathBuf,
    candidates: Vec<CandidateRecord>,
}

impl RosterStore {
    /// Load the saved roster. A missing or unreadable file yields an empty roster.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let candidates = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable roster {}: {e}", path.display());
                Vec::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Could not read roster {}: {e}", path.display());
                Vec::new()
            }
        };
        info!("Loaded roster of {} candidates", candidates.len());
        Self { path, candidates }
    }

    pub fn candidates(&self) -> &[CandidateRecord] {
        &self.candidates
    }

    /// Replace the roster and write it to disk.
    pub async fn replace(&mut self, candidates: Vec<CandidateRecord>) -> std::io::Result<()> {
        self.candidates = candidates;
        self.save().await
    }

    /// Append entries to the roster and write it to disk.
    pub async fn extend(
        &mut self,
        candidates: impl IntoIterator<Item = CandidateRecord>,
    ) -> std::io::Result<()> {
        self.candidates.extend(candidates);
        self.save().await
    }

    async fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec(&self.candidates)?;
        fs::write(&self.path, json).await
    }
}

/// Write an encrypted roster file that another station can import.
pub async fn export_roster(path: &Path, candidates: &[CandidateRecord]) -> std::io::Result<()> {
    let json = serde_json::to_vec(candidates)?;
    fs::write(path, codec::encrypt(&json)).await?;
    info!("Exported {} candidates to {}", candidates.len(), path.display());
    Ok(())
}

/// Read and validate an encrypted roster file.
pub async fn import_roster(path: &Path) -> Result<Vec<CandidateRecord>, RosterFileError> {
    let corrupt = |reason: String| RosterFileError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let frame = fs::read(path).await?;
    let plaintext = codec::decrypt(&frame).map_err(|e: CodecError| corrupt(e.to_string()))?;
    let entries: Vec<Value> =
        serde_json::from_slice(&plaintext).map_err(|e| corrupt(e.to_string()))?;

    // Validate entry by entry so the report names the offending one.
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry)
                .map_err(|e| corrupt(format!("entry {index} is not a candidate: {e}")))
        })
        .collect()
}
