//! Writing concluded sessions out for the operator.

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use rocket::tokio::fs;
use thiserror::Error;

use crate::model::VoteSession;

#[derive(Debug, Error)]
#[error("Could not export results to {path}: {source}")]
pub struct ExportError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Receives each concluded session exactly once and turns it into user-facing output.
#[rocket::async_trait]
pub trait Exporter: Send + Sync {
    /// Export the session, returning where it went.
    async fn export(&self, session: &VoteSession) -> Result<PathBuf, ExportError>;
}

/// Writes results as a semicolon-separated spreadsheet, one file per session.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

/// Spreadsheet header row.
const HEADER: &str = "Candidato;Identificador;Votos";

/// Byte-order mark so spreadsheet programs detect UTF-8.
const BOM: char = '\u{FEFF}';

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render the session as CSV text.
    pub fn render(session: &VoteSession) -> String {
        let mut csv = String::new();
        csv.push(BOM);
        csv.push_str(HEADER);
        for tally in session.iter() {
            let votes = tally.votes.to_string();
            let row = [tally.name.as_str(), tally.id.as_str(), votes.as_str()]
                .map(|field| field.replace(';', ""))
                .join(";");
            csv.push('\n');
            csv.push_str(&row);
        }
        csv
    }
}

#[rocket::async_trait]
impl Exporter for CsvExporter {
    async fn export(&self, session: &VoteSession) -> Result<PathBuf, ExportError> {
        let path = self
            .dir
            .join(format!("votos-{}.csv", Utc::now().format("%Y%m%d-%H%M%S%.3f")));
        let write = async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&path, Self::render(session)).await
        };
        write.await.map_err(|source| ExportError {
            path: path.clone(),
            source,
        })?;
        info!(
            "Exported {} votes for {} candidates to {}",
            session.total_votes(),
            session.len(),
            path.display()
        );
        Ok(path)
    }
}
