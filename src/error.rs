use log::{error, warn};
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::export::ExportError;
use crate::model::SessionError;
use crate::persistence::{RosterFileError, SnapshotError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    RosterFile(#[from] RosterFileError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::Io(_) | Self::Snapshot(_) | Self::Export(_) => Status::InternalServerError,
            Self::Session(SessionError::EmptyRoster) => Status::BadRequest,
            Self::Session(SessionError::NoActiveSession) => Status::Conflict,
            Self::Session(SessionError::VoteTargetNotFound(_)) => Status::NotFound,
            Self::RosterFile(RosterFileError::Io(_)) => Status::InternalServerError,
            Self::RosterFile(RosterFileError::Corrupt { .. }) => Status::BadRequest,
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        Err(status)
    }
}
