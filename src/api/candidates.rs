use std::path::PathBuf;

use rocket::{get, http::Status, post, put, routes, serde::json::Json, Route, State};
use serde::Deserialize;

use crate::error::Result;
use crate::lifecycle::Station;
use crate::model::CandidateRecord;

pub fn routes() -> Vec<Route> {
    routes![roster, save_roster, export_roster, import_roster]
}

/// An encrypted roster file chosen by the operator.
#[derive(Debug, Deserialize)]
struct RosterFile {
    path: PathBuf,
}

#[get("/candidates")]
async fn roster(station: &State<Station>) -> Json<Vec<CandidateRecord>> {
    Json(station.lock().await.roster().to_vec())
}

#[put("/candidates", data = "<candidates>")]
async fn save_roster(
    station: &State<Station>,
    candidates: Json<Vec<CandidateRecord>>,
) -> Result<Status> {
    station
        .lock()
        .await
        .set_roster(candidates.into_inner())
        .await?;
    Ok(Status::NoContent)
}

#[post("/candidates/export", data = "<file>")]
async fn export_roster(station: &State<Station>, file: Json<RosterFile>) -> Result<Status> {
    station.lock().await.export_roster(&file.path).await?;
    Ok(Status::NoContent)
}

#[post("/candidates/import", data = "<file>")]
async fn import_roster(
    station: &State<Station>,
    file: Json<RosterFile>,
) -> Result<Json<Vec<CandidateRecord>>> {
    Ok(Json(station.lock().await.import_roster(&file.path).await?))
}
