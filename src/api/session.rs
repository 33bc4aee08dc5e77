use std::path::PathBuf;

use log::debug;
use rocket::{delete, get, http::Status, post, put, routes, serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lifecycle::Station;
use crate::logging::RequestId;
use crate::model::{VoteSession, VoteTally};

pub fn routes() -> Vec<Route> {
    routes![
        enter_voting,
        current_session,
        save_votes,
        record_vote,
        conclude,
        interrupt
    ]
}

/// Where the concluded session's results were written.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    pub path: PathBuf,
}

#[post("/session")]
async fn enter_voting(station: &State<Station>) -> Result<Json<VoteSession>> {
    Ok(Json(station.lock().await.enter_voting().await?))
}

#[get("/session")]
async fn current_session(station: &State<Station>) -> Result<Json<VoteSession>> {
    station
        .lock()
        .await
        .current_session()
        .map(Json)
        .ok_or_else(|| Error::NotFound("no voting session is active".to_string()))
}

#[put("/session", data = "<session>")]
async fn save_votes(station: &State<Station>, session: Json<VoteSession>) -> Result<Status> {
    station.lock().await.save_votes(session.into_inner()).await?;
    Ok(Status::NoContent)
}

#[post("/session/votes/<candidate>")]
async fn record_vote(
    station: &State<Station>,
    request: &RequestId,
    candidate: &str,
) -> Result<Json<VoteTally>> {
    let tally = station.lock().await.record_vote(candidate).await?;
    debug!("req{request} {} now has {} votes", tally.id, tally.votes);
    Ok(Json(tally))
}

#[post("/session/export")]
async fn conclude(station: &State<Station>) -> Result<Json<ExportReceipt>> {
    let path = station.lock().await.conclude().await?;
    Ok(Json(ExportReceipt { path }))
}

#[delete("/session")]
async fn interrupt(station: &State<Station>) -> Result<Status> {
    station.lock().await.interrupt().await?;
    Ok(Status::NoContent)
}
