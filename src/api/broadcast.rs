use rocket::{get, post, put, routes, serde::json::Json, Route, State};
use serde::Deserialize;

use crate::error::Result;
use crate::lifecycle::{BroadcastPort, Station, StationStatus};

pub fn routes() -> Vec<Route> {
    routes![
        start_broadcast,
        stop_broadcast,
        set_broadcast_port,
        broadcast_port,
        status,
        set_fullscreen
    ]
}

#[derive(Debug, Deserialize)]
struct PortRequest {
    port: i64,
}

#[derive(Debug, Deserialize)]
struct FullscreenRequest {
    fullscreen: bool,
}

#[post("/broadcast/start")]
async fn start_broadcast(station: &State<Station>) -> Result<Json<StationStatus>> {
    let mut station = station.lock().await;
    station.start_broadcast().await?;
    Ok(Json(station.status()))
}

#[post("/broadcast/stop")]
async fn stop_broadcast(station: &State<Station>) -> Json<StationStatus> {
    let mut station = station.lock().await;
    station.stop_broadcast().await;
    Json(station.status())
}

/// Out-of-range ports are accepted and saved, but broadcasting uses the default.
#[put("/broadcast/port", data = "<request>")]
async fn set_broadcast_port(
    station: &State<Station>,
    request: Json<PortRequest>,
) -> Result<Json<BroadcastPort>> {
    Ok(Json(
        station.lock().await.set_broadcast_port(request.port).await?,
    ))
}

#[get("/broadcast/port")]
async fn broadcast_port(station: &State<Station>) -> Json<BroadcastPort> {
    Json(station.lock().await.broadcast_port())
}

#[get("/status")]
async fn status(station: &State<Station>) -> Json<StationStatus> {
    Json(station.lock().await.status())
}

#[put("/presentation/fullscreen", data = "<request>")]
async fn set_fullscreen(
    station: &State<Station>,
    request: Json<FullscreenRequest>,
) -> Json<StationStatus> {
    let mut station = station.lock().await;
    station.set_fullscreen(request.fullscreen);
    Json(station.status())
}
