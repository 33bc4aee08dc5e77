//! The UI channel: every command the UI can send to the station.

use rocket::Route;

mod broadcast;
mod candidates;
mod handshake;
mod session;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(handshake::routes());
    routes.extend(session::routes());
    routes.extend(broadcast::routes());
    routes.extend(candidates::routes());
    routes
}
