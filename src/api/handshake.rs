use log::{debug, info};
use rocket::{get, http::Status, post, routes, serde::json::Json, Responder, Route, State};

use crate::error::{Error, Result};
use crate::model::VoteSession;
use crate::recovery::{Readiness, RecoveryReport, RecoveryStatus, ResumeNotice};

pub fn routes() -> Vec<Route> {
    routes![ready, resumed_session, recovery_report]
}

/// The answer to the resume long poll.
#[derive(Responder)]
enum Resumed {
    #[response(status = 200)]
    Session(Json<VoteSession>),
    #[response(status = 204)]
    Nothing(()),
}

/// Raised by the UI once it is ready to receive a resumed session.
/// Only the first call has any effect.
#[post("/ready")]
fn ready(readiness: &State<Readiness>) -> Status {
    if readiness.resolve(()) {
        info!("UI is ready");
    } else {
        debug!("UI signalled readiness again");
    }
    Status::NoContent
}

/// Waits for the session resumed after a crash, if there is one.
/// It is delivered once; later polls get nothing.
#[get("/session/resume")]
async fn resumed_session(
    readiness: &State<Readiness>,
    notice: &State<ResumeNotice>,
) -> Result<Resumed> {
    if !readiness.is_resolved() {
        return Err(Error::Conflict(
            "the UI has not signalled readiness yet".to_string(),
        ));
    }
    Ok(match notice.take().await {
        Some(session) => Resumed::Session(Json(session)),
        None => Resumed::Nothing(()),
    })
}

/// What recovery did at startup.
#[get("/session/recovered")]
fn recovery_report(status: &State<RecoveryStatus>) -> Json<RecoveryReport> {
    Json(status.report())
}
