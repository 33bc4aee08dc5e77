//! One-time recovery of a session interrupted by a crash.
//!
//! At ignition the [`RecoveryController`] looks for a snapshot left behind by
//! the previous run and asks the operator what to do with it. Export and
//! discard finish before the server launches. Resume is handed off in the
//! background once the UI has raised the [`Readiness`] signal, and the resumed
//! session is then delivered through [`ResumeNotice`] exactly once.

mod controller;
mod prompt;
mod signal;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, sync::oneshot},
    Build, Rocket,
};

pub use controller::{
    reconcile, Decision, PendingResume, Reconciled, RecoveryController, RecoveryReport,
    RecoveryState,
};
pub use prompt::{OperatorPrompt, RecoveryChoice, TerminalPrompt};
pub use signal::{OneShot, Readiness};

use crate::config::Config;
use crate::lifecycle::Station;
use crate::model::VoteSession;

/// The resumed session, waiting to be picked up by the UI.
pub struct ResumeNotice {
    pending: Mutex<Option<oneshot::Receiver<VoteSession>>>,
}

impl ResumeNotice {
    /// A notice that will never deliver anything.
    pub fn none() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// A notice delivered through the returned sender.
    pub fn channel() -> (oneshot::Sender<VoteSession>, Self) {
        let (sender, receiver) = oneshot::channel();
        let notice = Self {
            pending: Mutex::new(Some(receiver)),
        };
        (sender, notice)
    }

    /// Wait for the resumed session. Only the first caller can receive it;
    /// everyone else, and everyone when there is nothing to resume, gets `None`.
    pub async fn take(&self) -> Option<VoteSession> {
        let receiver = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        receiver.await.ok()
    }
}

/// The latest [`RecoveryReport`], shared between the hand-off task and the API.
#[derive(Clone)]
pub struct RecoveryStatus(Arc<RwLock<RecoveryReport>>);

impl RecoveryStatus {
    pub fn new(report: RecoveryReport) -> Self {
        Self(Arc::new(RwLock::new(report)))
    }

    pub fn report(&self) -> RecoveryReport {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, report: RecoveryReport) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = report;
    }
}

/// A fairing that runs recovery once, before the server launches, and places
/// a [`RecoveryStatus`] and a [`ResumeNotice`] into managed state.
///
/// Needs [`Config`], [`Station`] and [`Readiness`] to be managed already.
pub struct RecoveryFairing;

#[rocket::async_trait]
impl Fairing for RecoveryFairing {
    fn info(&self) -> Info {
        Info {
            name: "Recovery",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (Some(config), Some(station), Some(readiness)) = (
            rocket.state::<Config>().cloned(),
            rocket.state::<Station>().cloned(),
            rocket.state::<Readiness>().cloned(),
        ) else {
            error!("Recovery needs the config and station fairings to run first");
            return Err(rocket);
        };

        let (snapshots, exporter, roster) = {
            let lifecycle = station.lock().await;
            (
                lifecycle.snapshots().clone(),
                lifecycle.exporter(),
                lifecycle.roster().to_vec(),
            )
        };
        let prompt: Box<dyn OperatorPrompt> = match config.recovery_choice() {
            Some(choice) => Box::new(choice),
            None => Box::new(TerminalPrompt),
        };

        let controller = RecoveryController::new(snapshots, prompt, exporter);
        let (status, notice) = match controller.run(&roster).await {
            Decision::Finished(report) => {
                info!("Recovery finished: {report:?}");
                (RecoveryStatus::new(report), ResumeNotice::none())
            }
            Decision::Resume(pending) => {
                let session = &pending.reconciled().session;
                let status = RecoveryStatus::new(RecoveryReport::AwaitingReadiness {
                    candidates: session.len(),
                    votes: session.total_votes(),
                });
                station.lock().await.expect_resume();
                let (sender, notice) = ResumeNotice::channel();
                let handoff_status = status.clone();
                tokio::spawn(async move {
                    let report = pending
                        .hand_off(&readiness, |reconciled| async move {
                            let session = station.lock().await.resume(reconciled).await?;
                            if sender.send(session).is_err() {
                                debug!("Nobody is waiting for the resumed session; it is live regardless");
                            }
                            Ok(())
                        })
                        .await;
                    handoff_status.set(report);
                });
                (status, notice)
            }
        };

        Ok(rocket.manage(status).manage(notice))
    }
}
