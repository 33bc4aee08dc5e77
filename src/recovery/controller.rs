use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::prompt::{OperatorPrompt, RecoveryChoice};
use super::signal::Readiness;
use crate::error::Error;
use crate::export::Exporter;
use crate::model::{CandidateRecord, VoteSession};
use crate::persistence::{SessionPersistence, SnapshotError};

/// States of the startup recovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Checking,
    NoSnapshot,
    PromptingOperator,
    Exporting,
    Discarding,
    Resuming,
    Done,
}

impl Display for RecoveryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What recovery did, as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RecoveryReport {
    /// No interrupted session was found.
    NothingToRecover,
    /// A snapshot was found but could not be read. Startup went ahead without it.
    CorruptSnapshot { reason: String },
    /// The recovered results were exported and the snapshot removed.
    Exported { path: PathBuf },
    /// Export failed; the snapshot was kept so nothing is lost.
    ExportFailed { reason: String },
    /// The recovered results were thrown away.
    Discarded,
    /// Resuming, but the UI has not signalled readiness yet.
    AwaitingReadiness { candidates: usize, votes: u64 },
    /// Voting continues with the recovered session.
    #[serde(rename_all = "camelCase")]
    Resumed {
        candidates: usize,
        votes: u64,
        synthesized_ids: Vec<String>,
    },
    /// The recovered session could not be handed over; the snapshot was kept.
    ResumeFailed { reason: String },
}

/// A recovered session checked against the current roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub session: VoteSession,
    /// Roster entries created for recovered candidates that the roster no longer has.
    pub synthesized: Vec<CandidateRecord>,
}

/// Check a recovered session against the roster.
///
/// Candidates that were removed from the roster after the crash get a
/// minimal roster entry back, so that none of their votes are dropped.
pub fn reconcile(recovered: VoteSession, roster: &[CandidateRecord]) -> Reconciled {
    let mut synthesized: Vec<CandidateRecord> = Vec::new();
    for tally in recovered.iter() {
        let known = roster.iter().chain(&synthesized).any(|c| c.id == tally.id);
        if !known {
            warn!(
                "Recovered candidate {:?} ({}) is missing from the roster, restoring it",
                tally.id, tally.name
            );
            synthesized.push(CandidateRecord::new(tally.id.clone(), tally.name.clone()));
        }
    }
    Reconciled {
        session: recovered,
        synthesized,
    }
}

/// Result of the decision phase.
pub enum Decision {
    /// Recovery is over; startup can carry on.
    Finished(RecoveryReport),
    /// The operator chose to resume; the hand-off is still to come.
    Resume(PendingResume),
}

/// Decides, once per process, what happens to a session interrupted by a crash.
///
/// The controller is consumed by [`RecoveryController::run`], so it can never
/// be re-entered.
pub struct RecoveryController {
    state: RecoveryState,
    snapshots: SessionPersistence,
    prompt: Box<dyn OperatorPrompt>,
    exporter: Arc<dyn Exporter>,
}

impl RecoveryController {
    pub fn new(
        snapshots: SessionPersistence,
        prompt: Box<dyn OperatorPrompt>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self {
            state: RecoveryState::Idle,
            snapshots,
            prompt,
            exporter,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    fn transition(&mut self, next: RecoveryState) {
        debug!("Recovery: {} -> {next}", self.state);
        self.state = next;
    }

    /// Inspect the snapshot and, if there is one, ask the operator what to do.
    /// Export and discard complete here; resume returns a [`PendingResume`].
    pub async fn run(mut self, roster: &[CandidateRecord]) -> Decision {
        self.transition(RecoveryState::Checking);
        let recovered = match self.snapshots.load().await {
            Ok(Some(session)) if !session.is_empty() => session,
            Ok(Some(_)) => {
                debug!("Recovery snapshot holds no tallies, removing it");
                self.clear_snapshot().await;
                return self.finish(RecoveryState::NoSnapshot, RecoveryReport::NothingToRecover);
            }
            Ok(None) => {
                return self.finish(RecoveryState::NoSnapshot, RecoveryReport::NothingToRecover);
            }
            Err(e) => {
                // Never block startup on a bad snapshot.
                error!("{e}; starting without recovery");
                let reason = match e {
                    SnapshotError::Corrupt { reason, .. } => reason,
                    other => other.to_string(),
                };
                return self.finish(
                    RecoveryState::Done,
                    RecoveryReport::CorruptSnapshot { reason },
                );
            }
        };

        info!(
            "Found an interrupted session: {} candidates, {} votes",
            recovered.len(),
            recovered.total_votes()
        );
        self.transition(RecoveryState::PromptingOperator);
        let choice = self.prompt.choose(&recovered).await;
        info!("Operator chose to {choice:?} the interrupted session");

        match choice {
            RecoveryChoice::Export => {
                self.transition(RecoveryState::Exporting);
                let report = match self.exporter.export(&recovered).await {
                    Ok(path) => {
                        self.clear_snapshot().await;
                        RecoveryReport::Exported { path }
                    }
                    Err(e) => {
                        error!("{e}; keeping the recovery snapshot");
                        RecoveryReport::ExportFailed {
                            reason: e.to_string(),
                        }
                    }
                };
                self.finish(RecoveryState::Done, report)
            }
            RecoveryChoice::Discard => {
                self.transition(RecoveryState::Discarding);
                self.clear_snapshot().await;
                self.finish(RecoveryState::Done, RecoveryReport::Discarded)
            }
            RecoveryChoice::Resume => {
                self.transition(RecoveryState::Resuming);
                Decision::Resume(PendingResume {
                    reconciled: reconcile(recovered, roster),
                })
            }
        }
    }

    fn finish(mut self, last: RecoveryState, report: RecoveryReport) -> Decision {
        self.transition(last);
        if last != RecoveryState::Done {
            self.transition(RecoveryState::Done);
        }
        Decision::Finished(report)
    }

    async fn clear_snapshot(&self) {
        if let Err(e) = self.snapshots.clear().await {
            error!("Could not remove recovery snapshot: {e}");
        }
    }
}

/// A resume decision waiting for the UI to become ready.
pub struct PendingResume {
    reconciled: Reconciled,
}

impl PendingResume {
    pub fn reconciled(&self) -> &Reconciled {
        &self.reconciled
    }

    /// Wait for the readiness handshake, then hand the reconciled session to
    /// `deliver`. Delivery is expected to make the session live, persisting
    /// it over the recovered snapshot before broadcasting resumes.
    pub async fn hand_off<F, Fut>(self, readiness: &Readiness, deliver: F) -> RecoveryReport
    where
        F: FnOnce(Reconciled) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        if !readiness.is_resolved() {
            info!("Waiting for the UI before resuming the interrupted session");
        }
        readiness.wait().await;

        let candidates = self.reconciled.session.len();
        let votes = self.reconciled.session.total_votes();
        let synthesized_ids = self
            .reconciled
            .synthesized
            .iter()
            .map(|candidate| candidate.id.clone())
            .collect();
        let report = match deliver(self.reconciled).await {
            Ok(()) => {
                info!("Resumed the interrupted session with {votes} votes");
                RecoveryReport::Resumed {
                    candidates,
                    votes,
                    synthesized_ids,
                }
            }
            Err(e) => {
                error!("Could not resume the interrupted session: {e}");
                RecoveryReport::ResumeFailed {
                    reason: e.to_string(),
                }
            }
        };
        debug!("Recovery: {} -> {}", RecoveryState::Resuming, RecoveryState::Done);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use rocket::tokio::{
        self, fs,
        time::{timeout, Duration},
    };

    use crate::export::ExportError;
    use crate::model::VoteTally;
    use crate::persistence::SNAPSHOT_FILE;

    /// Remembers what it was asked to export.
    #[derive(Default)]
    struct RecordingExporter {
        exported: Mutex<Vec<VoteSession>>,
        fail: bool,
    }

    #[rocket::async_trait]
    impl Exporter for RecordingExporter {
        async fn export(&self, session: &VoteSession) -> Result<PathBuf, ExportError> {
            if self.fail {
                return Err(ExportError {
                    path: "/nowhere.csv".into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.exported.lock().unwrap().push(session.clone());
            Ok("/exports/votos.csv".into())
        }
    }

    async fn snapshots_with(dir: &tempfile::TempDir, session: Option<&VoteSession>) -> SessionPersistence {
        let snapshots = SessionPersistence::new(dir.path().join(SNAPSHOT_FILE));
        if let Some(session) = session {
            snapshots.save(session).await.unwrap();
        }
        snapshots
    }

    fn controller(
        snapshots: &SessionPersistence,
        choice: RecoveryChoice,
        exporter: Arc<RecordingExporter>,
    ) -> RecoveryController {
        RecoveryController::new(snapshots.clone(), Box::new(choice), exporter)
    }

    #[rocket::async_test]
    async fn no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, None).await;
        let exporter = Arc::new(RecordingExporter::default());
        let recovery = controller(&snapshots, RecoveryChoice::Resume, exporter.clone());
        assert_eq!(recovery.state(), RecoveryState::Idle);

        match recovery.run(&CandidateRecord::example_roster()).await {
            Decision::Finished(report) => assert_eq!(report, RecoveryReport::NothingToRecover),
            Decision::Resume(_) => panic!("nothing should be resumed"),
        }
        assert!(exporter.exported.lock().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn corrupt_snapshot_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, None).await;
        fs::write(snapshots.path(), b"[{\"id\":\"A\",\"na").await.unwrap();

        let recovery = controller(&snapshots, RecoveryChoice::Resume, Default::default());
        match recovery.run(&[]).await {
            Decision::Finished(RecoveryReport::CorruptSnapshot { .. }) => {}
            _ => panic!("expected a corrupt snapshot report"),
        }
    }

    #[rocket::async_test]
    async fn empty_snapshot_is_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, Some(&VoteSession::default())).await;

        let recovery = controller(&snapshots, RecoveryChoice::Resume, Default::default());
        assert!(matches!(
            recovery.run(&[]).await,
            Decision::Finished(RecoveryReport::NothingToRecover)
        ));
        assert_eq!(snapshots.load().await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn export_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, Some(&VoteSession::example())).await;
        let exporter = Arc::new(RecordingExporter::default());

        let recovery = controller(&snapshots, RecoveryChoice::Export, exporter.clone());
        assert!(matches!(
            recovery.run(&[]).await,
            Decision::Finished(RecoveryReport::Exported { .. })
        ));
        assert_eq!(*exporter.exported.lock().unwrap(), vec![VoteSession::example()]);
        assert_eq!(snapshots.load().await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn failed_export_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, Some(&VoteSession::example())).await;
        let exporter = Arc::new(RecordingExporter {
            fail: true,
            ..Default::default()
        });

        let recovery = controller(&snapshots, RecoveryChoice::Export, exporter);
        assert!(matches!(
            recovery.run(&[]).await,
            Decision::Finished(RecoveryReport::ExportFailed { .. })
        ));
        assert_eq!(snapshots.load().await.unwrap(), Some(VoteSession::example()));
    }

    #[rocket::async_test]
    async fn discard_clears() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, Some(&VoteSession::example())).await;
        let exporter = Arc::new(RecordingExporter::default());

        let recovery = controller(&snapshots, RecoveryChoice::Discard, exporter.clone());
        assert!(matches!(
            recovery.run(&[]).await,
            Decision::Finished(RecoveryReport::Discarded)
        ));
        assert!(exporter.exported.lock().unwrap().is_empty());
        assert_eq!(snapshots.load().await.unwrap(), None);
    }

    #[test]
    fn reconcile_restores_missing_candidates() {
        let roster = vec![CandidateRecord {
            picture: Some("data:image/png;base64,AAAA".to_string()),
            ..CandidateRecord::new("A", "Ana")
        }];
        let reconciled = reconcile(VoteSession::example(), &roster);

        assert_eq!(reconciled.session, VoteSession::example());
        assert_eq!(reconciled.synthesized, vec![CandidateRecord::new("B", "Beto")]);
    }

    #[test]
    fn reconcile_restores_duplicates_once() {
        let recovered: VoteSession = vec![
            VoteTally {
                id: "Z".to_string(),
                name: "Zoe".to_string(),
                votes: 1,
            },
            VoteTally {
                id: "Z".to_string(),
                name: "Zoe".to_string(),
                votes: 2,
            },
        ]
        .into();
        let reconciled = reconcile(recovered, &[]);
        assert_eq!(reconciled.synthesized.len(), 1);
        assert_eq!(reconciled.session.total_votes(), 3);
    }

    #[rocket::async_test]
    async fn resume_waits_for_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = snapshots_with(&dir, Some(&VoteSession::example())).await;
        let roster = vec![CandidateRecord::new("A", "Ana")];

        let recovery = controller(&snapshots, RecoveryChoice::Resume, Default::default());
        let pending = match recovery.run(&roster).await {
            Decision::Resume(pending) => pending,
            Decision::Finished(report) => panic!("expected to resume, got {report:?}"),
        };
        assert_eq!(pending.reconciled().synthesized.len(), 1);
        // Nothing is touched before the hand-off.
        assert_eq!(snapshots.load().await.unwrap(), Some(VoteSession::example()));

        let readiness = Readiness::new();
        let delivered = Arc::new(Mutex::new(None));
        let sink = delivered.clone();
        let handoff_readiness = readiness.clone();
        let handoff = tokio::spawn(async move {
            pending
                .hand_off(&handoff_readiness, |reconciled| async move {
                    *sink.lock().unwrap() = Some(reconciled);
                    Ok(())
                })
                .await
        });

        tokio::task::yield_now().await;
        assert!(delivered.lock().unwrap().is_none());

        readiness.resolve(());
        let report = timeout(Duration::from_secs(5), handoff)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            report,
            RecoveryReport::Resumed {
                candidates: 2,
                votes: 8,
                synthesized_ids: vec!["B".to_string()],
            }
        );

        let reconciled = delivered.lock().unwrap().take().unwrap();
        assert_eq!(reconciled.session[0].votes, 3);
        assert_eq!(reconciled.session[1].votes, 5);
        assert_eq!(reconciled.synthesized[0].picture, None);
    }

    #[rocket::async_test]
    async fn failed_hand_off_is_reported() {
        let pending = PendingResume {
            reconciled: reconcile(VoteSession::example(), &[]),
        };
        let readiness = Readiness::new();
        readiness.resolve(());

        let report = pending
            .hand_off(&readiness, |_| async {
                Err(Error::BadRequest("the UI went away".to_string()))
            })
            .await;
        assert!(matches!(report, RecoveryReport::ResumeFailed { .. }));
    }
}
