//! Couples entering and leaving voting mode to the tally store, the recovery
//! snapshot and the broadcast transmitter.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{
        fs,
        sync::{Mutex, MutexGuard},
    },
    Build, Orbit, Rocket,
};
use serde::Serialize;

use crate::broadcast::{open_broadcast_socket, resolve_port, BroadcastTransmitter};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::export::{CsvExporter, Exporter};
use crate::model::{CandidateRecord, SessionError, VoteSession, VoteTally, VoteTallyStore};
use crate::persistence::{self, RosterStore, SessionPersistence, SettingsStore};
use crate::recovery::Reconciled;

/// What the UI needs to know to draw the station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub voting: bool,
    pub votes: u64,
    pub broadcasting: bool,
    pub broadcast_target: Option<SocketAddr>,
    pub fullscreen: bool,
}

/// The broadcast port as configured, and as actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPort {
    pub configured: Option<i64>,
    pub effective: u16,
}

/// Owner of all mutable station state.
pub struct SessionLifecycle {
    store: VoteTallyStore,
    snapshots: SessionPersistence,
    transmitter: BroadcastTransmitter,
    settings: SettingsStore,
    roster: RosterStore,
    exporter: Arc<dyn Exporter>,
    broadcast_address: Ipv4Addr,
    default_port: u16,
    fullscreen: bool,
    resume_pending: bool,
}

impl SessionLifecycle {
    /// Load saved settings and roster from the configured data directory.
    pub async fn open(config: &Config) -> std::io::Result<Self> {
        fs::create_dir_all(config.data_dir()).await?;
        Ok(Self {
            store: VoteTallyStore::new(),
            snapshots: SessionPersistence::new(config.snapshot_path()),
            transmitter: BroadcastTransmitter::new(),
            settings: SettingsStore::load(config.settings_path()).await,
            roster: RosterStore::load(config.roster_path()).await,
            exporter: Arc::new(CsvExporter::new(config.export_dir())),
            broadcast_address: config.broadcast_address(),
            default_port: config.default_broadcast_port(),
            fullscreen: false,
            resume_pending: false,
        })
    }

    /// Replace the collaborator that receives concluded sessions.
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn exporter(&self) -> Arc<dyn Exporter> {
        self.exporter.clone()
    }

    pub fn snapshots(&self) -> &SessionPersistence {
        &self.snapshots
    }

    pub fn roster(&self) -> &[CandidateRecord] {
        self.roster.candidates()
    }

    pub fn current_session(&self) -> Option<VoteSession> {
        self.store.current_session()
    }

    /// Hold off voting and roster changes until a recovered session is
    /// resumed, so the snapshot on disk is not overwritten in the meantime.
    pub fn expect_resume(&mut self) {
        self.resume_pending = true;
    }

    pub fn is_resume_pending(&self) -> bool {
        self.resume_pending
    }

    /// Enter voting mode with a fresh session built from the roster.
    ///
    /// The session is persisted before the transmitter starts, so a crash at
    /// any point leaves a snapshot behind for every broadcast session.
    pub async fn enter_voting(&mut self) -> Result<VoteSession> {
        self.check_no_resume_pending()?;
        if self.store.is_active() {
            return Err(Error::Conflict("a voting session is already active".to_string()));
        }
        let session = self.store.start_session(self.roster.candidates())?;
        if let Err(e) = self.snapshots.save(&session).await {
            self.store.end_session();
            return Err(e.into());
        }
        self.start_broadcast_or_log().await;
        self.fullscreen = true;
        info!("Voting started with {} candidates", session.len());
        Ok(session)
    }

    /// Count a vote and persist the session before returning. A vote that
    /// could not be saved is taken back, so the caller may retry it.
    pub async fn record_vote(&mut self, id: &str) -> Result<VoteTally> {
        let before = self.store.current_session();
        let tally = self.store.record_vote(id)?;
        if let Err(e) = self.persist().await {
            if let Some(before) = before {
                self.store.adopt(before);
            }
            return Err(e);
        }
        Ok(tally)
    }

    /// Overwrite the active session with one sent by the UI, and persist it.
    pub async fn save_votes(&mut self, session: VoteSession) -> Result<()> {
        self.check_no_resume_pending()?;
        if !self.store.is_active() {
            return Err(SessionError::NoActiveSession.into());
        }
        if session.is_empty() {
            return Err(Error::BadRequest("a session needs at least one tally".to_string()));
        }
        self.store.adopt(session);
        self.persist().await
    }

    /// Conclude the session normally: export the results, then leave voting
    /// mode and clear the snapshot. Nothing changes if the export fails.
    /// Once exported, the session ends even if the snapshot can't be removed.
    pub async fn conclude(&mut self) -> Result<PathBuf> {
        let session = self
            .store
            .current_session()
            .ok_or(SessionError::NoActiveSession)?;
        let path = self.exporter.export(&session).await?;
        self.transmitter.stop().await;
        if let Err(e) = self.snapshots.clear().await {
            error!("Exported to {} but could not clear the snapshot: {e}", path.display());
        }
        self.store.end_session();
        self.fullscreen = false;
        info!("Voting concluded with {} votes", session.total_votes());
        Ok(path)
    }

    /// Leave voting mode without concluding. The snapshot stays on disk for
    /// recovery at the next startup.
    pub async fn interrupt(&mut self) -> Result<()> {
        if !self.store.is_active() {
            return Err(SessionError::NoActiveSession.into());
        }
        self.transmitter.stop().await;
        self.store.end_session();
        self.fullscreen = false;
        warn!("Voting interrupted; the snapshot is kept for recovery");
        Ok(())
    }

    /// Make a recovered session the live one and carry on voting.
    ///
    /// Candidates restored by reconciliation are added to the roster. The
    /// recovered session is persisted over the original snapshot before
    /// broadcasting restarts. Refused if a session is already live.
    pub async fn resume(&mut self, reconciled: Reconciled) -> Result<VoteSession> {
        self.resume_pending = false;
        if self.store.is_active() {
            return Err(Error::Conflict(
                "a voting session is already active".to_string(),
            ));
        }
        if !reconciled.synthesized.is_empty() {
            self.roster.extend(reconciled.synthesized).await?;
        }
        let session = reconciled.session;
        self.store.adopt(session.clone());
        self.persist().await?;
        self.start_broadcast_or_log().await;
        self.fullscreen = true;
        Ok(session)
    }

    /// Start broadcasting the live tallies, replacing any running transmission.
    pub async fn start_broadcast(&mut self) -> Result<SocketAddr> {
        let socket = open_broadcast_socket().await?;
        let target = SocketAddr::from((self.broadcast_address, self.broadcast_port().effective));
        self.transmitter
            .start(socket, self.store.subscribe(), target)
            .await;
        Ok(target)
    }

    /// Stop broadcasting. Returns whether anything was running.
    pub async fn stop_broadcast(&mut self) -> bool {
        self.transmitter.stop().await
    }

    /// Save a new broadcast port. A running transmission moves to it at once.
    pub async fn set_broadcast_port(&mut self, port: i64) -> Result<BroadcastPort> {
        self.settings.set_broadcast_port(port).await?;
        let resolved = self.broadcast_port();
        if i64::from(resolved.effective) != port {
            warn!("Broadcast port {port} is out of range, using {}", resolved.effective);
        }
        if self.transmitter.is_running() {
            self.start_broadcast().await?;
        }
        Ok(resolved)
    }

    pub fn broadcast_port(&self) -> BroadcastPort {
        let configured = self.settings.settings().broadcast_port;
        BroadcastPort {
            configured,
            effective: configured
                .map(|port| resolve_port(port, self.default_port))
                .unwrap_or(self.default_port),
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    /// Replace the saved roster. Refused while voting.
    pub async fn set_roster(&mut self, candidates: Vec<CandidateRecord>) -> Result<()> {
        self.check_no_resume_pending()?;
        if self.store.is_active() {
            return Err(Error::Conflict("the roster cannot change while voting".to_string()));
        }
        self.roster.replace(candidates).await?;
        Ok(())
    }

    /// Write the roster to an encrypted file.
    pub async fn export_roster(&self, path: &Path) -> Result<()> {
        Ok(persistence::export_roster(path, self.roster.candidates()).await?)
    }

    /// Replace the roster with the contents of an encrypted file.
    pub async fn import_roster(&mut self, path: &Path) -> Result<Vec<CandidateRecord>> {
        self.check_no_resume_pending()?;
        let candidates = persistence::import_roster(path).await?;
        self.set_roster(candidates.clone()).await?;
        Ok(candidates)
    }

    pub fn status(&self) -> StationStatus {
        let session = self.store.current_session();
        StationStatus {
            voting: session.is_some(),
            votes: session.map(|s| s.total_votes()).unwrap_or(0),
            broadcasting: self.transmitter.is_running(),
            broadcast_target: self.transmitter.target(),
            fullscreen: self.fullscreen,
        }
    }

    fn check_no_resume_pending(&self) -> Result<()> {
        if self.resume_pending {
            return Err(Error::Conflict(
                "an interrupted session is waiting to be resumed".to_string(),
            ));
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        match self.store.current_session() {
            Some(session) => Ok(self.snapshots.save(&session).await?),
            None => Err(SessionError::NoActiveSession.into()),
        }
    }

    /// Voting goes on without the display if the socket can't be opened.
    async fn start_broadcast_or_log(&mut self) {
        if let Err(e) = self.start_broadcast().await {
            error!("Could not start broadcasting tallies: {e}");
        }
    }
}

/// Shared handle to the station, placed in managed state.
#[derive(Clone)]
pub struct Station(Arc<Mutex<SessionLifecycle>>);

impl Station {
    pub fn new(lifecycle: SessionLifecycle) -> Self {
        Self(Arc::new(Mutex::new(lifecycle)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionLifecycle> {
        self.0.lock().await
    }
}

/// A fairing that opens the station from the managed [`Config`] and stops
/// broadcasting on shutdown.
pub struct StationFairing;

#[rocket::async_trait]
impl Fairing for StationFairing {
    fn info(&self) -> Info {
        Info {
            name: "Station",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.state::<Config>().cloned() {
            Some(config) => config,
            None => {
                error!("Station config is missing; attach the config fairing first");
                return Err(rocket);
            }
        };
        let lifecycle = match SessionLifecycle::open(&config).await {
            Ok(lifecycle) => lifecycle,
            Err(e) => {
                error!(
                    "Failed to open station data in {}: {e}",
                    config.data_dir().display()
                );
                return Err(rocket);
            }
        };
        info!(
            "Station ready with {} candidates on the roster",
            lifecycle.roster().len()
        );

        Ok(rocket.manage(Station::new(lifecycle)))
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(station) = rocket.state::<Station>() {
            station.lock().await.stop_broadcast().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocket::tokio::time::{timeout, Duration};

    use crate::broadcast::{TallyBoard, TallyMonitor};
    use crate::export::ExportError;
    use crate::recovery::reconcile;

    async fn station(dir: &Path) -> SessionLifecycle {
        let mut lifecycle = SessionLifecycle::open(&Config::for_data_dir(dir))
            .await
            .unwrap();
        lifecycle
            .set_roster(CandidateRecord::example_roster())
            .await
            .unwrap();
        lifecycle
    }

    struct BrokenExporter;

    #[rocket::async_trait]
    impl Exporter for BrokenExporter {
        async fn export(&self, _: &VoteSession) -> std::result::Result<PathBuf, ExportError> {
            Err(ExportError {
                path: "/full-disk.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "no space left"),
            })
        }
    }

    #[rocket::async_test]
    async fn entering_voting_persists_then_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;

        let session = lifecycle.enter_voting().await.unwrap();
        assert_eq!(session.len(), 3);
        assert!(session.iter().all(|tally| tally.votes == 0));
        assert_eq!(lifecycle.snapshots().load().await.unwrap(), Some(session));

        let status = lifecycle.status();
        assert!(status.voting && status.broadcasting && status.fullscreen);
        assert_eq!(
            status.broadcast_target,
            Some((Ipv4Addr::LOCALHOST, 8999).into())
        );

        assert!(matches!(
            lifecycle.enter_voting().await,
            Err(Error::Conflict(_))
        ));
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn empty_roster_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = SessionLifecycle::open(&Config::for_data_dir(dir.path()))
            .await
            .unwrap();

        assert!(matches!(
            lifecycle.enter_voting().await,
            Err(Error::Session(SessionError::EmptyRoster))
        ));
        assert!(!lifecycle.status().broadcasting);
        assert_eq!(lifecycle.snapshots().load().await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn every_vote_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();

        lifecycle.record_vote("B").await.unwrap();
        let tally = lifecycle.record_vote("B").await.unwrap();
        assert_eq!(tally.votes, 2);
        assert!(matches!(
            lifecycle.record_vote("Z").await,
            Err(Error::Session(SessionError::VoteTargetNotFound(_)))
        ));

        let saved = lifecycle.snapshots().load().await.unwrap().unwrap();
        assert_eq!(saved[1].votes, 2);
        assert_eq!(saved.total_votes(), 2);
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn conclude_exports_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();
        lifecycle.record_vote("A").await.unwrap();

        let path = lifecycle.conclude().await.unwrap();
        assert!(path.starts_with(dir.path().join("exports")));
        assert_eq!(lifecycle.snapshots().load().await.unwrap(), None);
        assert_eq!(
            lifecycle.status(),
            StationStatus {
                voting: false,
                votes: 0,
                broadcasting: false,
                broadcast_target: None,
                fullscreen: false,
            }
        );
    }

    #[rocket::async_test]
    async fn failed_export_leaves_voting_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path())
            .await
            .with_exporter(Arc::new(BrokenExporter));
        lifecycle.enter_voting().await.unwrap();

        assert!(matches!(lifecycle.conclude().await, Err(Error::Export(_))));
        assert!(lifecycle.status().voting);
        assert!(lifecycle.snapshots().load().await.unwrap().is_some());
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn interrupt_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();
        lifecycle.record_vote("C").await.unwrap();

        lifecycle.interrupt().await.unwrap();
        assert!(!lifecycle.status().broadcasting);
        let saved = lifecycle.snapshots().load().await.unwrap().unwrap();
        assert_eq!(saved[2].votes, 1);

        assert!(matches!(
            lifecycle.interrupt().await,
            Err(Error::Session(SessionError::NoActiveSession))
        ));
    }

    #[rocket::async_test]
    async fn port_change_moves_running_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        let mut monitor = TallyMonitor::bind((Ipv4Addr::LOCALHOST, 0).into())
            .await
            .unwrap();
        let port = monitor.local_addr().unwrap().port();

        lifecycle.enter_voting().await.unwrap();
        lifecycle.record_vote("A").await.unwrap();
        let resolved = lifecycle.set_broadcast_port(port.into()).await.unwrap();
        assert_eq!(resolved.effective, port);
        assert_eq!(
            lifecycle.status().broadcast_target,
            Some((Ipv4Addr::LOCALHOST, port).into())
        );

        let mut board = TallyBoard::new();
        while board.tallies().len() < 3 {
            let (tally, _) = timeout(Duration::from_secs(5), monitor.next_tally())
                .await
                .unwrap()
                .unwrap();
            board.update(tally);
        }
        assert_eq!(board.total_votes(), 1);
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn out_of_range_port_is_saved_but_not_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;

        let resolved = lifecycle.set_broadcast_port(80).await.unwrap();
        assert_eq!(
            resolved,
            BroadcastPort {
                configured: Some(80),
                effective: 8999,
            }
        );
        assert!(!lifecycle.status().broadcasting);

        let reopened = station(dir.path()).await;
        assert_eq!(reopened.broadcast_port().configured, Some(80));
    }

    #[rocket::async_test]
    async fn resume_restores_roster_and_votes() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = SessionLifecycle::open(&Config::for_data_dir(dir.path()))
            .await
            .unwrap();
        lifecycle
            .set_roster(vec![CandidateRecord::new("A", "Ana")])
            .await
            .unwrap();

        let reconciled = reconcile(VoteSession::example(), lifecycle.roster());
        let session = lifecycle.resume(reconciled).await.unwrap();
        assert_eq!(session, VoteSession::example());
        assert_eq!(lifecycle.roster().len(), 2);
        assert_eq!(lifecycle.roster()[1], CandidateRecord::new("B", "Beto"));
        assert_eq!(
            lifecycle.snapshots().load().await.unwrap(),
            Some(VoteSession::example())
        );

        let status = lifecycle.status();
        assert!(status.voting && status.broadcasting && status.fullscreen);
        assert_eq!(status.votes, 8);

        // Voting carries on from the recovered counts.
        assert_eq!(lifecycle.record_vote("B").await.unwrap().votes, 6);
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn pending_resume_locks_voting_and_roster() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle
            .snapshots()
            .save(&VoteSession::example())
            .await
            .unwrap();
        let file = dir.path().join("candidatos.cv");
        lifecycle.export_roster(&file).await.unwrap();
        lifecycle.expect_resume();

        assert!(matches!(
            lifecycle.enter_voting().await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            lifecycle.save_votes(VoteSession::example()).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            lifecycle.set_roster(Vec::new()).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            lifecycle.import_roster(&file).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(
            lifecycle.snapshots().load().await.unwrap(),
            Some(VoteSession::example())
        );
        assert_eq!(lifecycle.roster(), &CandidateRecord::example_roster()[..]);

        let reconciled = reconcile(VoteSession::example(), lifecycle.roster());
        lifecycle.resume(reconciled).await.unwrap();
        assert!(!lifecycle.is_resume_pending());
        lifecycle.record_vote("A").await.unwrap();

        // A second resume must not replace the live counts.
        let reconciled = reconcile(VoteSession::example(), lifecycle.roster());
        assert!(matches!(
            lifecycle.resume(reconciled).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(lifecycle.current_session().unwrap()[0].votes, 4);
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn unsaved_vote_is_taken_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();
        lifecycle.record_vote("A").await.unwrap();

        // A directory in the snapshot's place makes every save fail.
        let snapshot = lifecycle.snapshots().path().to_path_buf();
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();
        assert!(matches!(
            lifecycle.record_vote("A").await,
            Err(Error::Snapshot(_))
        ));
        assert_eq!(lifecycle.current_session().unwrap()[0].votes, 1);
        assert_eq!(lifecycle.status().votes, 1);

        std::fs::remove_dir(&snapshot).unwrap();
        assert_eq!(lifecycle.record_vote("A").await.unwrap().votes, 2);
        let saved = lifecycle.snapshots().load().await.unwrap().unwrap();
        assert_eq!(saved[0].votes, 2);
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn exported_session_ends_even_if_snapshot_stays() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();

        let snapshot = lifecycle.snapshots().path().to_path_buf();
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();
        std::fs::write(snapshot.join("keep"), b"").unwrap();

        lifecycle.conclude().await.unwrap();
        assert!(!lifecycle.status().voting);
        assert!(!lifecycle.status().broadcasting);
        // Nothing left to export twice.
        assert!(matches!(
            lifecycle.conclude().await,
            Err(Error::Session(SessionError::NoActiveSession))
        ));
        let exports = std::fs::read_dir(dir.path().join("exports")).unwrap().count();
        assert_eq!(exports, 1);
    }

    #[rocket::async_test]
    async fn roster_is_locked_while_voting() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = station(dir.path()).await;
        lifecycle.enter_voting().await.unwrap();

        assert!(matches!(
            lifecycle.set_roster(Vec::new()).await,
            Err(Error::Conflict(_))
        ));
        lifecycle.stop_broadcast().await;
    }

    #[rocket::async_test]
    async fn roster_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = station(dir.path()).await;
        let file = dir.path().join("candidatos.cv");
        lifecycle.export_roster(&file).await.unwrap();

        let other = tempfile::tempdir().unwrap();
        let mut imported = SessionLifecycle::open(&Config::for_data_dir(other.path()))
            .await
            .unwrap();
        let candidates = imported.import_roster(&file).await.unwrap();
        assert_eq!(candidates, CandidateRecord::example_roster());
        assert_eq!(imported.roster(), &candidates[..]);
    }
}
