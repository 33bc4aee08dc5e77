use log::warn;
use rocket::tokio::sync::watch;
use thiserror::Error;

use super::{CandidateRecord, VoteSession, VoteTally};

/// Ways in which a vote session can be refused or a vote rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Cannot start a voting session with an empty roster")]
    EmptyRoster,
    #[error("No voting session is active")]
    NoActiveSession,
    #[error("Vote target not found: no candidate with id {0:?}")]
    VoteTargetNotFound(String),
}

/// Owner of the in-progress vote session.
///
/// The session lives in a `watch` channel so that readers such as the
/// broadcast transmitter always see the latest tallies without holding a lock
/// on the store. An empty session means no session is active.
pub struct VoteTallyStore {
    session: watch::Sender<VoteSession>,
}

impl VoteTallyStore {
    /// Create a store with no active session.
    pub fn new() -> Self {
        let (session, _) = watch::channel(VoteSession::default());
        Self { session }
    }

    /// Start a fresh session from the roster, replacing any previous one.
    pub fn start_session(&self, roster: &[CandidateRecord]) -> Result<VoteSession, SessionError> {
        if roster.is_empty() {
            return Err(SessionError::EmptyRoster);
        }
        let session = VoteSession::from_roster(roster);
        self.session.send_replace(session.clone());
        Ok(session)
    }

    /// Take ownership of an existing session, e.g. one recovered after a crash.
    pub fn adopt(&self, session: VoteSession) {
        self.session.send_replace(session);
    }

    /// Count one vote for the candidate with the given id, returning the updated tally.
    ///
    /// Ids are assumed to be unique; if several tallies share the id, the first
    /// one wins and the duplication is logged.
    pub fn record_vote(&self, id: &str) -> Result<VoteTally, SessionError> {
        let mut outcome = Err(SessionError::NoActiveSession);
        self.session.send_if_modified(|session| {
            if session.is_empty() {
                return false;
            }
            match session.find(id) {
                Some((index, matches)) => {
                    if matches > 1 {
                        warn!("{matches} candidates share the id {id:?}; counting the vote for the first");
                    }
                    let tally = session.tally_mut(index);
                    tally.votes += 1;
                    outcome = Ok(tally.clone());
                    true
                }
                None => {
                    warn!("Vote for unknown candidate {id:?}, roster and tallies are out of sync");
                    outcome = Err(SessionError::VoteTargetNotFound(id.to_string()));
                    false
                }
            }
        });
        outcome
    }

    /// Snapshot of the active session, if there is one.
    pub fn current_session(&self) -> Option<VoteSession> {
        let session = self.session.borrow();
        (!session.is_empty()).then(|| session.clone())
    }

    /// Is a session in progress?
    pub fn is_active(&self) -> bool {
        !self.session.borrow().is_empty()
    }

    /// Discard the in-memory session. Persisted state is left alone.
    pub fn end_session(&self) {
        self.session.send_replace(VoteSession::default());
    }

    /// A read-only view that always yields the latest session.
    pub fn subscribe(&self) -> watch::Receiver<VoteSession> {
        self.session.subscribe()
    }
}

impl Default for VoteTallyStore {
    fn default() -> Self {
        Self::new()
    }
}
