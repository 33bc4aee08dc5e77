use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::CandidateRecord;

/// The running vote count for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub id: String,
    pub name: String,
    pub votes: u64,
}

impl VoteTally {
    /// A zeroed tally for the given candidate. The picture is not carried over.
    pub fn for_candidate(candidate: &CandidateRecord) -> Self {
        Self {
            id: candidate.id.clone(),
            name: candidate.name.clone(),
            votes: 0,
        }
    }
}

/// The complete state of one election: a tally per candidate, in roster order.
/// Serialises as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteSession(Vec<VoteTally>);

impl VoteSession {
    /// Zeroed tallies for every roster entry, in roster order.
    pub fn from_roster(roster: &[CandidateRecord]) -> Self {
        Self(roster.iter().map(VoteTally::for_candidate).collect())
    }

    /// Position of the first tally with the given id, and how many tallies share it.
    pub(crate) fn find(&self, id: &str) -> Option<(usize, usize)> {
        let mut matches = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, tally)| tally.id == id)
            .map(|(index, _)| index);
        let first = matches.next()?;
        Some((first, 1 + matches.count()))
    }

    pub(crate) fn tally_mut(&mut self, index: usize) -> &mut VoteTally {
        &mut self.0[index]
    }

    /// Total votes across all candidates.
    pub fn total_votes(&self) -> u64 {
        self.0.iter().map(|tally| tally.votes).sum()
    }
}

impl Deref for VoteSession {
    type Target = [VoteTally];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<VoteTally>> for VoteSession {
    fn from(tallies: Vec<VoteTally>) -> Self {
        Self(tallies)
    }
}

impl IntoIterator for VoteSession {
    type Item = VoteTally;
    type IntoIter = std::vec::IntoIter<VoteTally>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
impl VoteSession {
    /// Ana with 3 votes and Beto with 5.
    pub fn example() -> Self {
        vec![
            VoteTally {
                id: "A".to_string(),
                name: "Ana".to_string(),
                votes: 3,
            },
            VoteTally {
                id: "B".to_string(),
                name: "Beto".to_string(),
                votes: 5,
            },
        ]
        .into()
    }
}
