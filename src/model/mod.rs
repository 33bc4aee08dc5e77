//! Data model: the candidate roster and the vote tallies derived from it.

mod candidate;
mod store;
mod tally;

pub use candidate::CandidateRecord;
pub use store::{SessionError, VoteTallyStore};
pub use tally::{VoteSession, VoteTally};
