//! Core scalar types shared across the engine.

use std::fmt;

/// A stable identifier of a cluster member.
///
/// Node ids are chosen by the host and never reused for a different
/// machine within the lifetime of a cluster.
pub type NodeId = u64;

/// The Raft logical clock.
///
/// A term is incremented by each election attempt (real-vote phase only;
/// pre-vote probes do not consume terms) and never decreases on a server.
pub type Term = u64;

/// A 1-based position in the replicated log.
///
/// `0` denotes the position before the first entry.
pub type LogIndex = u64;

/// A host-chosen opaque entry id, used by clients to match responses.
pub type EntryId = u64;

/// A point on the host's monotonic clock, in milliseconds.
///
/// The engine only compares and subtracts these values; the origin is up
/// to the host, as long as the clock never moves backwards.
pub type RaftTime = u64;

/// The role a server currently plays in the cluster.
///
/// A candidate runs in two sub-phases, pre-vote and real vote,
/// distinguished by the `prevote` flag on the server state; see
/// [`Raft::recv_request_vote`](crate::Raft::recv_request_vote).
#[derive(Clone, Copy, Debug, Default)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ServerState {
    /// Passively replicates the leader's log.
    #[default]
    Follower,

    /// Campaigns to become leader after an election timeout.
    Candidate,

    /// Owns the current term: accepts client entries and replicates them.
    Leader,
}

impl ServerState {
    pub fn is_follower(&self) -> bool {
        matches!(self, ServerState::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, ServerState::Candidate)
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, ServerState::Leader)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Follower => write!(f, "follower"),
            ServerState::Candidate => write!(f, "candidate"),
            ServerState::Leader => write!(f, "leader"),
        }
    }
}
