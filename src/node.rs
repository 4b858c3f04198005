//! Per-peer replication bookkeeping.

use std::fmt;

use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;

/// A cluster member as seen by one server, including the local server
/// itself.
///
/// Nodes are owned by the engine; they enter and leave the table as
/// configuration entries are appended, truncated, or loaded from a
/// snapshot (plus explicit bootstrap before first use).
#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    voting: bool,

    /// Whether this node granted its vote to the local candidate in the
    /// current (pre-)vote round.
    voted_for_me: bool,

    /// Index of the next entry the leader will send to this node.
    next_idx: LogIndex,

    /// Highest index known to be replicated on this node.
    match_idx: LogIndex,

    /// Absolute time until which this node promised not to vote for
    /// anyone but the local leader.
    lease: RaftTime,

    /// When this node became effective for the current leader; grants the
    /// leader slack before the first lease from this node arrives.
    effective_time: RaftTime,

    /// Set once a non-voting node has caught up far enough to be promoted.
    has_sufficient_logs: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, voting: bool) -> Self {
        Self {
            id,
            voting,
            voted_for_me: false,
            next_idx: 1,
            match_idx: 0,
            lease: 0,
            effective_time: 0,
            has_sufficient_logs: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_voting(&self) -> bool {
        self.voting
    }

    pub fn next_idx(&self) -> LogIndex {
        self.next_idx
    }

    pub fn match_idx(&self) -> LogIndex {
        self.match_idx
    }

    pub fn lease(&self) -> RaftTime {
        self.lease
    }

    pub fn effective_time(&self) -> RaftTime {
        self.effective_time
    }

    pub fn has_sufficient_logs(&self) -> bool {
        self.has_sufficient_logs
    }

    pub(crate) fn voted_for_me(&self) -> bool {
        self.voted_for_me
    }

    pub(crate) fn set_voting(&mut self, voting: bool) {
        self.voting = voting;
    }

    pub(crate) fn set_voted_for_me(&mut self, voted: bool) {
        self.voted_for_me = voted;
    }

    pub(crate) fn set_next_idx(&mut self, idx: LogIndex) {
        self.next_idx = idx;
    }

    pub(crate) fn set_match_idx(&mut self, idx: LogIndex) {
        self.match_idx = idx;
    }

    pub(crate) fn set_lease(&mut self, lease: RaftTime) {
        self.lease = lease;
    }

    pub(crate) fn set_effective_time(&mut self, t: RaftTime) {
        self.effective_time = t;
    }

    pub(crate) fn set_has_sufficient_logs(&mut self) {
        self.has_sufficient_logs = true;
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node-{}({} ni:{} mi:{})",
            self.id,
            if self.voting { "voting" } else { "non-voting" },
            self.next_idx,
            self.match_idx
        )
    }
}
