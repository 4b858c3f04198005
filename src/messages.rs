//! The value records exchanged between servers.
//!
//! No wire encoding is defined here: the host receives these records from
//! the engine, serializes them however it likes (enable the `serde`
//! feature for a head start), and feeds the peer's records back into the
//! engine's `recv_*` methods.

use std::fmt;

use crate::entry::Entry;
use crate::raft_types::EntryId;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;
use crate::raft_types::Term;

/// Sent by candidates to gather votes (§5.2), in both the pre-vote and the
/// real-vote phase.
#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RequestVote {
    /// The candidate's term. For a pre-vote probe this is the candidate's
    /// *current* term; the term is only incremented when the probe wins.
    pub term: Term,

    pub candidate_id: NodeId,

    /// Index of the candidate's last log entry.
    pub last_log_idx: LogIndex,

    /// Term of the candidate's last log entry.
    pub last_log_term: Term,

    /// `true` for the probe round that does not bump terms.
    pub prevote: bool,
}

impl fmt::Display for RequestVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestVote{} t:{} c:{} last:({}, {})",
            if self.prevote { "(prevote)" } else { "" },
            self.term,
            self.candidate_id,
            self.last_log_idx,
            self.last_log_term
        )
    }
}

/// The grantor's verdict carried in a [`RequestVoteResponse`].
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VoteGrant {
    Granted,
    NotGranted,

    /// The grantor does not know the candidate. A candidate that was
    /// removed from the cluster but missed the removal entry sees this.
    UnknownNode,
}

#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RequestVoteResponse {
    /// The grantor's current term, for the candidate to update itself.
    pub term: Term,

    pub vote_granted: VoteGrant,

    /// Echo of the request's `prevote` flag, so a candidate can tell the
    /// phases apart.
    pub prevote: bool,
}

/// Sent by the leader to replicate entries (§5.3) and as a heartbeat
/// (`entries` empty).
#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AppendEntries {
    pub term: Term,

    /// The leader's commit index.
    pub leader_commit: LogIndex,

    /// Index of the entry immediately preceding `entries`.
    pub prev_log_idx: LogIndex,

    /// Term of the entry at `prev_log_idx`.
    pub prev_log_term: Term,

    pub entries: Vec<Entry>,
}

impl AppendEntries {
    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for AppendEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AppendEntries t:{} lc:{} prev:({}, {}) #{}",
            self.term,
            self.leader_commit,
            self.prev_log_idx,
            self.prev_log_term,
            self.entries.len()
        )
    }
}

#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AppendEntriesResponse {
    pub term: Term,

    /// Whether the follower's log matched at `(prev_log_idx,
    /// prev_log_term)` and the entries were accepted.
    pub success: bool,

    /// On success, the index of the last entry the follower now holds from
    /// this request; on failure, the follower's current index, so the
    /// leader can backtrack `next_idx` without probing one step at a time.
    pub current_idx: LogIndex,

    /// The index of the first entry the request carried.
    pub first_idx: LogIndex,

    /// The lease granted with this acceptance: an absolute time until
    /// which the follower promises not to vote for anyone else. Zero when
    /// the request was rejected.
    pub lease: RaftTime,
}

/// Sent by the leader when a peer is so far behind that the needed entries
/// were already compacted away. The snapshot payload itself is transferred
/// by the host out of band.
#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InstallSnapshot {
    pub term: Term,

    /// Index of the last entry covered by the snapshot.
    pub last_idx: LogIndex,

    /// Term of that entry.
    pub last_term: Term,
}

#[derive(Clone, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InstallSnapshotResponse {
    pub term: Term,

    /// Echo of the offered snapshot index.
    pub last_idx: LogIndex,

    /// Whether the follower now covers `last_idx` (either it finished
    /// installing, or it already had the entries).
    pub complete: bool,

    /// Lease granted with the acceptance, as in [`AppendEntriesResponse`].
    pub lease: RaftTime,
}

/// Returned by [`Raft::recv_entry`](crate::Raft::recv_entry): where the
/// submitted entry landed.
///
/// Keep it around and ask
/// [`Raft::entry_response_committed`](crate::Raft::entry_response_committed)
/// later to learn the entry's fate.
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EntryResponse {
    pub id: EntryId,
    pub term: Term,
    pub idx: LogIndex,
}

/// The fate of a submitted entry.
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EntryStatus {
    /// The entry is committed and will survive any future leader.
    Committed,

    /// Not committed yet; ask again later.
    Pending,

    /// An entry from another leader took this index; the submission is
    /// lost and must be retried.
    Invalidated,
}
