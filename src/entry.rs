//! Replicated log entries.

use std::fmt;

use crate::raft_types::EntryId;
use crate::raft_types::Term;

/// What a log entry does when applied.
///
/// Besides carrying application data (`Normal`), entries are the vehicle
/// for membership changes: a change takes effect on a server as soon as
/// the entry is *appended* to its log, and is reverted if the entry is
/// truncated away.
#[derive(Clone, Copy, Debug, Default)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EntryKind {
    /// Application data, opaque to the engine.
    #[default]
    Normal,

    /// Add a node that replicates the log but does not vote.
    AddNonvoting,

    /// Add a node directly as a voting member.
    AddVoting,

    /// Grant an existing non-voting node the vote.
    Promote,

    /// Revoke the vote of an existing voting node.
    Demote,

    /// Remove a voting node from the cluster.
    RemoveVoting,

    /// Remove a non-voting node from the cluster.
    RemoveNonvoting,

    /// The placeholder entry seeding a log restored from a snapshot.
    NoopSnapshot,
}

impl EntryKind {
    /// Whether this kind changes cluster membership in any way.
    pub fn is_cfg_change(&self) -> bool {
        matches!(
            self,
            EntryKind::AddNonvoting
                | EntryKind::AddVoting
                | EntryKind::Promote
                | EntryKind::Demote
                | EntryKind::RemoveVoting
                | EntryKind::RemoveNonvoting
        )
    }

    /// Whether this kind changes the *voting* configuration, i.e. the set
    /// of servers that count toward majorities.
    ///
    /// At most one such entry may be uncommitted at any time.
    pub fn is_voting_cfg_change(&self) -> bool {
        matches!(
            self,
            EntryKind::AddVoting | EntryKind::Promote | EntryKind::Demote | EntryKind::RemoveVoting
        )
    }
}

/// A single log entry.
///
/// An entry is identified by its position in the log (1-based, global);
/// the position is not stored in the entry itself. Entries are immutable
/// once committed.
#[derive(Clone, Debug, Default)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Entry {
    /// The term in which the entry was created. Terms along the log are
    /// non-decreasing.
    pub term: Term,

    /// Host-chosen opaque id, for matching client responses.
    pub id: EntryId,

    pub kind: EntryKind,

    /// Opaque payload. For configuration changes the host interprets it
    /// via [`RaftHost::entry_node_id`](crate::RaftHost::entry_node_id).
    pub data: Vec<u8>,
}

impl Entry {
    /// Create a `Normal` entry with term 0; `recv_entry` assigns the term.
    pub fn new(id: EntryId, data: Vec<u8>) -> Self {
        Self {
            term: 0,
            id,
            kind: EntryKind::Normal,
            data,
        }
    }

    pub fn is_cfg_change(&self) -> bool {
        self.kind.is_cfg_change()
    }

    pub fn is_voting_cfg_change(&self) -> bool {
        self.kind.is_voting_cfg_change()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(t:{} id:{} {}B)", self.kind, self.term, self.id, self.data.len())
    }
}
