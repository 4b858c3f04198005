//! Error types returned by the engine.

use anyerror::AnyError;

use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;

/// The error returned by every fallible engine operation.
///
/// Operations that violate a protocol precondition return a categorized
/// error and leave the engine state unchanged. [`RaftError::Shutdown`] is
/// reserved for detected state-machine impossibilities (e.g. an entry
/// conflicting with committed history): the engine never silently corrupts
/// committed state, it reports and expects the host to stop the server.
///
/// Host callback failures pass through unchanged as [`RaftError::Host`].
#[derive(Debug, Clone, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum RaftError {
    /// The operation is only valid on the leader.
    #[error("this server is not the leader")]
    NotLeader,

    /// A voting-configuration change is still uncommitted; only one may be
    /// in flight at a time.
    #[error("a voting-configuration change is already in progress")]
    OneVotingChangeOnly,

    /// A snapshot is being taken; configuration changes and a second
    /// `begin_snapshot` are refused until `end_snapshot`.
    #[error("a snapshot is in progress")]
    SnapshotInProgress,

    /// `end_snapshot` was called with no snapshot in progress.
    #[error("no snapshot is in progress")]
    SnapshotNotInProgress,

    /// `begin_load_snapshot` was called with the metadata of the snapshot
    /// that is already loaded.
    #[error("this snapshot has already been loaded")]
    SnapshotAlreadyLoaded,

    /// The submitted configuration change fails the validity matrix, e.g.
    /// promoting an absent node or removing the leader itself.
    #[error("invalid configuration change")]
    InvalidCfgChange,

    /// Starting an election now might violate a lease this server, or the
    /// current leader, still holds.
    #[error("an election might violate an outstanding lease")]
    MightViolateLease,

    /// The index is outside the window the operation accepts.
    #[error("log index {0} is out of range")]
    InvalidIndex(LogIndex),

    /// A message refers to a node this server does not know about.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The host requested shutdown, or the engine detected a fatal
    /// inconsistency with committed history.
    #[error("shutdown requested")]
    Shutdown,

    /// A host callback failed; the error is passed through verbatim.
    #[error(transparent)]
    Host(#[from] AnyError),
}
