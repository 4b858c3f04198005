//! The capability interface through which the engine performs all side
//! effects.

use crate::entry::Entry;
use crate::error::RaftError;
use crate::messages::AppendEntries;
use crate::messages::InstallSnapshot;
use crate::messages::InstallSnapshotResponse;
use crate::messages::RequestVote;
use crate::node::Node;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;
use crate::raft_types::Term;

/// Progress reported by the host while consuming an offered snapshot.
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
pub enum SnapshotProgress {
    /// More transfer work remains; the leader will keep offering.
    InProgress,

    /// The snapshot is fully installed locally.
    Complete,
}

/// Why [`RaftHost::notify_membership_event`] fired.
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
pub enum MembershipEvent {
    Add,
    Remove,
}

/// Host callbacks consumed by [`Raft`](crate::Raft).
///
/// All methods are synchronous and must not re-enter the engine. Entries
/// and nodes passed by reference are borrowed for the duration of the
/// call.
///
/// Errors returned from any callback propagate out of the engine call that
/// triggered them, unchanged; wrap host-specific failures in
/// [`RaftError::Host`].
pub trait RaftHost {
    /// Transmit a RequestVote to `node`.
    fn send_request_vote(&mut self, node: &Node, req: &RequestVote) -> Result<(), RaftError>;

    /// Transmit an AppendEntries to `node`.
    fn send_append_entries(&mut self, node: &Node, req: &AppendEntries) -> Result<(), RaftError>;

    /// Transmit an InstallSnapshot to `node`. The snapshot payload itself
    /// travels out of band, keyed by `(last_idx, last_term)`.
    fn send_install_snapshot(&mut self, node: &Node, req: &InstallSnapshot) -> Result<(), RaftError>;

    /// Consume an offered snapshot from the current leader.
    ///
    /// The host may fill response fields (e.g. a transfer offset) into
    /// `resp`. Returning [`SnapshotProgress::Complete`] makes the engine
    /// mark the response complete.
    fn recv_install_snapshot(
        &mut self,
        node: &Node,
        req: &InstallSnapshot,
        resp: &mut InstallSnapshotResponse,
    ) -> Result<SnapshotProgress, RaftError>;

    /// Observe a snapshot response on the leader, before the engine
    /// updates the peer's replication state from it.
    fn recv_install_snapshot_response(&mut self, node: &Node, resp: &InstallSnapshotResponse) -> Result<(), RaftError>;

    /// Apply a committed entry to the state machine.
    ///
    /// Entries are applied exactly once, in strictly increasing index
    /// order. Returning [`RaftError::Shutdown`] propagates out of
    /// [`Raft::periodic`](crate::Raft::periodic) and stops further
    /// applies.
    fn apply_log(&mut self, entry: &Entry, idx: LogIndex) -> Result<(), RaftError>;

    /// Durably record the current term.
    ///
    /// Must not return `Ok` before the value is durable: the engine acts
    /// on the new term (votes, replies) immediately afterwards.
    fn persist_term(&mut self, term: Term) -> Result<(), RaftError>;

    /// Durably record the vote cast in the current term.
    ///
    /// Must not return `Ok` before the value is durable: a granting
    /// RequestVoteResponse is produced immediately afterwards.
    fn persist_vote(&mut self, voted_for: Option<NodeId>) -> Result<(), RaftError>;

    /// Store `entries`, occupying indices `first_idx..`.
    ///
    /// Called before the engine's log reports the entries as present. The
    /// host may accept only a prefix and return its length (partial
    /// accept, not an error); a hard error stores nothing.
    fn log_offer(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<usize, RaftError>;

    /// Discard the stored prefix `entries` (ascending, starting at
    /// `first_idx`) after it was folded into a snapshot.
    fn log_poll(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<(), RaftError>;

    /// Discard the stored suffix `entries` (ascending, starting at
    /// `first_idx`); batches arrive in reverse index order, undoing
    /// `log_offer`.
    fn log_pop(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<(), RaftError>;

    /// Tell the engine which node a configuration-change entry targets.
    ///
    /// The engine never looks into `Entry::data`; the host owns the
    /// encoding.
    fn entry_node_id(&self, entry: &Entry, idx: LogIndex) -> NodeId;

    /// A non-voting node caught up to within one entry of the leader's
    /// tail. Fires at most once per node; the typical reaction is to
    /// submit a `Promote` entry.
    fn node_has_sufficient_logs(&mut self, node: &Node) -> Result<(), RaftError> {
        let _ = node;
        Ok(())
    }

    /// A node joined or left the cluster. `entry` is the configuration
    /// entry that caused it, absent for bootstrap and snapshot-load
    /// changes.
    fn notify_membership_event(&mut self, node: &Node, entry: Option<&Entry>, event: MembershipEvent) {
        let _ = (node, entry, event);
    }

    /// Read the host's monotonic clock, in milliseconds.
    ///
    /// Must be non-decreasing; the engine clamps (and logs) regressions.
    fn now(&mut self) -> RaftTime;

    /// A uniform random number in `[0, 1)`, used to spread election
    /// timeouts. Inject a deterministic source in tests.
    fn rand(&mut self) -> f64;
}
