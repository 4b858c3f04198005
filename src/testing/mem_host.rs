//! An in-memory, fully observable host.

use anyerror::AnyError;

use crate::entry::Entry;
use crate::entry::EntryKind;
use crate::error::RaftError;
use crate::host::MembershipEvent;
use crate::host::RaftHost;
use crate::host::SnapshotProgress;
use crate::messages::AppendEntries;
use crate::messages::InstallSnapshot;
use crate::messages::InstallSnapshotResponse;
use crate::messages::RequestVote;
use crate::node::Node;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;
use crate::raft_types::Term;

/// A [`RaftHost`] that keeps everything on the heap.
///
/// Outgoing messages land in per-kind outboxes for the test (or the
/// [`Cluster`](crate::testing::Cluster) router) to drain; persistence
/// mirrors into plain `Vec`s; the clock and the random source are plain
/// public fields the test sets at will.
#[derive(Clone, Debug)]
pub struct MemHost {
    /// The host clock in milliseconds, advanced manually.
    pub now: RaftTime,

    /// The value the next `rand()` call returns. Zero makes randomized
    /// election timeouts collapse to exactly `election_timeout`.
    pub rand: f64,

    /// Durably persisted term.
    pub term: Term,

    /// Durably persisted vote.
    pub voted_for: Option<NodeId>,

    /// Durable log mirror, kept in sync by offer/pop/poll.
    pub log: Vec<(LogIndex, Entry)>,

    /// Entries applied to the state machine, in apply order.
    pub applied: Vec<(LogIndex, Entry)>,

    pub sent_request_votes: Vec<(NodeId, RequestVote)>,
    pub sent_append_entries: Vec<(NodeId, AppendEntries)>,
    pub sent_install_snapshots: Vec<(NodeId, InstallSnapshot)>,

    /// Nodes reported ready for promotion, in report order.
    pub sufficient_log_events: Vec<NodeId>,

    pub membership_events: Vec<(NodeId, MembershipEvent)>,

    /// Accept at most this many entries per `log_offer`.
    pub offer_cap: Option<usize>,

    /// Fail the next `persist_term`/`persist_vote`.
    pub fail_persist: bool,

    /// Return [`RaftError::Shutdown`] from `apply_log` at this index.
    pub shutdown_on_apply: Option<LogIndex>,

    /// What `recv_install_snapshot` reports to the engine.
    pub snapshot_progress: SnapshotProgress,
}

impl Default for MemHost {
    fn default() -> Self {
        Self {
            now: 0,
            rand: 0.0,
            term: 0,
            voted_for: None,
            log: Vec::new(),
            applied: Vec::new(),
            sent_request_votes: Vec::new(),
            sent_append_entries: Vec::new(),
            sent_install_snapshots: Vec::new(),
            sufficient_log_events: Vec::new(),
            membership_events: Vec::new(),
            offer_cap: None,
            fail_persist: false,
            shutdown_on_apply: None,
            snapshot_progress: SnapshotProgress::InProgress,
        }
    }
}

impl MemHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a configuration-entry target the way
    /// [`MemHost::entry_node_id`](RaftHost::entry_node_id) decodes it.
    pub fn encode_node_id(id: NodeId) -> Vec<u8> {
        id.to_le_bytes().to_vec()
    }

    /// The indices applied so far, in order.
    pub fn applied_indices(&self) -> Vec<LogIndex> {
        self.applied.iter().map(|(idx, _)| *idx).collect()
    }
}

impl RaftHost for MemHost {
    fn send_request_vote(&mut self, node: &Node, req: &RequestVote) -> Result<(), RaftError> {
        self.sent_request_votes.push((node.id(), req.clone()));
        Ok(())
    }

    fn send_append_entries(&mut self, node: &Node, req: &AppendEntries) -> Result<(), RaftError> {
        self.sent_append_entries.push((node.id(), req.clone()));
        Ok(())
    }

    fn send_install_snapshot(&mut self, node: &Node, req: &InstallSnapshot) -> Result<(), RaftError> {
        self.sent_install_snapshots.push((node.id(), req.clone()));
        Ok(())
    }

    fn recv_install_snapshot(
        &mut self,
        _node: &Node,
        _req: &InstallSnapshot,
        _resp: &mut InstallSnapshotResponse,
    ) -> Result<SnapshotProgress, RaftError> {
        Ok(self.snapshot_progress)
    }

    fn recv_install_snapshot_response(&mut self, _node: &Node, _resp: &InstallSnapshotResponse) -> Result<(), RaftError> {
        Ok(())
    }

    fn apply_log(&mut self, entry: &Entry, idx: LogIndex) -> Result<(), RaftError> {
        if Some(idx) == self.shutdown_on_apply {
            return Err(RaftError::Shutdown);
        }
        self.applied.push((idx, entry.clone()));
        Ok(())
    }

    fn persist_term(&mut self, term: Term) -> Result<(), RaftError> {
        if self.fail_persist {
            return Err(RaftError::Host(AnyError::error("term persistence failed")));
        }
        self.term = term;
        Ok(())
    }

    fn persist_vote(&mut self, voted_for: Option<NodeId>) -> Result<(), RaftError> {
        if self.fail_persist {
            return Err(RaftError::Host(AnyError::error("vote persistence failed")));
        }
        self.voted_for = voted_for;
        Ok(())
    }

    fn log_offer(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<usize, RaftError> {
        // A snapshot placeholder replaces the whole stored log, like a
        // real host wiping its log store on snapshot load.
        if entries.first().map(|ety| ety.kind) == Some(EntryKind::NoopSnapshot) {
            self.log.clear();
        }

        let n = self.offer_cap.map_or(entries.len(), |cap| cap.min(entries.len()));
        for (k, ety) in entries[..n].iter().enumerate() {
            self.log.push((first_idx + k as u64, ety.clone()));
        }
        Ok(n)
    }

    fn log_poll(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<(), RaftError> {
        debug_assert_eq!(self.log.first().map(|(idx, _)| *idx), Some(first_idx));
        self.log.drain(..entries.len());
        Ok(())
    }

    fn log_pop(&mut self, entries: &[Entry], first_idx: LogIndex) -> Result<(), RaftError> {
        debug_assert_eq!(
            self.log.last().map(|(idx, _)| *idx),
            Some(first_idx + entries.len() as u64 - 1)
        );
        self.log.truncate(self.log.len() - entries.len());
        Ok(())
    }

    fn entry_node_id(&self, entry: &Entry, _idx: LogIndex) -> NodeId {
        let mut buf = [0u8; 8];
        let n = entry.data.len().min(8);
        buf[..n].copy_from_slice(&entry.data[..n]);
        u64::from_le_bytes(buf)
    }

    fn node_has_sufficient_logs(&mut self, node: &Node) -> Result<(), RaftError> {
        self.sufficient_log_events.push(node.id());
        Ok(())
    }

    fn notify_membership_event(&mut self, node: &Node, _entry: Option<&Entry>, event: MembershipEvent) {
        self.membership_events.push((node.id(), event));
    }

    fn now(&mut self) -> RaftTime {
        self.now
    }

    fn rand(&mut self) -> f64 {
        self.rand
    }
}
