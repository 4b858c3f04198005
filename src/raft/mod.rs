//! The per-server consensus state machine.

use std::error::Error;

use validit::Valid;
use validit::Validate;

use crate::config::Config;
use crate::entry::Entry;
use crate::error::RaftError;
use crate::host::RaftHost;
use crate::log::Log;
use crate::messages::EntryResponse;
use crate::messages::EntryStatus;
use crate::node::Node;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;
use crate::raft_types::ServerState;
use crate::raft_types::Term;

mod election;
mod membership;
mod replication;
mod snapshot;

#[cfg(test)]
mod replication_test;

/// The volatile and persistent scalar state of one server.
///
/// The log and the node table live next to this in [`Raft`]; everything
/// here is plain data so the whole struct can be validated on access.
#[derive(Debug)]
pub(crate) struct RaftState {
    /// The server's logical clock; never decreases.
    pub(crate) current_term: Term,

    /// Who got this server's vote in `current_term`, durable via
    /// [`RaftHost::persist_vote`].
    pub(crate) voted_for: Option<NodeId>,

    pub(crate) state: ServerState,

    /// Candidate sub-phase: `true` while probing, before the term is
    /// consumed.
    pub(crate) prevote: bool,

    pub(crate) leader_id: Option<NodeId>,

    /// Highest index known to be safely replicated.
    pub(crate) commit_idx: LogIndex,

    /// Highest index handed to [`RaftHost::apply_log`].
    pub(crate) last_applied_idx: LogIndex,

    pub(crate) snapshot_last_idx: LogIndex,
    pub(crate) snapshot_last_term: Term,
    pub(crate) snapshot_in_progress: bool,

    /// Index of the uncommitted voting-configuration change, if any.
    pub(crate) voting_cfg_change_log_idx: Option<LogIndex>,

    /// When this server last heard from a valid leader (or granted a
    /// vote); doubles as the heartbeat anchor on a leader.
    pub(crate) election_timer: RaftTime,

    /// The current randomized election timeout, sampled from
    /// `[election_timeout, 2 * election_timeout)`.
    pub(crate) election_timeout_rand: RaftTime,

    /// When this process started; a restarted server refuses to grant
    /// votes for `election_timeout` after this point.
    pub(crate) start_time: RaftTime,
}

impl RaftState {
    fn new(now: RaftTime) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            state: ServerState::Follower,
            prevote: false,
            leader_id: None,
            commit_idx: 0,
            last_applied_idx: 0,
            snapshot_last_idx: 0,
            snapshot_last_term: 0,
            snapshot_in_progress: false,
            voting_cfg_change_log_idx: None,
            election_timer: now,
            election_timeout_rand: 0,
            start_time: now,
        }
    }
}

impl Validate for RaftState {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        validit::less_equal!(self.last_applied_idx, self.commit_idx);
        Ok(())
    }
}

/// A Raft server engine.
///
/// The engine exclusively owns its log and node table and performs no I/O:
/// all side effects flow through the host `H`. It is single-threaded and
/// non-blocking; the host serializes calls into it and drives time by
/// calling [`Raft::periodic`] often enough.
pub struct Raft<H: RaftHost> {
    pub(crate) host: H,
    pub(crate) config: Config,
    pub(crate) state: Valid<RaftState>,
    pub(crate) log: Valid<Log>,
    pub(crate) nodes: Vec<Node>,

    /// The local node's id, set by the bootstrap `add_node(.., true)` or
    /// by the host after loading a snapshot.
    pub(crate) node_id: Option<NodeId>,

    /// Watermark guarding against a host clock that jumps backwards.
    last_time: RaftTime,
}

impl<H: RaftHost> Raft<H> {
    /// Create a follower at term 0 with an empty log and an empty node
    /// table, using default timeouts.
    pub fn new(host: H) -> Self {
        Self::with_config(host, Config::default())
    }

    /// Create an engine with explicit timeouts.
    pub fn with_config(mut host: H, config: Config) -> Self {
        let now = host.now();
        let mut raft = Self {
            host,
            config,
            state: Valid::new(RaftState::new(now)),
            log: Valid::new(Log::new()),
            nodes: Vec::new(),
            node_id: None,
            last_time: now,
        };
        raft.randomize_election_timeout();
        raft
    }

    /// Reset to a fresh follower: term 0, no vote, empty log, empty node
    /// table. Timeout settings are kept.
    pub fn clear(&mut self) {
        *self.state = RaftState::new(0);
        self.log.clear();
        self.nodes.clear();
        self.node_id = None;
        self.config.lease_maintenance_grace = 0;
        self.config.first_start = false;
        self.randomize_election_timeout();
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // --- timing -------------------------------------------------------

    /// Read the host clock, clamped to be non-decreasing.
    pub(crate) fn now(&mut self) -> RaftTime {
        let t = self.host.now();
        if t < self.last_time {
            tracing::warn!("host clock moved backwards: {} < {}; clamping", t, self.last_time);
        } else {
            self.last_time = t;
        }
        self.last_time
    }

    /// Resample the election timeout in `[T, 2T)`.
    pub(crate) fn randomize_election_timeout(&mut self) {
        let t = self.config.election_timeout;
        self.state.election_timeout_rand = (t as f64 * (1.0 + self.host.rand())) as RaftTime;
        tracing::debug!("randomize election timeout to {}", self.state.election_timeout_rand);
    }

    pub fn set_election_timeout(&mut self, millis: u64) {
        self.config.election_timeout = millis;
        self.randomize_election_timeout();
    }

    pub fn set_request_timeout(&mut self, millis: u64) {
        self.config.request_timeout = millis;
    }

    pub fn set_lease_maintenance_grace(&mut self, millis: u64) {
        self.config.lease_maintenance_grace = millis;
    }

    /// Declare whether this server runs for the first time in its life.
    /// See [`Config::first_start`].
    pub fn set_first_start(&mut self, first_start: bool) {
        self.config.first_start = first_start;
    }

    // --- term and vote ------------------------------------------------

    /// Raise the current term, persisting it first. A term change resets
    /// the vote. Used both internally and by hosts restoring state.
    pub fn set_current_term(&mut self, term: Term) -> Result<(), RaftError> {
        if self.state.current_term < term {
            self.host.persist_term(term)?;
            self.state.current_term = term;
            self.state.voted_for = None;
        }
        Ok(())
    }

    /// Cast (or restore) this server's vote, persisting it first.
    pub fn vote_for(&mut self, node_id: Option<NodeId>) -> Result<(), RaftError> {
        self.host.persist_vote(node_id)?;
        self.state.voted_for = node_id;
        Ok(())
    }

    /// Re-append an entry from the host's durable log, e.g. while
    /// replaying state on restart. Membership side effects apply as
    /// usual.
    pub fn append_entry(&mut self, ety: Entry) -> Result<(), RaftError> {
        let appended = self.append_entries(std::slice::from_ref(&ety))?;
        if appended != 1 {
            return Err(RaftError::Host(anyerror::AnyError::error("host accepted no entries")));
        }
        Ok(())
    }

    // --- periodic drive ------------------------------------------------

    /// The time-driven step: advances elections, heartbeats, lease checks
    /// and the apply loop. The host must call this often enough for the
    /// configured timeouts to be meaningful.
    pub fn periodic(&mut self) -> Result<(), RaftError> {
        let now = self.now();

        if self.is_leader() {
            if !self.has_majority_leases_at(now, true) {
                // A leader who can't maintain majority leases shall step down.
                tracing::error!("unable to maintain majority leases");
                self.become_follower();
                self.state.leader_id = None;
            } else if self.config.request_timeout <= now - self.state.election_timer {
                let _ = self.send_append_entries_all();
            }
        } else if self.state.election_timeout_rand <= now - self.state.election_timer
            && !self.state.snapshot_in_progress
        {
            // Don't start elections while building a snapshot or bad
            // things will happen when we get a client request.
            let start = match self.my_node() {
                Some(node) => node.is_voting(),
                None => false,
            };
            if start {
                self.election_start()?;
            }
        }

        if self.state.last_applied_idx < self.state.commit_idx && !self.state.snapshot_in_progress {
            self.apply_all()?;
        }

        Ok(())
    }

    // --- apply loop -----------------------------------------------------

    /// Apply everything in `(last_applied, commit]`, in order.
    pub(crate) fn apply_all(&mut self) -> Result<(), RaftError> {
        if self.state.snapshot_in_progress {
            return Ok(());
        }

        while self.state.last_applied_idx < self.state.commit_idx {
            self.apply_entry()?;
        }
        Ok(())
    }

    fn apply_entry(&mut self) -> Result<(), RaftError> {
        let idx = self.state.last_applied_idx + 1;

        let Some(ety) = self.log.entry_at(idx) else {
            tracing::error!("no entry at {} though commit_idx is {}", idx, self.state.commit_idx);
            return Err(RaftError::Shutdown);
        };

        tracing::debug!("applying log: {}, id: {} size: {}", idx, ety.id, ety.data.len());

        self.state.last_applied_idx = idx;
        match self.host.apply_log(ety, idx) {
            Ok(()) => {}
            Err(RaftError::Shutdown) => return Err(RaftError::Shutdown),
            Err(e) => {
                tracing::warn!("apply_log({}) failed: {}; continuing", idx, e);
            }
        }

        // The voting configuration change is now committed.
        if Some(idx) == self.state.voting_cfg_change_log_idx {
            self.state.voting_cfg_change_log_idx = None;
        }
        Ok(())
    }

    // --- commit index ---------------------------------------------------

    /// Advance the commit index. Also used by hosts restoring persisted
    /// state; the commit index is monotone and never exceeds the log.
    pub fn set_commit_idx(&mut self, idx: LogIndex) {
        debug_assert!(self.state.commit_idx <= idx);
        debug_assert!(idx <= self.current_idx());
        self.state.commit_idx = idx;
    }

    // --- queries --------------------------------------------------------

    /// The local node id, once bootstrap assigned one.
    pub fn id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn state(&self) -> ServerState {
        self.state.state
    }

    pub fn is_follower(&self) -> bool {
        self.state.state.is_follower()
    }

    pub fn is_candidate(&self) -> bool {
        self.state.state.is_candidate()
    }

    pub fn is_leader(&self) -> bool {
        self.state.state.is_leader()
    }

    /// Whether the candidate is still in the pre-vote probe phase.
    pub fn is_prevote_candidate(&self) -> bool {
        self.is_candidate() && self.state.prevote
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.state.voted_for
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.state.leader_id
    }

    pub fn commit_idx(&self) -> LogIndex {
        self.state.commit_idx
    }

    pub fn last_applied_idx(&self) -> LogIndex {
        self.state.last_applied_idx
    }

    /// Index of the youngest log entry.
    pub fn current_idx(&self) -> LogIndex {
        self.log.current_idx()
    }

    /// Term of the youngest log entry (or of the snapshot prefix).
    pub fn last_log_term(&self) -> Option<Term> {
        self.log.term_at(self.current_idx())
    }

    pub fn entry_at(&self, idx: LogIndex) -> Option<&Entry> {
        self.log.entry_at(idx)
    }

    /// Contiguous bulk read; see [`Log::entries_from`].
    pub fn entries_from(&self, idx: LogIndex) -> &[Entry] {
        self.log.entries_from(idx)
    }

    /// Term of the entry at `idx`, covering the snapshot base.
    pub fn entry_term(&self, idx: LogIndex) -> Option<Term> {
        self.log.term_at(idx)
    }

    /// Index of the oldest entry still held in the log window.
    pub fn first_entry_idx(&self) -> LogIndex {
        debug_assert!(0 < self.current_idx());
        self.log.base() + 1
    }

    /// How many committed entries a snapshot taken now would cover.
    pub fn num_snapshottable_logs(&self) -> u64 {
        debug_assert!(self.log.base() <= self.state.commit_idx);
        self.state.commit_idx - self.log.base()
    }

    pub fn snapshot_last_idx(&self) -> LogIndex {
        self.state.snapshot_last_idx
    }

    pub fn snapshot_last_term(&self) -> Term {
        self.state.snapshot_last_term
    }

    pub fn snapshot_in_progress(&self) -> bool {
        self.state.snapshot_in_progress
    }

    /// Whether a voting-configuration change is appended but uncommitted.
    pub fn voting_change_in_progress(&self) -> bool {
        self.state.voting_cfg_change_log_idx.is_some()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_voting_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_voting()).count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn my_node(&self) -> Option<&Node> {
        self.node_id.and_then(|id| self.get_node(id))
    }

    pub(crate) fn node_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    pub(crate) fn is_self(&self, id: NodeId) -> bool {
        Some(id) == self.node_id
    }

    /// The fate of an entry submitted earlier via
    /// [`Raft::recv_entry`](crate::Raft::recv_entry).
    pub fn entry_response_committed(&self, r: &EntryResponse) -> EntryStatus {
        let Some(term) = self.log.term_at(r.idx) else {
            return if r.idx <= self.log.base() {
                // The entry has been compacted.
                if r.term == self.state.current_term {
                    // The index is committed in this term, so it must be ours.
                    EntryStatus::Committed
                } else {
                    // Impossible to know for sure.
                    EntryStatus::Invalidated
                }
            } else {
                // The entry is not stored on this replica yet.
                EntryStatus::Pending
            };
        };

        // An entry from another leader has invalidated this one.
        if r.term != term {
            return EntryStatus::Invalidated;
        }
        if r.idx <= self.state.commit_idx {
            EntryStatus::Committed
        } else {
            EntryStatus::Pending
        }
    }
}
