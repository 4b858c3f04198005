//! Snapshotting: compaction on the leader, wholesale state replacement on
//! a lagging follower.

use crate::error::RaftError;
use crate::host::RaftHost;
use crate::host::SnapshotProgress;
use crate::messages::InstallSnapshot;
use crate::messages::InstallSnapshotResponse;
use crate::raft::Raft;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::Term;

impl<H: RaftHost> Raft<H> {
    /// Start taking a snapshot that will cover everything up to and
    /// including `idx`.
    ///
    /// `idx` must be committed and still inside the log window. Pending
    /// entries are applied first so the state machine reflects the
    /// snapshot point. While the snapshot is in progress the engine
    /// neither applies nor starts elections, and refuses configuration
    /// changes.
    pub fn begin_snapshot(&mut self, idx: LogIndex) -> Result<(), RaftError> {
        if self.state.commit_idx < idx {
            return Err(RaftError::InvalidIndex(idx));
        }

        let Some(term) = self.log.entry_at(idx).map(|ety| ety.term) else {
            return Err(RaftError::InvalidIndex(idx));
        };

        // The state machine needs to be at the commit index.
        self.apply_all()?;
        debug_assert!(self.state.commit_idx == self.state.last_applied_idx);

        self.state.snapshot_last_term = term;
        self.state.snapshot_last_idx = idx;
        self.state.snapshot_in_progress = true;

        tracing::debug!(
            "begin snapshot sli:{} slt:{} slogs:{}",
            self.state.snapshot_last_idx,
            self.state.snapshot_last_term,
            self.num_snapshottable_logs()
        );

        Ok(())
    }

    /// The host finished producing the snapshot: drop the covered log
    /// prefix.
    pub fn end_snapshot(&mut self) -> Result<(), RaftError> {
        if !self.state.snapshot_in_progress || self.state.snapshot_last_idx == 0 {
            return Err(RaftError::SnapshotNotInProgress);
        }

        let upto = self.state.snapshot_last_idx;
        self.log.poll_to(&mut self.host, upto)?;

        self.state.snapshot_in_progress = false;

        tracing::debug!(
            "end snapshot base:{} commit-index:{} current-index:{}",
            self.log.base(),
            self.state.commit_idx,
            self.current_idx()
        );

        Ok(())
    }

    /// Start replacing all local state with a received snapshot.
    ///
    /// The log is reset to a single placeholder at `last_idx`, commit and
    /// applied indices jump there, and the node table empties: the host
    /// repopulates it from the snapshot's membership (with
    /// `add_node`/`add_non_voting_node`) before calling
    /// [`Raft::end_load_snapshot`].
    pub fn begin_load_snapshot(&mut self, last_term: Term, last_idx: LogIndex) -> Result<(), RaftError> {
        if last_idx == 0 {
            return Err(RaftError::InvalidIndex(last_idx));
        }

        if last_term == self.state.snapshot_last_term && last_idx == self.state.snapshot_last_idx {
            return Err(RaftError::SnapshotAlreadyLoaded);
        }

        // Committed entries must already match the snapshot.
        if last_idx <= self.state.commit_idx {
            return Err(RaftError::InvalidIndex(last_idx));
        }

        self.log.load_from_snapshot(&mut self.host, last_idx, last_term)?;

        self.state.commit_idx = last_idx;
        self.state.last_applied_idx = last_idx;
        self.state.snapshot_last_term = last_term;
        self.state.snapshot_last_idx = last_idx;

        // Remove all nodes; membership replays from the snapshot.
        while let Some(id) = self.nodes.last().map(|n| n.id()) {
            self.remove_node_internal(None, id);
        }

        tracing::debug!(
            "loaded snapshot sli:{} slt:{} slogs:{}",
            self.state.snapshot_last_idx,
            self.state.snapshot_last_term,
            self.num_snapshottable_logs()
        );

        Ok(())
    }

    /// Membership replay is done; the repopulated voters are by definition
    /// caught up.
    pub fn end_load_snapshot(&mut self) -> Result<(), RaftError> {
        for node in self.nodes.iter_mut() {
            if node.is_voting() {
                node.set_has_sufficient_logs();
            }
        }
        Ok(())
    }

    pub(crate) fn send_install_snapshot_to(&mut self, i: usize) -> Result<(), RaftError> {
        let req = InstallSnapshot {
            term: self.state.current_term,
            last_idx: self.log.base(),
            last_term: self.log.base_term(),
        };

        tracing::debug!(
            "sending installsnapshot to {}: ci:{} comi:{} t:{} lli:{} llt:{}",
            self.nodes[i].id(),
            self.current_idx(),
            self.state.commit_idx,
            req.term,
            req.last_idx,
            req.last_term
        );

        self.host.send_install_snapshot(&self.nodes[i], &req)
    }

    /// Handle an offered snapshot on a follower.
    ///
    /// If the local log already covers `(last_idx, last_term)` the
    /// response is complete immediately; otherwise the host consumes the
    /// transfer and reports progress.
    pub fn recv_install_snapshot(&mut self, from: NodeId, is: &InstallSnapshot) -> Result<InstallSnapshotResponse, RaftError> {
        let mut resp = InstallSnapshotResponse {
            term: self.state.current_term,
            last_idx: is.last_idx,
            complete: false,
            lease: 0,
        };

        if is.term < self.state.current_term {
            return Ok(resp);
        }

        if self.state.current_term < is.term {
            self.set_current_term(is.term)?;
            resp.term = self.state.current_term;
        }

        if !self.is_follower() {
            self.become_follower();
        }

        self.state.leader_id = Some(from);
        let now = self.now();
        self.state.election_timer = now;
        resp.lease = now + self.config.election_timeout;

        if is.last_idx <= self.state.commit_idx {
            // Committed entries must match the snapshot; nothing to do.
            resp.complete = true;
            return Ok(resp);
        }

        if self.log.term_at(is.last_idx) == Some(is.last_term) {
            // The log covers the snapshot already; just advance commit.
            self.set_commit_idx(is.last_idx);
            resp.complete = true;
            return Ok(resp);
        }

        let Some(i) = self.node_index(from) else {
            return Err(RaftError::UnknownNode(from));
        };
        let progress = self.host.recv_install_snapshot(&self.nodes[i], is, &mut resp)?;
        if progress == SnapshotProgress::Complete {
            resp.complete = true;
        }

        Ok(resp)
    }

    /// Handle a snapshot response on the leader: refresh the lease and,
    /// once complete, jump the peer past the snapshot.
    pub fn recv_install_snapshot_response(&mut self, from: NodeId, r: &InstallSnapshotResponse) -> Result<(), RaftError> {
        let Some(i) = self.node_index(from) else {
            return Err(RaftError::UnknownNode(from));
        };

        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }

        if self.state.current_term < r.term {
            self.set_current_term(r.term)?;
            self.become_follower();
            self.state.leader_id = None;
            return Ok(());
        }
        if self.state.current_term != r.term {
            return Ok(());
        }

        self.nodes[i].set_lease(r.lease);

        self.host.recv_install_snapshot_response(&self.nodes[i], r)?;

        // The installation is complete; update the peer's state.
        if r.complete && self.nodes[i].match_idx() < r.last_idx {
            self.nodes[i].set_match_idx(r.last_idx);
            self.nodes[i].set_next_idx(r.last_idx + 1);
        }

        if self.nodes[i].next_idx() <= self.current_idx() {
            let _ = self.send_append_entries_to(i);
        }

        Ok(())
    }
}
