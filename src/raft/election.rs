//! Leader election: pre-vote, real vote, and the lease guard.

use crate::error::RaftError;
use crate::host::RaftHost;
use crate::messages::RequestVote;
use crate::messages::RequestVoteResponse;
use crate::messages::VoteGrant;
use crate::node::Node;
use crate::raft::Raft;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;
use crate::raft_types::ServerState;

/// `nvotes` out of `num_nodes` voters is a majority.
pub(crate) fn votes_is_majority(num_nodes: usize, nvotes: usize) -> bool {
    if num_nodes < nvotes {
        return false;
    }
    num_nodes / 2 + 1 <= nvotes
}

impl<H: RaftHost> Raft<H> {
    /// Might we have granted a lease, still unexpired, to someone other
    /// than `except_id`?
    ///
    /// Covers the unknown period right after a restart: unless this is the
    /// first start of this server's life, an earlier incarnation may have
    /// granted a lease we no longer remember.
    pub(crate) fn lease_granted(&self, except_id: Option<NodeId>, now: RaftTime) -> bool {
        if !self.config.first_start && now - self.state.start_time < self.config.election_timeout {
            return true;
        }

        if let Some(leader_id) = self.state.leader_id {
            if Some(leader_id) != except_id && now - self.state.election_timer < self.config.election_timeout {
                return true;
            }
        }

        false
    }

    pub(crate) fn election_start(&mut self) -> Result<(), RaftError> {
        tracing::info!(
            "election starting: {} {}, term: {} ci: {}",
            self.state.election_timeout_rand,
            self.state.election_timer,
            self.state.current_term,
            self.current_idx()
        );

        self.become_candidate()
    }

    /// Enter the pre-vote candidate phase and probe the voters.
    ///
    /// Refused with [`RaftError::MightViolateLease`] while a lease to the
    /// current leader (or an unknown pre-restart lease) may still be
    /// outstanding.
    pub(crate) fn become_candidate(&mut self) -> Result<(), RaftError> {
        let now = self.now();

        if self.lease_granted(self.node_id, now) {
            return Err(RaftError::MightViolateLease);
        }

        tracing::info!("becoming candidate");

        self.state.state = ServerState::Candidate;
        self.state.prevote = true;

        for node in self.nodes.iter_mut() {
            node.set_voted_for_me(false);
        }
        if let Some(i) = self.node_id.and_then(|id| self.node_index(id)) {
            self.nodes[i].set_voted_for_me(true);
        }

        self.state.leader_id = None;
        self.randomize_election_timeout();
        self.state.election_timer = now;

        self.send_request_vote_all();

        // We've already got at least one prevote from ourself, which is
        // enough if we are the only voting node.
        self.count_votes()
    }

    /// The pre-vote round succeeded: consume a term, vote for ourself, and
    /// ask for real votes.
    pub(crate) fn become_prevoted_candidate(&mut self) -> Result<(), RaftError> {
        tracing::info!("becoming prevoted candidate");

        self.set_current_term(self.state.current_term + 1)?;
        for node in self.nodes.iter_mut() {
            node.set_voted_for_me(false);
        }
        self.vote_for(self.node_id)?;
        if let Some(i) = self.node_id.and_then(|id| self.node_index(id)) {
            self.nodes[i].set_voted_for_me(true);
        }
        self.state.prevote = false;

        self.send_request_vote_all();

        // We've already got at least one vote from ourself, which is
        // enough if we are the only voting node.
        self.count_votes()
    }

    pub(crate) fn become_leader(&mut self) {
        tracing::info!("becoming leader term:{}", self.state.current_term);

        self.state.state = ServerState::Leader;
        let now = self.now();
        self.state.election_timer = now;
        for i in 0..self.nodes.len() {
            if self.is_self(self.nodes[i].id()) {
                continue;
            }

            let next_idx = self.current_idx() + 1;
            let node = &mut self.nodes[i];
            node.set_next_idx(next_idx);
            node.set_match_idx(0);
            node.set_effective_time(now);
            if let Err(e) = self.send_append_entries_to(i) {
                tracing::warn!("failed to send appendentries: {}", e);
            }
        }
    }

    pub(crate) fn become_follower(&mut self) {
        tracing::info!("becoming follower");
        self.state.state = ServerState::Follower;
        self.randomize_election_timeout();
        self.state.election_timer = self.now();
    }

    fn send_request_vote_all(&mut self) {
        for i in 0..self.nodes.len() {
            if self.is_self(self.nodes[i].id()) || !self.nodes[i].is_voting() {
                continue;
            }
            if let Err(e) = self.send_request_vote_to(i) {
                tracing::warn!("failed to send requestvote: {}", e);
            }
        }
    }

    fn send_request_vote_to(&mut self, i: usize) -> Result<(), RaftError> {
        debug_assert!(self.node_id.is_some());
        debug_assert!(!self.is_self(self.nodes[i].id()));

        tracing::info!(
            "sending requestvote{} to: {}",
            if self.state.prevote { " (prevote)" } else { "" },
            self.nodes[i].id()
        );

        let req = RequestVote {
            term: self.state.current_term,
            candidate_id: self.node_id.unwrap_or_default(),
            last_log_idx: self.current_idx(),
            last_log_term: self.last_log_term().unwrap_or_default(),
            prevote: self.state.prevote,
        };
        self.host.send_request_vote(&self.nodes[i], &req)
    }

    fn nvotes_for_me(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_voting() && n.voted_for_me()).count()
    }

    /// Check the tally and advance the candidate phase or take leadership.
    pub(crate) fn count_votes(&mut self) -> Result<(), RaftError> {
        let votes = self.nvotes_for_me();
        if votes_is_majority(self.num_voting_nodes(), votes) {
            if self.state.prevote {
                self.become_prevoted_candidate()?;
            } else {
                self.become_leader();
            }
        }
        Ok(())
    }

    // --- vote granting --------------------------------------------------

    fn should_grant_vote(&self, vr: &RequestVote) -> bool {
        // For a prevote, we could theoretically proceed to the voted_for
        // check below, if vr.term == current_term - 1. That, however,
        // would only matter if we had rejected a previous RequestVote from
        // a third server, who must have already won a prevote phase.
        // Hence, we choose not to look into voted_for for simplicity.
        if vr.term < self.state.current_term {
            tracing::info!(
                "rejected requestvote{} for {}: stale term: {} < {}",
                if vr.prevote { " (prevote)" } else { "" },
                vr.candidate_id,
                vr.term,
                self.state.current_term
            );
            return false;
        }

        if !vr.prevote && self.state.voted_for.is_some() && self.state.voted_for != Some(vr.candidate_id) {
            tracing::info!(
                "rejected requestvote{} for {}: voted for {:?}",
                if vr.prevote { " (prevote)" } else { "" },
                vr.candidate_id,
                self.state.voted_for
            );
            return false;
        }

        // Below we check if the candidate's log is at least as up-to-date.

        let current_idx = self.current_idx();
        let term = self.last_log_term().unwrap_or_default();

        if term < vr.last_log_term {
            return true;
        }
        if vr.last_log_term == term && current_idx <= vr.last_log_idx {
            return true;
        }

        tracing::info!(
            "rejected requestvote{} for {}: stale log: ({}, {}) < ({}, {})",
            if vr.prevote { " (prevote)" } else { "" },
            vr.candidate_id,
            vr.last_log_term,
            vr.last_log_idx,
            term,
            current_idx
        );
        false
    }

    /// Handle a RequestVote from a candidate, producing the response the
    /// host sends back.
    ///
    /// A real-vote grant is durable (via [`RaftHost::persist_vote`])
    /// before this returns; a pre-vote grant persists nothing.
    pub fn recv_request_vote(&mut self, vr: &RequestVote) -> Result<RequestVoteResponse, RaftError> {
        let now = self.now();

        // Reject if we are the leader, or if we might have granted a lease
        // that hasn't expired to someone other than the candidate.
        if self.is_leader() || self.lease_granted(Some(vr.candidate_id), now) {
            tracing::info!(
                "rejected requestvote{} for {}: might violate lease",
                if vr.prevote { " (prevote)" } else { "" },
                vr.candidate_id
            );
            return Ok(self.vote_response(VoteGrant::NotGranted, vr));
        }

        if self.state.current_term < vr.term {
            self.set_current_term(vr.term)?;
            self.become_follower();
            self.state.leader_id = None;
        }

        let known = self.get_node(vr.candidate_id).is_some();
        let granted = if self.should_grant_vote(vr) {
            // A leader or prevoted candidate would have voted for itself
            // and cannot reach this point; a candidate may still grant a
            // prevote.
            debug_assert!(!self.is_leader());
            debug_assert!(!self.is_candidate() || self.state.prevote || vr.prevote);

            if !vr.prevote {
                self.vote_for(Some(vr.candidate_id))?;

                // There must be an election going on.
                self.state.leader_id = None;
                self.state.election_timer = now;
            }
            VoteGrant::Granted
        } else if !known {
            // The candidate may have been removed from the cluster and not
            // know it yet; this response tells it so.
            VoteGrant::UnknownNode
        } else {
            VoteGrant::NotGranted
        };

        if matches!(granted, VoteGrant::Granted) {
            tracing::info!(
                "granted requestvote{} for {}",
                if vr.prevote { " (prevote)" } else { "" },
                vr.candidate_id
            );
        }

        Ok(self.vote_response(granted, vr))
    }

    fn vote_response(&self, granted: VoteGrant, vr: &RequestVote) -> RequestVoteResponse {
        RequestVoteResponse {
            term: self.state.current_term,
            vote_granted: granted,
            prevote: vr.prevote,
        }
    }

    /// Handle a vote response on the candidate. Responses from a different
    /// phase (pre-vote vs real) or a different term are ignored.
    pub fn recv_request_vote_response(&mut self, from: NodeId, r: &RequestVoteResponse) -> Result<(), RaftError> {
        tracing::info!(
            "node {} responded to requestvote{} status:{:?} ct:{} rt:{}",
            from,
            if r.prevote { " (prevote)" } else { "" },
            r.vote_granted,
            self.state.current_term,
            r.term
        );

        if !self.is_candidate() || self.state.prevote != r.prevote {
            return Ok(());
        }

        if self.state.current_term < r.term {
            self.set_current_term(r.term)?;
            self.become_follower();
            self.state.leader_id = None;
            return Ok(());
        }
        if self.state.current_term != r.term {
            // The node who voted for us would have obtained our term.
            // Therefore this is an old message we should ignore: it
            // happens when the network is pretty choppy.
            return Ok(());
        }

        match r.vote_granted {
            VoteGrant::Granted => {
                if let Some(i) = self.node_index(from) {
                    self.nodes[i].set_voted_for_me(true);
                }
                self.count_votes()
            }
            VoteGrant::NotGranted => Ok(()),
            VoteGrant::UnknownNode => Ok(()),
        }
    }

    // --- leases ---------------------------------------------------------

    fn has_lease(&self, node: &Node, now: RaftTime, with_grace: bool) -> bool {
        if self.is_self(node.id()) {
            return true;
        }

        if with_grace {
            if now < node.lease() + self.config.lease_maintenance_grace {
                return true;
            }
            // A leader has no lease from a node at the beginning of its
            // term, or from a node it just added; give it some time to
            // acquire the initial one.
            if now - node.effective_time() < self.config.election_timeout + self.config.lease_maintenance_grace {
                return true;
            }
        } else if now < node.lease() {
            return true;
        }

        false
    }

    pub(crate) fn has_majority_leases_at(&self, now: RaftTime, with_grace: bool) -> bool {
        debug_assert!(self.is_leader());

        let mut n = 0;
        let mut n_voting = 0;
        for node in self.nodes.iter() {
            if node.is_voting() {
                n_voting += 1;
                if self.has_lease(node, now, with_grace) {
                    n += 1;
                }
            }
        }

        n_voting / 2 + 1 <= n
    }

    /// Whether this leader currently holds leases from a majority of
    /// voters, judged without grace, i.e. whether it may serve a
    /// linearizable read right now.
    pub fn has_majority_leases(&mut self) -> bool {
        if !self.is_leader() {
            return false;
        }

        let now = self.now();
        self.has_majority_leases_at(now, false)
    }
}
