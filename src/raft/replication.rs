//! Log replication: AppendEntries on both sides, and client submission.

use anyerror::AnyError;

use crate::entry::Entry;
use crate::error::RaftError;
use crate::host::RaftHost;
use crate::messages::AppendEntries;
use crate::messages::AppendEntriesResponse;
use crate::messages::EntryResponse;
use crate::raft::Raft;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;
use crate::raft_types::RaftTime;

impl<H: RaftHost> Raft<H> {
    /// Send the entries from the peer's `next_idx` on, or an
    /// InstallSnapshot if they were already compacted away.
    pub(crate) fn send_append_entries_to(&mut self, i: usize) -> Result<(), RaftError> {
        debug_assert!(!self.is_self(self.nodes[i].id()));

        let next_idx = self.nodes[i].next_idx();
        if next_idx <= self.log.base() {
            return self.send_install_snapshot_to(i);
        }

        let entries = self.log.entries_from(next_idx).to_vec();
        let prev_log_idx = next_idx - 1;
        let Some(prev_log_term) = self.log.term_at(prev_log_idx) else {
            tracing::error!("no term known for prev_log_idx {}", prev_log_idx);
            return Err(RaftError::Shutdown);
        };

        let req = AppendEntries {
            term: self.state.current_term,
            leader_commit: self.state.commit_idx,
            prev_log_idx,
            prev_log_term,
            entries,
        };

        tracing::debug!("sending appendentries to {}: ci:{} {}", self.nodes[i].id(), self.current_idx(), req);

        self.host.send_append_entries(&self.nodes[i], &req)
    }

    /// Heartbeat/replicate to every peer; resets the heartbeat anchor.
    pub(crate) fn send_append_entries_all(&mut self) -> Result<(), RaftError> {
        self.state.election_timer = self.now();
        for i in 0..self.nodes.len() {
            if self.is_self(self.nodes[i].id()) {
                continue;
            }
            self.send_append_entries_to(i)?;
        }
        Ok(())
    }

    fn ae_response(
        &self,
        success: bool,
        current_idx: LogIndex,
        first_idx: LogIndex,
        lease: RaftTime,
    ) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.state.current_term,
            success,
            current_idx: if success { current_idx } else { self.current_idx() },
            first_idx,
            lease,
        }
    }

    /// Handle an AppendEntries from the server claiming leadership,
    /// producing the response the host sends back.
    ///
    /// On a match-check failure the response carries this server's current
    /// index so the leader can backtrack in one step. A conflict at or
    /// below the commit index is fatal ([`RaftError::Shutdown`]).
    pub fn recv_append_entries(&mut self, from: NodeId, ae: &AppendEntries) -> Result<AppendEntriesResponse, RaftError> {
        if 0 < ae.n_entries() {
            tracing::debug!("recvd appendentries from {} ci:{} {}", from, self.current_idx(), ae);
        }

        let first_idx = ae.prev_log_idx + 1;

        if self.is_candidate() && self.state.current_term == ae.term {
            self.become_follower();
        } else if self.state.current_term < ae.term {
            self.set_current_term(ae.term)?;
            self.become_follower();
        } else if ae.term < self.state.current_term {
            // 1. Reply false if term < currentTerm (§5.1)
            tracing::debug!("AE term {} is less than current term {}", ae.term, self.state.current_term);
            return Ok(self.ae_response(false, 0, first_idx, 0));
        }

        // The sender's term is up to date: it is the current leader.
        self.state.leader_id = Some(from);
        let now = self.now();
        self.state.election_timer = now;
        let lease = now + self.config.election_timeout;

        // NOTE: the log starts at 1.
        if 0 < ae.prev_log_idx {
            match self.log.term_at(ae.prev_log_idx) {
                None => {
                    if self.current_idx() < ae.prev_log_idx {
                        // 2. Reply false if log doesn't contain an entry at
                        //    prevLogIndex whose term matches prevLogTerm (§5.3)
                        tracing::debug!("AE no log at prev_idx {}", ae.prev_log_idx);
                        return Ok(self.ae_response(false, 0, first_idx, lease));
                    }
                    // Otherwise prev_log_idx sits in the compacted prefix:
                    // committed, so it matches by definition.
                }
                Some(term) if term != ae.prev_log_term => {
                    tracing::debug!(
                        "AE term doesn't match prev_term (ie. {} vs {}) ci:{} comi:{} lcomi:{} pli:{}",
                        term,
                        ae.prev_log_term,
                        self.current_idx(),
                        self.state.commit_idx,
                        ae.leader_commit,
                        ae.prev_log_idx
                    );
                    if ae.prev_log_idx <= self.state.commit_idx {
                        // Should never happen; something is seriously wrong.
                        tracing::error!("AE prev conflicts with committed entry pli:{}", ae.prev_log_idx);
                        return Err(RaftError::Shutdown);
                    }
                    // Delete all the following entries: they don't match.
                    self.delete_entries_from(ae.prev_log_idx)?;
                    return Ok(self.ae_response(false, 0, first_idx, lease));
                }
                Some(_) => {}
            }
        }

        let mut current_idx = ae.prev_log_idx;

        // 3. If an existing entry conflicts with a new one (same index but
        //    different terms), delete the existing entry and all that
        //    follow it (§5.3)
        let n = ae.entries.len();
        let mut i = 0;
        while i < n {
            let ety_idx = ae.prev_log_idx + 1 + i as u64;
            match self.log.term_at(ety_idx) {
                Some(term) if term != ae.entries[i].term => {
                    if ety_idx <= self.state.commit_idx {
                        // Should never happen; something is seriously wrong.
                        tracing::error!("AE entry conflicts with committed entry idx:{}", ety_idx);
                        return Err(RaftError::Shutdown);
                    }
                    self.delete_entries_from(ety_idx)?;
                    break;
                }
                None if self.current_idx() < ety_idx => break,
                _ => {
                    current_idx = ety_idx;
                    i += 1;
                }
            }
        }

        // 4. Append any new entries not already in the log
        let appended = self.append_entries(&ae.entries[i..])?;
        current_idx = ae.prev_log_idx + i as u64 + appended as u64;

        // 5. If leaderCommit > commitIndex, set commitIndex =
        //    min(leaderCommit, index of last new entry)
        if self.state.commit_idx < ae.leader_commit {
            let new_commit_idx = ae.leader_commit.min(current_idx);
            if self.state.commit_idx < new_commit_idx {
                self.set_commit_idx(new_commit_idx);
            }
        }

        Ok(self.ae_response(true, current_idx, first_idx, lease))
    }

    /// Handle an AppendEntries response on the leader: advance or
    /// backtrack the peer, refresh its lease, and move the commit index
    /// when a majority of voters caught up within the current term.
    pub fn recv_append_entries_response(&mut self, from: NodeId, r: &AppendEntriesResponse) -> Result<(), RaftError> {
        tracing::debug!(
            "received appendentries response from {} {} ci:{} rci:{} 1stidx:{} ls:{}",
            from,
            if r.success { "SUCCESS" } else { "fail" },
            self.current_idx(),
            r.current_idx,
            r.first_idx,
            r.lease
        );

        let Some(i) = self.node_index(from) else {
            return Err(RaftError::UnknownNode(from));
        };

        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }

        // If response contains term T > currentTerm: set currentTerm = T
        // and convert to follower (§5.3)
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

        let match_idx = self.nodes[i].match_idx();

        if !r.success {
            // If AppendEntries fails because of log inconsistency:
            // decrement nextIndex and retry (§5.3)
            let next_idx = self.nodes[i].next_idx();
            debug_assert!(0 < next_idx);
            debug_assert!(match_idx <= next_idx - 1);
            if match_idx == next_idx - 1 {
                // Stale response.
                return Ok(());
            }
            let new_next = if r.current_idx < next_idx - 1 {
                (r.current_idx + 1).min(self.current_idx())
            } else {
                next_idx - 1
            };
            self.nodes[i].set_next_idx(new_next);

            let _ = self.send_append_entries_to(i);
            return Ok(());
        }

        // A non-voting node within one entry of the tail has sufficient
        // logs for promotion; report it exactly once.
        if !self.nodes[i].is_voting()
            && !self.voting_change_in_progress()
            && self.current_idx() <= r.current_idx + 1
            && !self.nodes[i].has_sufficient_logs()
        {
            if self.host.node_has_sufficient_logs(&self.nodes[i]).is_ok() {
                self.nodes[i].set_has_sufficient_logs();
            }
        }

        if r.current_idx <= match_idx {
            return Ok(());
        }

        debug_assert!(r.current_idx <= self.current_idx());

        self.nodes[i].set_next_idx(r.current_idx + 1);
        self.nodes[i].set_match_idx(r.current_idx);

        // Update the commit index: the entry must be replicated on a
        // majority of voters and stem from the current term (§5.4.2).
        let point = r.current_idx;
        if point != 0 && self.state.commit_idx < point && self.log.term_at(point) == Some(self.state.current_term) {
            let mut votes = 1;
            for node in self.nodes.iter() {
                if !self.is_self(node.id()) && node.is_voting() && point <= node.match_idx() {
                    votes += 1;
                }
            }

            if self.num_voting_nodes() / 2 < votes {
                self.set_commit_idx(point);
            }
        }

        // Aggressively send remaining entries.
        if self.nodes[i].next_idx() <= self.current_idx() {
            let _ = self.send_append_entries_to(i);
        }

        // periodic() applies committed entries lazily.
        Ok(())
    }

    /// Submit a client entry on the leader.
    ///
    /// The engine assigns the current term, appends, replicates to
    /// caught-up voters, and returns where the entry landed. Configuration
    /// changes are validated first; see the error kinds.
    pub fn recv_entry(&mut self, mut ety: Entry) -> Result<EntryResponse, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }

        if ety.is_cfg_change() {
            // The host might be snapshotting membership settings.
            if self.state.snapshot_in_progress {
                return Err(RaftError::SnapshotInProgress);
            }

            // Only one voting change at a time.
            if ety.is_voting_cfg_change() && self.voting_change_in_progress() {
                return Err(RaftError::OneVotingChangeOnly);
            }

            if !self.cfg_change_is_valid(&ety) {
                return Err(RaftError::InvalidCfgChange);
            }
        }

        tracing::debug!(
            "received entry t:{} id:{} idx:{}",
            self.state.current_term,
            ety.id,
            self.current_idx() + 1
        );

        ety.term = self.state.current_term;
        let id = ety.id;
        let is_voting_change = ety.is_voting_cfg_change();

        let appended = self.append_entries(std::slice::from_ref(&ety))?;
        if appended != 1 {
            return Err(RaftError::Host(AnyError::error("host accepted no entries")));
        }

        for i in 0..self.nodes.len() {
            if self.is_self(self.nodes[i].id()) || !self.nodes[i].is_voting() {
                continue;
            }

            // Only send to peers that were fully caught up; the ones that
            // are behind would only get congested.
            if self.nodes[i].next_idx() == self.current_idx() {
                let _ = self.send_append_entries_to(i);
            }
        }

        // If we're the only voting node, the entry is committed at once.
        if self.num_voting_nodes() == 1 {
            self.set_commit_idx(self.current_idx());
        }

        let resp = EntryResponse {
            id,
            term: self.state.current_term,
            idx: self.current_idx(),
        };

        if is_voting_change {
            self.state.voting_cfg_change_log_idx = Some(self.current_idx());
        }

        Ok(resp)
    }
}
