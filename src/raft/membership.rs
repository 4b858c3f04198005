//! Membership lives in the log: configuration entries take effect when
//! appended and are unwound when truncated.

use crate::entry::Entry;
use crate::entry::EntryKind;
use crate::error::RaftError;
use crate::host::MembershipEvent;
use crate::host::RaftHost;
use crate::node::Node;
use crate::raft::Raft;
use crate::raft_types::LogIndex;
use crate::raft_types::NodeId;

impl<H: RaftHost> Raft<H> {
    /// Bootstrap a voting node before first use.
    ///
    /// After bootstrap, nodes are only added as a side effect of appending
    /// configuration entries (or of replaying a snapshot's membership).
    pub fn add_node(&mut self, id: NodeId, is_self: bool) -> Result<(), RaftError> {
        self.add_node_internal(None, id, is_self, true)
    }

    /// Bootstrap a non-voting node before first use.
    pub fn add_non_voting_node(&mut self, id: NodeId, is_self: bool) -> Result<(), RaftError> {
        self.add_node_internal(None, id, is_self, false)
    }

    /// Forget a node without a configuration entry (bootstrap correction).
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), RaftError> {
        if self.node_index(id).is_none() {
            return Err(RaftError::UnknownNode(id));
        }
        self.remove_node_internal(None, id);
        Ok(())
    }

    pub(crate) fn add_node_internal(
        &mut self,
        ety: Option<&Entry>,
        id: NodeId,
        is_self: bool,
        voting: bool,
    ) -> Result<(), RaftError> {
        // A node may not be added twice.
        if self.node_index(id).is_some() {
            return Err(RaftError::InvalidCfgChange);
        }

        let mut node = Node::new(id, voting);
        if self.is_leader() {
            let now = self.now();
            node.set_effective_time(now);
        }
        self.nodes.push(node);
        if is_self {
            self.node_id = Some(id);
        }

        if let Some(node) = self.nodes.last() {
            self.host.notify_membership_event(node, ety, MembershipEvent::Add);
        }
        Ok(())
    }

    pub(crate) fn remove_node_internal(&mut self, ety: Option<&Entry>, id: NodeId) {
        let Some(i) = self.node_index(id) else {
            debug_assert!(false, "removing unknown node {}", id);
            return;
        };

        self.host.notify_membership_event(&self.nodes[i], ety, MembershipEvent::Remove);
        self.nodes.remove(i);
    }

    /// The submission-time validity matrix for configuration changes.
    ///
    /// A change targeting the leader itself is refused: the entry would be
    /// appended locally and voting nodes counted below without checking
    /// whether we remain one of them.
    pub(crate) fn cfg_change_is_valid(&self, ety: &Entry) -> bool {
        let node_id = self.host.entry_node_id(ety, 0);
        if self.is_self(node_id) {
            return false;
        }

        let node = self.get_node(node_id);
        match ety.kind {
            EntryKind::AddNonvoting | EntryKind::AddVoting => node.is_none(),
            EntryKind::Demote | EntryKind::RemoveVoting => {
                matches!(node, Some(n) if n.is_voting())
            }
            EntryKind::Promote | EntryKind::RemoveNonvoting => {
                matches!(node, Some(n) if !n.is_voting())
            }
            _ => {
                debug_assert!(false, "not a cfg change: {:?}", ety.kind);
                false
            }
        }
    }

    /// Append entries at the tail (offering them to the host) and apply
    /// the membership side effects of the accepted configuration entries.
    pub(crate) fn append_entries(&mut self, entries: &[Entry]) -> Result<usize, RaftError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let first_idx = self.log.current_idx() + 1;

        let cfg_entries: Vec<(u64, Entry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, ety)| ety.is_cfg_change())
            .map(|(k, ety)| (k as u64, ety.clone()))
            .collect();

        let accepted = self.log.append(&mut self.host, entries.to_vec())?;

        for (offset, ety) in cfg_entries.iter() {
            if *offset < accepted as u64 {
                self.offer_cfg_entry(first_idx + offset, ety);
            }
        }

        Ok(accepted)
    }

    /// Truncate the tail from `idx` on and unwind the membership effects
    /// of the removed configuration entries, youngest first.
    pub(crate) fn delete_entries_from(&mut self, idx: LogIndex) -> Result<(), RaftError> {
        debug_assert!(self.state.commit_idx < idx);

        if let Some(pending) = self.state.voting_cfg_change_log_idx {
            if idx <= pending {
                self.state.voting_cfg_change_log_idx = None;
            }
        }

        let removed = self.log.truncate_from(&mut self.host, idx)?;
        for (k, ety) in removed.iter().enumerate().rev() {
            if ety.is_cfg_change() {
                self.pop_cfg_entry(idx + k as u64, ety);
            }
        }
        Ok(())
    }

    fn offer_cfg_entry(&mut self, idx: LogIndex, ety: &Entry) {
        debug_assert!(ety.is_cfg_change());

        if ety.is_voting_cfg_change() {
            self.state.voting_cfg_change_log_idx = Some(idx);
        }

        let node_id = self.host.entry_node_id(ety, idx);
        let node_idx = self.node_index(node_id);
        let is_self = self.is_self(node_id);

        match ety.kind {
            EntryKind::AddNonvoting => {
                debug_assert!(node_idx.is_none());
                if self.add_node_internal(Some(ety), node_id, is_self, false).is_err() {
                    tracing::error!("cannot add node {}: already present", node_id);
                }
            }

            EntryKind::AddVoting => {
                debug_assert!(node_idx.is_none());
                if self.add_node_internal(Some(ety), node_id, is_self, true).is_err() {
                    tracing::error!("cannot add node {}: already present", node_id);
                }
            }

            EntryKind::Promote => match node_idx {
                Some(i) => {
                    debug_assert!(!self.nodes[i].is_voting());
                    self.nodes[i].set_voting(true);
                }
                None => tracing::error!("cannot promote unknown node {}", node_id),
            },

            EntryKind::Demote => match node_idx {
                Some(i) => {
                    debug_assert!(self.nodes[i].is_voting());
                    self.nodes[i].set_voting(false);
                }
                None => tracing::error!("cannot demote unknown node {}", node_id),
            },

            EntryKind::RemoveVoting | EntryKind::RemoveNonvoting => {
                debug_assert!(node_idx.is_some());
                self.remove_node_internal(Some(ety), node_id);
            }

            _ => debug_assert!(false, "not a cfg change: {:?}", ety.kind),
        }
    }

    /// The exact inverse of [`Raft::offer_cfg_entry`], applied while a
    /// conflicting tail is truncated away.
    fn pop_cfg_entry(&mut self, idx: LogIndex, ety: &Entry) {
        debug_assert!(ety.is_cfg_change());

        if let Some(pending) = self.state.voting_cfg_change_log_idx {
            if idx <= pending {
                self.state.voting_cfg_change_log_idx = None;
            }
        }

        let node_id = self.host.entry_node_id(ety, idx);
        let node_idx = self.node_index(node_id);
        let is_self = self.is_self(node_id);

        match ety.kind {
            EntryKind::AddNonvoting | EntryKind::AddVoting => {
                debug_assert!(node_idx.is_some());
                self.remove_node_internal(Some(ety), node_id);
            }

            EntryKind::Promote => match node_idx {
                Some(i) => {
                    debug_assert!(self.nodes[i].is_voting());
                    self.nodes[i].set_voting(false);
                }
                None => tracing::error!("cannot un-promote unknown node {}", node_id),
            },

            EntryKind::Demote => match node_idx {
                Some(i) => {
                    debug_assert!(!self.nodes[i].is_voting());
                    self.nodes[i].set_voting(true);
                }
                None => tracing::error!("cannot un-demote unknown node {}", node_id),
            },

            EntryKind::RemoveVoting => {
                debug_assert!(node_idx.is_none());
                if self.add_node_internal(Some(ety), node_id, is_self, true).is_err() {
                    tracing::error!("cannot re-add node {}: already present", node_id);
                }
            }

            EntryKind::RemoveNonvoting => {
                debug_assert!(node_idx.is_none());
                if self.add_node_internal(Some(ety), node_id, is_self, false).is_err() {
                    tracing::error!("cannot re-add node {}: already present", node_id);
                }
            }

            _ => debug_assert!(false, "not a cfg change: {:?}", ety.kind),
        }
    }
}
