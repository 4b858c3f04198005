//! A deterministic in-process cluster.

use std::collections::BTreeSet;

use crate::config::Config;
use crate::error::RaftError;
use crate::raft::Raft;
use crate::raft_types::NodeId;
use crate::testing::MemHost;

/// A set of engines wired together through their [`MemHost`] outboxes.
///
/// Time only moves via [`Cluster::advance`]; messages only move via
/// [`Cluster::deliver_all`] (a request is handed to its target and the
/// produced response handed back to the sender, until the network is
/// quiet). This makes every scenario a deterministic, single-threaded
/// script.
///
/// Servers are addressed by an explicit routing id, which lets a joining
/// server participate before it has learned its own membership entry.
pub struct Cluster {
    servers: Vec<(NodeId, Raft<MemHost>)>,
    isolated: BTreeSet<NodeId>,
    cut_links: BTreeSet<(NodeId, NodeId)>,
}

impl Cluster {
    /// A cluster of voting members, every server bootstrapped with the
    /// full node set.
    pub fn new(ids: &[NodeId]) -> Self {
        Self::with_config(ids, Config::default())
    }

    pub fn with_config(ids: &[NodeId], config: Config) -> Self {
        let mut servers = Vec::new();
        for &id in ids {
            let mut raft = Raft::with_config(MemHost::new(), config.clone());
            for &peer in ids {
                raft.add_node(peer, peer == id).unwrap();
            }
            servers.push((id, raft));
        }
        Self {
            servers,
            isolated: BTreeSet::new(),
            cut_links: BTreeSet::new(),
        }
    }

    /// Add a server built outside, e.g. an empty joiner that will learn
    /// membership from the log. Its clock is aligned with the cluster
    /// (leases are absolute times and assume comparable clocks). Messages
    /// to ids without a server are dropped.
    pub fn add_server(&mut self, id: NodeId, mut raft: Raft<MemHost>) {
        if let Some((_, first)) = self.servers.first() {
            let now = first.host().now;
            let host = raft.host_mut();
            host.now = host.now.max(now);
        }
        self.servers.push((id, raft));
    }

    pub fn server(&self, id: NodeId) -> &Raft<MemHost> {
        &self.servers.iter().find(|(sid, _)| *sid == id).unwrap().1
    }

    pub fn server_mut(&mut self, id: NodeId) -> &mut Raft<MemHost> {
        &mut self.servers.iter_mut().find(|(sid, _)| *sid == id).unwrap().1
    }

    /// The current leader's id, if exactly one server claims the role.
    pub fn leader_id(&self) -> Option<NodeId> {
        let mut leaders = self.servers.iter().filter(|(_, s)| s.is_leader());
        match (leaders.next(), leaders.next()) {
            (Some((id, _)), None) => Some(*id),
            _ => None,
        }
    }

    /// Move every host clock forward by `ms`.
    pub fn advance(&mut self, ms: u64) {
        for (_, server) in self.servers.iter_mut() {
            server.host_mut().now += ms;
        }
    }

    /// Cut a server off the network in both directions.
    pub fn isolate(&mut self, id: NodeId) {
        self.isolated.insert(id);
    }

    pub fn heal(&mut self, id: NodeId) {
        self.isolated.remove(&id);
    }

    /// Cut the single link between two servers, in both directions.
    pub fn cut_link(&mut self, a: NodeId, b: NodeId) {
        self.cut_links.insert((a.min(b), a.max(b)));
    }

    pub fn restore_link(&mut self, a: NodeId, b: NodeId) {
        self.cut_links.remove(&(a.min(b), a.max(b)));
    }

    /// Run one periodic step on every server, then route all traffic.
    pub fn tick(&mut self) -> Result<(), RaftError> {
        for (_, server) in self.servers.iter_mut() {
            match server.periodic() {
                // A server still covered by a lease simply may not
                // campaign yet.
                Err(RaftError::MightViolateLease) => {}
                other => other?,
            }
        }
        self.deliver_all()
    }

    fn dropped(&self, from: NodeId, to: NodeId) -> bool {
        self.isolated.contains(&from)
            || self.isolated.contains(&to)
            || self.cut_links.contains(&(from.min(to), from.max(to)))
    }

    fn index_of(&self, id: NodeId) -> Option<usize> {
        self.servers.iter().position(|(sid, _)| *sid == id)
    }

    /// Route queued messages and their responses until quiescent.
    pub fn deliver_all(&mut self) -> Result<(), RaftError> {
        loop {
            let mut delivered = false;

            for i in 0..self.servers.len() {
                let from = self.servers[i].0;

                let request_votes = std::mem::take(&mut self.servers[i].1.host_mut().sent_request_votes);
                for (to, rv) in request_votes {
                    let Some(j) = self.index_of(to) else { continue };
                    if self.dropped(from, to) {
                        continue;
                    }
                    delivered = true;
                    let resp = self.servers[j].1.recv_request_vote(&rv)?;
                    if self.dropped(to, from) {
                        continue;
                    }
                    self.servers[i].1.recv_request_vote_response(to, &resp)?;
                }

                let append_entries = std::mem::take(&mut self.servers[i].1.host_mut().sent_append_entries);
                for (to, ae) in append_entries {
                    let Some(j) = self.index_of(to) else { continue };
                    if self.dropped(from, to) {
                        continue;
                    }
                    delivered = true;
                    let resp = self.servers[j].1.recv_append_entries(from, &ae)?;
                    if self.dropped(to, from) {
                        continue;
                    }
                    match self.servers[i].1.recv_append_entries_response(to, &resp) {
                        // The sender may have stepped down while the
                        // response was in flight.
                        Err(RaftError::NotLeader) => {}
                        other => other?,
                    }
                }

                let snapshots = std::mem::take(&mut self.servers[i].1.host_mut().sent_install_snapshots);
                for (to, is) in snapshots {
                    let Some(j) = self.index_of(to) else { continue };
                    if self.dropped(from, to) {
                        continue;
                    }
                    delivered = true;
                    let resp = self.servers[j].1.recv_install_snapshot(from, &is)?;
                    if self.dropped(to, from) {
                        continue;
                    }
                    match self.servers[i].1.recv_install_snapshot_response(to, &resp) {
                        Err(RaftError::NotLeader) => {}
                        other => other?,
                    }
                }
            }

            if !delivered {
                return Ok(());
            }
        }
    }
}
