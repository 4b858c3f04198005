//! Test support: an in-memory host and a deterministic cluster simulator.
//!
//! Because the engine performs no I/O of its own, an entire cluster can be
//! driven from a single thread with a hand-cranked clock: [`MemHost`]
//! records every side effect the engine requests, and [`Cluster`] routes
//! the recorded messages between engines until the network is quiet.
//! Nothing here is durable; it exists to make protocol behavior
//! observable and reproducible.

mod cluster;
mod mem_host;

pub use cluster::Cluster;
pub use mem_host::MemHost;

use crate::entry::Entry;
use crate::entry::EntryKind;
use crate::messages::RequestVoteResponse;
use crate::messages::VoteGrant;
use crate::raft::Raft;
use crate::raft_types::EntryId;
use crate::raft_types::NodeId;

/// A `Normal` entry with the given id and payload.
pub fn entry(id: EntryId, data: &[u8]) -> Entry {
    Entry::new(id, data.to_vec())
}

/// A configuration entry targeting `node_id`, encoded the way
/// [`MemHost::entry_node_id`](crate::RaftHost::entry_node_id) expects.
pub fn cfg_entry(id: EntryId, kind: EntryKind, node_id: NodeId) -> Entry {
    Entry {
        term: 0,
        id,
        kind,
        data: MemHost::encode_node_id(node_id),
    }
}

/// Drive a freshly bootstrapped server through a full election by feeding
/// it grants from every peer, and hand back the new leader with empty
/// outboxes.
pub fn make_leader(ids: &[NodeId], self_id: NodeId) -> Raft<MemHost> {
    let mut raft = Raft::new(MemHost::new());
    for &id in ids {
        raft.add_node(id, id == self_id).unwrap();
    }
    raft.set_first_start(true);
    raft.host_mut().now = 2000;
    raft.periodic().unwrap();
    assert!(raft.is_candidate() || raft.is_leader());

    for prevote in [true, false] {
        for &id in ids {
            if id == self_id {
                continue;
            }
            let resp = RequestVoteResponse {
                term: raft.current_term(),
                vote_granted: VoteGrant::Granted,
                prevote,
            };
            raft.recv_request_vote_response(id, &resp).unwrap();
        }
    }
    assert!(raft.is_leader());

    raft.host_mut().sent_request_votes.clear();
    raft.host_mut().sent_append_entries.clear();
    raft
}
