//! A deterministic, I/O-free Raft consensus engine.
//!
//! `sansraft` implements the hard parts of Raft (leader election with
//! pre-vote, log replication, single-step membership change with a
//! non-voting catch-up phase, snapshot-based log compaction, and leader
//! leases for safe handoff and linearizable reads) as a pure state
//! machine. The engine performs no networking, no disk I/O, reads no
//! clock and no random source: every side effect is delegated to a host
//! through the [`RaftHost`] capability trait.
//!
//! The host drives the engine by delivering received messages
//! ([`Raft::recv_append_entries`] and friends), ticking it periodically
//! ([`Raft::periodic`]) and submitting client entries
//! ([`Raft::recv_entry`]). In return the engine invokes host upcalls to
//! send messages, persist state, and apply committed entries. Because all
//! inputs are explicit, a whole cluster can be simulated deterministically
//! in a single thread; see the [`testing`] module.
//!
//! ```
//! use sansraft::testing::MemHost;
//! use sansraft::Raft;
//!
//! let mut raft = Raft::new(MemHost::default());
//! raft.add_node(1, true).unwrap();
//! // A single voting node elects itself as soon as its timeout fires.
//! raft.host_mut().now = 5_000;
//! raft.periodic().unwrap();
//! assert!(raft.is_leader());
//! ```
//!
//! The engine is single-threaded per instance and strictly non-blocking:
//! every call completes before returning, and host upcalls must not
//! re-enter the engine.

#![deny(unused_qualifications)]

mod config;
mod entry;
mod error;
mod host;
mod log;
mod messages;
mod node;
mod raft;
mod raft_types;

pub mod testing;


pub use anyerror;
pub use anyerror::AnyError;

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::entry::Entry;
pub use crate::entry::EntryKind;
pub use crate::error::RaftError;
pub use crate::host::MembershipEvent;
pub use crate::host::RaftHost;
pub use crate::host::SnapshotProgress;
pub use crate::log::Log;
pub use crate::messages::AppendEntries;
pub use crate::messages::AppendEntriesResponse;
pub use crate::messages::EntryResponse;
pub use crate::messages::EntryStatus;
pub use crate::messages::InstallSnapshot;
pub use crate::messages::InstallSnapshotResponse;
pub use crate::messages::RequestVote;
pub use crate::messages::RequestVoteResponse;
pub use crate::messages::VoteGrant;
pub use crate::node::Node;
pub use crate::raft::Raft;
pub use crate::raft_types::EntryId;
pub use crate::raft_types::LogIndex;
pub use crate::raft_types::NodeId;
pub use crate::raft_types::RaftTime;
pub use crate::raft_types::ServerState;
pub use crate::raft_types::Term;
