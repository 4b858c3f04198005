//! A single-voter cluster: elections and commits without any peers.

use pretty_assertions::assert_eq;
use sansraft::testing::entry;
use sansraft::testing::MemHost;
use sansraft::EntryStatus;
use sansraft::Raft;
use sansraft::RaftError;

#[test]
fn test_single_node_becomes_leader_and_commits_alone() -> anyhow::Result<()> {
    let mut raft = Raft::new(MemHost::new());
    raft.add_node(1, true)?;

    tracing::info!("--- the first timeout elects the only voter");
    raft.host_mut().now = 1000;
    raft.periodic()?;
    assert!(raft.is_leader());
    assert_eq!(1, raft.current_term());
    assert_eq!(Some(1), raft.voted_for());
    assert_eq!(Some(1), raft.host().voted_for);

    tracing::info!("--- an entry commits the moment it is appended");
    let resp = raft.recv_entry(entry(7, b"cmd"))?;
    assert_eq!(1, resp.idx);
    assert_eq!(1, raft.commit_idx());
    assert_eq!(EntryStatus::Committed, raft.entry_response_committed(&resp));

    tracing::info!("--- the apply loop runs on the next periodic");
    raft.periodic()?;
    assert_eq!(1, raft.last_applied_idx());
    assert_eq!(vec![1], raft.host().applied_indices());

    tracing::info!("--- a lone leader always holds its own lease");
    assert_eq!(true, raft.has_majority_leases());
    Ok(())
}

#[test]
fn test_submitting_to_a_follower_is_refused() {
    let mut raft = Raft::new(MemHost::new());
    raft.add_node(1, true).unwrap();

    let err = raft.recv_entry(entry(1, b"cmd")).unwrap_err();
    assert_eq!(RaftError::NotLeader, err);
}

#[test]
fn test_restart_recovers_persisted_state() -> anyhow::Result<()> {
    tracing::info!("--- first life: elect and commit two entries");
    let mut raft = Raft::new(MemHost::new());
    raft.add_node(1, true)?;
    raft.host_mut().now = 1000;
    raft.periodic()?;
    raft.recv_entry(entry(1, b"a"))?;
    raft.recv_entry(entry(2, b"b"))?;
    raft.periodic()?;
    let host = raft.host().clone();

    tracing::info!("--- second life: the host replays what it persisted");
    let mut restarted = Raft::new(MemHost::new());
    restarted.add_node(1, true)?;
    restarted.set_current_term(host.term)?;
    restarted.vote_for(host.voted_for)?;
    let entries: Vec<_> = host.log.iter().map(|(_, ety)| ety.clone()).collect();
    for ety in entries {
        restarted.append_entry(ety)?;
    }
    restarted.set_commit_idx(2);

    assert_eq!(host.term, restarted.current_term());
    assert_eq!(2, restarted.current_idx());

    tracing::info!("--- the restarted server applies the committed suffix");
    restarted.periodic()?;
    assert_eq!(vec![1, 2], restarted.host().applied_indices());
    Ok(())
}
