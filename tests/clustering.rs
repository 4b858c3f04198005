//! End-to-end election and replication scenarios on a simulated cluster.

use pretty_assertions::assert_eq;
use sansraft::testing::entry;
use sansraft::testing::Cluster;
use sansraft::EntryStatus;
use sansraft::RaftError;

/// Let server `id` hit its election timeout and win.
fn elect(cluster: &mut Cluster, id: u64) -> Result<(), RaftError> {
    cluster.advance(2100);
    cluster.server_mut(id).periodic()?;
    cluster.deliver_all()?;
    assert_eq!(Some(id), cluster.leader_id());
    Ok(())
}

#[test]
fn test_three_node_election() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1, 2, 3]);

    tracing::info!("--- at t=500 nobody has timed out");
    cluster.advance(500);
    cluster.tick()?;
    for id in [1, 2, 3] {
        assert!(cluster.server(id).is_follower());
        assert_eq!(0, cluster.server(id).current_term());
    }

    tracing::info!("--- at t=2100 node 1 times out, probes, and wins");
    cluster.advance(1600);
    cluster.server_mut(1).periodic()?;
    cluster.deliver_all()?;

    assert_eq!(Some(1), cluster.leader_id());
    assert_eq!(Some(1), cluster.server(1).voted_for());
    for id in [1, 2, 3] {
        assert_eq!(1, cluster.server(id).current_term());
        assert_eq!(Some(1), cluster.server(id).leader_id());
    }

    tracing::info!("--- heartbeats keep flowing afterwards");
    cluster.advance(300);
    cluster.tick()?;
    assert_eq!(Some(1), cluster.leader_id());
    Ok(())
}

#[test]
fn test_log_replication() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    elect(&mut cluster, 1)?;

    let resp = cluster.server_mut(1).recv_entry(entry(42, b"cmd"))?;
    assert_eq!(1, resp.idx);
    assert_eq!(1, resp.term);
    assert_eq!(42, resp.id);

    tracing::info!("--- follower acks advance the commit index");
    cluster.deliver_all()?;
    assert_eq!(1, cluster.server(1).commit_idx());
    assert_eq!(EntryStatus::Committed, cluster.server(1).entry_response_committed(&resp));

    tracing::info!("--- the next heartbeat spreads the commit; applies are lazy");
    cluster.advance(300);
    cluster.tick()?;
    cluster.tick()?;
    for id in [1, 2, 3] {
        assert_eq!(1, cluster.server(id).commit_idx());
        assert_eq!(1, cluster.server(id).last_applied_idx());
        assert_eq!(vec![1], cluster.server(id).host().applied_indices());
        assert_eq!(Some(42), cluster.server(id).entry_at(1).map(|e| e.id));
    }
    Ok(())
}

#[test]
fn test_leader_failure_and_recovery() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    elect(&mut cluster, 1)?;

    cluster.server_mut(1).recv_entry(entry(42, b"cmd"))?;
    cluster.deliver_all()?;
    assert_eq!(1, cluster.server(1).commit_idx());

    tracing::info!("--- the leader is cut off with an unreplicated entry");
    cluster.isolate(1);
    let stale = cluster.server_mut(1).recv_entry(entry(43, b"lost"))?;
    cluster.deliver_all()?;
    assert_eq!(2, cluster.server(1).current_idx());

    tracing::info!("--- node 2 hears nothing for 2500ms and takes over in term 2");
    cluster.advance(2500);
    cluster.server_mut(2).periodic()?;
    cluster.deliver_all()?;
    assert!(cluster.server(2).is_leader());
    assert_eq!(2, cluster.server(2).current_term());

    tracing::info!("--- node 1 rejoins: steps down and truncates the conflict");
    cluster.heal(1);
    let fresh = cluster.server_mut(2).recv_entry(entry(44, b"new"))?;
    cluster.deliver_all()?;

    assert!(cluster.server(1).is_follower());
    assert_eq!(2, cluster.server(1).current_term());
    assert_eq!(None, cluster.server(1).voted_for());
    assert_eq!(Some(2), cluster.server(1).leader_id());
    assert_eq!(Some(44), cluster.server(1).entry_at(2).map(|e| e.id));
    assert_eq!(EntryStatus::Invalidated, cluster.server(1).entry_response_committed(&stale));

    tracing::info!("--- the replacement entry commits cluster-wide");
    assert_eq!(2, cluster.server(2).commit_idx());
    assert_eq!(EntryStatus::Committed, cluster.server(2).entry_response_committed(&fresh));
    Ok(())
}

#[test]
fn test_log_matching_across_replicas() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    elect(&mut cluster, 1)?;

    for i in 1..=10 {
        cluster.server_mut(1).recv_entry(entry(i, b"x"))?;
    }
    cluster.deliver_all()?;
    cluster.advance(300);
    cluster.tick()?;

    for idx in 1..=10u64 {
        let reference = cluster.server(1).entry_at(idx).cloned();
        assert!(reference.is_some());
        for id in [2, 3] {
            assert_eq!(reference.as_ref(), cluster.server(id).entry_at(idx));
        }
    }
    Ok(())
}
