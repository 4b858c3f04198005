//! A node joins as a learner, catches up, and is promoted to voter.

use std::collections::BTreeSet;

use maplit::btreeset;
use pretty_assertions::assert_eq;
use sansraft::testing::cfg_entry;
use sansraft::testing::entry;
use sansraft::testing::Cluster;
use sansraft::testing::MemHost;
use sansraft::EntryKind;
use sansraft::Raft;

#[test]
fn test_nonvoting_catch_up_then_promote() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1]);
    cluster.advance(1000);
    cluster.tick()?;
    assert!(cluster.server(1).is_leader());

    tracing::info!("--- give the leader some history for the joiner to replay");
    for i in 1..=3 {
        cluster.server_mut(1).recv_entry(entry(i, b"op"))?;
    }
    assert_eq!(3, cluster.server(1).commit_idx());

    tracing::info!("--- the joiner starts with an empty configuration");
    cluster.add_server(2, Raft::new(MemHost::new()));

    let resp = cluster.server_mut(1).recv_entry(cfg_entry(4, EntryKind::AddNonvoting, 2))?;
    assert_eq!(4, resp.idx);
    // A non-voting add is not a voting change and commits on the spot.
    assert_eq!(4, cluster.server(1).commit_idx());
    assert!(!cluster.server(1).voting_change_in_progress());
    assert_eq!(2, cluster.server(1).num_nodes());
    assert_eq!(1, cluster.server(1).num_voting_nodes());

    tracing::info!("--- the next heartbeat catches the joiner up");
    cluster.advance(200);
    cluster.tick()?;

    assert_eq!(4, cluster.server(2).current_idx());
    assert_eq!(false, cluster.server(2).get_node(2).unwrap().is_voting());

    tracing::info!("--- the engine reported the catch-up exactly once");
    assert_eq!(vec![2], cluster.server(1).host().sufficient_log_events);
    assert_eq!(
        true,
        cluster.server(1).get_node(2).unwrap().has_sufficient_logs()
    );

    tracing::info!("--- the host reacts with a promotion");
    let resp = cluster.server_mut(1).recv_entry(cfg_entry(5, EntryKind::Promote, 2))?;
    assert!(cluster.server(1).voting_change_in_progress());
    cluster.deliver_all()?;
    assert_eq!(resp.idx, cluster.server(1).commit_idx());

    tracing::info!("--- applying the promote finishes the change");
    cluster.advance(300);
    cluster.tick()?;
    assert!(!cluster.server(1).voting_change_in_progress());
    let voting: BTreeSet<_> = cluster
        .server(1)
        .nodes()
        .filter(|n| n.is_voting())
        .map(|n| n.id())
        .collect();
    assert_eq!(btreeset! {1, 2}, voting);
    assert_eq!(true, cluster.server(2).get_node(2).unwrap().is_voting());

    tracing::info!("--- no duplicate catch-up report after more traffic");
    cluster.advance(300);
    cluster.tick()?;
    assert_eq!(vec![2], cluster.server(1).host().sufficient_log_events);
    Ok(())
}

#[test]
fn test_removed_voter_leaves_the_cluster() -> anyhow::Result<()> {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    cluster.advance(2100);
    cluster.server_mut(1).periodic()?;
    cluster.deliver_all()?;
    assert_eq!(Some(1), cluster.leader_id());

    let resp = cluster.server_mut(1).recv_entry(cfg_entry(1, EntryKind::RemoveVoting, 3))?;
    assert!(cluster.server(1).voting_change_in_progress());
    // The removal takes effect on append: node 3 is gone already.
    assert_eq!(2, cluster.server(1).num_nodes());

    cluster.deliver_all()?;
    cluster.advance(300);
    cluster.tick()?;

    assert!(resp.idx <= cluster.server(1).commit_idx());
    assert!(!cluster.server(1).voting_change_in_progress());
    assert_eq!(2, cluster.server(2).num_nodes());
    assert_eq!(None, cluster.server(2).get_node(3).map(|n| n.id()));
    Ok(())
}
