use pretty_assertions::assert_eq;

use crate::entry::Entry;
use crate::error::RaftError;
use crate::messages::AppendEntries;
use crate::messages::AppendEntriesResponse;
use crate::messages::EntryStatus;
use crate::raft::Raft;
use crate::raft_types::ServerState;
use crate::testing::entry;
use crate::testing::make_leader;
use crate::testing::MemHost;

fn follower() -> Raft<MemHost> {
    let mut raft = Raft::new(MemHost::new());
    for id in [1, 2, 3] {
        raft.add_node(id, id == 1).unwrap();
    }
    raft
}

fn ae(term: u64, prev_log_idx: u64, prev_log_term: u64, leader_commit: u64, entries: Vec<Entry>) -> AppendEntries {
    AppendEntries {
        term,
        leader_commit,
        prev_log_idx,
        prev_log_term,
        entries,
    }
}

fn ety(term: u64, id: u64) -> Entry {
    Entry { term, ..entry(id, b"x") }
}

fn ok_resp(term: u64, current_idx: u64, lease: u64) -> AppendEntriesResponse {
    AppendEntriesResponse {
        term,
        success: true,
        current_idx,
        first_idx: 0,
        lease,
    }
}

#[test]
fn test_follower_accepts_entries_and_grants_lease() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.host_mut().now = 700;

    let resp = raft.recv_append_entries(2, &ae(1, 0, 0, 0, vec![ety(1, 10), ety(1, 11)]))?;

    assert_eq!(true, resp.success);
    assert_eq!(2, resp.current_idx);
    assert_eq!(1, resp.first_idx);
    assert_eq!(700 + 1000, resp.lease);
    assert_eq!(1, resp.term);

    assert_eq!(1, raft.current_term());
    assert_eq!(1, raft.host().term);
    assert_eq!(Some(2), raft.leader_id());
    assert_eq!(2, raft.current_idx());
    assert_eq!(0, raft.commit_idx());
    Ok(())
}

#[test]
fn test_follower_rejects_stale_term() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.set_current_term(5)?;

    let resp = raft.recv_append_entries(2, &ae(4, 0, 0, 0, vec![ety(4, 1)]))?;

    assert_eq!(false, resp.success);
    assert_eq!(5, resp.term);
    assert_eq!(0, resp.current_idx);
    assert_eq!(0, resp.lease);
    assert_eq!(None, raft.leader_id());
    assert_eq!(0, raft.current_idx());
    Ok(())
}

#[test]
fn test_follower_rejects_missing_prev_entry() -> anyhow::Result<()> {
    let mut raft = follower();

    let resp = raft.recv_append_entries(2, &ae(1, 3, 1, 0, vec![ety(1, 9)]))?;

    assert_eq!(false, resp.success);
    // The leader backtracks straight to our current index.
    assert_eq!(0, resp.current_idx);
    Ok(())
}

#[test]
fn test_follower_truncates_conflicting_tail() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.recv_append_entries(2, &ae(1, 0, 0, 0, vec![ety(1, 10), ety(1, 11), ety(1, 12)]))?;
    assert_eq!(3, raft.current_idx());

    tracing::info!("--- a new leader overwrites the uncommitted tail");
    let resp = raft.recv_append_entries(3, &ae(2, 1, 1, 0, vec![ety(2, 20)]))?;

    assert_eq!(true, resp.success);
    assert_eq!(2, resp.current_idx);
    assert_eq!(2, raft.current_idx());
    assert_eq!(Some(20), raft.entry_at(2).map(|e| e.id));
    assert_eq!(Some(2), raft.entry_at(2).map(|e| e.term));

    // The host saw the pops before the fresh offers.
    assert_eq!(2, raft.host().log.len());
    assert_eq!(20, raft.host().log[1].1.id);
    Ok(())
}

#[test]
fn test_conflict_below_commit_is_fatal() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.recv_append_entries(2, &ae(1, 0, 0, 2, vec![ety(1, 10), ety(1, 11)]))?;
    assert_eq!(2, raft.commit_idx());

    let err = raft.recv_append_entries(3, &ae(2, 1, 9, 0, vec![])).unwrap_err();
    assert_eq!(RaftError::Shutdown, err);

    let err = raft.recv_append_entries(3, &ae(2, 0, 0, 0, vec![ety(2, 30)])).unwrap_err();
    assert_eq!(RaftError::Shutdown, err);
    Ok(())
}

#[test]
fn test_duplicate_entries_are_skipped() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.recv_append_entries(2, &ae(1, 0, 0, 0, vec![ety(1, 10), ety(1, 11)]))?;

    tracing::info!("--- a retransmission neither appends nor truncates");
    let resp = raft.recv_append_entries(2, &ae(1, 0, 0, 0, vec![ety(1, 10), ety(1, 11)]))?;

    assert_eq!(true, resp.success);
    assert_eq!(2, resp.current_idx);
    assert_eq!(2, raft.current_idx());
    assert_eq!(2, raft.host().log.len());
    Ok(())
}

#[test]
fn test_commit_follows_leader_commit() -> anyhow::Result<()> {
    let mut raft = follower();

    tracing::info!("--- commit is capped by the last new entry");
    let resp = raft.recv_append_entries(2, &ae(1, 0, 0, 9, vec![ety(1, 10), ety(1, 11)]))?;
    assert_eq!(true, resp.success);
    assert_eq!(2, raft.commit_idx());

    tracing::info!("--- applying happens lazily, on periodic");
    assert_eq!(0, raft.last_applied_idx());
    raft.periodic()?;
    assert_eq!(2, raft.last_applied_idx());
    assert_eq!(vec![1, 2], raft.host().applied_indices());
    Ok(())
}

#[test]
fn test_candidate_steps_down_on_append_entries_of_same_term() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.set_first_start(true);
    raft.host_mut().now = 2000;
    raft.periodic()?;
    raft.recv_request_vote_response(
        2,
        &crate::messages::RequestVoteResponse {
            term: 0,
            vote_granted: crate::messages::VoteGrant::Granted,
            prevote: true,
        },
    )?;
    assert!(raft.is_candidate());
    assert_eq!(1, raft.current_term());

    let resp = raft.recv_append_entries(3, &ae(1, 0, 0, 0, vec![]))?;

    assert_eq!(true, resp.success);
    assert_eq!(ServerState::Follower, raft.state());
    assert_eq!(Some(3), raft.leader_id());
    Ok(())
}

#[test]
fn test_partial_offer_is_reflected_in_response() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.host_mut().offer_cap = Some(1);

    let resp = raft.recv_append_entries(2, &ae(1, 0, 0, 2, vec![ety(1, 10), ety(1, 11)]))?;

    assert_eq!(true, resp.success);
    assert_eq!(1, resp.current_idx);
    assert_eq!(1, raft.current_idx());
    // Commit is capped by what was actually stored.
    assert_eq!(1, raft.commit_idx());
    Ok(())
}

#[test]
fn test_leader_replicates_and_commits_on_majority() -> anyhow::Result<()> {
    let mut raft = make_leader(&[1, 2, 3], 1);

    let resp = raft.recv_entry(entry(42, b"hello"))?;
    assert_eq!(42, resp.id);
    assert_eq!(1, resp.idx);
    assert_eq!(1, resp.term);

    // Both caught-up voters got the entry immediately.
    assert_eq!(2, raft.host().sent_append_entries.len());
    assert_eq!(0, raft.commit_idx());
    assert_eq!(EntryStatus::Pending, raft.entry_response_committed(&resp));

    tracing::info!("--- one follower ack makes a majority of two");
    raft.recv_append_entries_response(2, &ok_resp(1, 1, 3000))?;
    assert_eq!(1, raft.commit_idx());
    assert_eq!(EntryStatus::Committed, raft.entry_response_committed(&resp));

    tracing::info!("--- the apply loop runs on periodic");
    raft.periodic()?;
    assert_eq!(vec![1], raft.host().applied_indices());
    Ok(())
}

#[test]
fn test_leader_backtracks_next_idx_on_failure() -> anyhow::Result<()> {
    // A server with three old-term entries wins an election; peers start
    // at next_idx = 4 and must be backtracked.
    let mut raft = follower();
    raft.append_entries(&[ety(1, 10), ety(1, 11), ety(1, 12)])?;
    raft.set_current_term(1)?;
    raft.set_first_start(true);
    raft.host_mut().now = 2000;
    raft.periodic()?;
    for prevote in [true, false] {
        let resp = crate::messages::RequestVoteResponse {
            term: raft.current_term(),
            vote_granted: crate::messages::VoteGrant::Granted,
            prevote,
        };
        raft.recv_request_vote_response(2, &resp)?;
    }
    assert!(raft.is_leader());
    assert_eq!(2, raft.current_term());
    assert_eq!(4, raft.get_node(2).unwrap().next_idx());
    raft.host_mut().sent_append_entries.clear();

    let fail = AppendEntriesResponse {
        term: 2,
        success: false,
        current_idx: 0,
        first_idx: 4,
        lease: 0,
    };
    raft.recv_append_entries_response(2, &fail)?;

    assert_eq!(1, raft.get_node(2).unwrap().next_idx());

    // The retry starts over from the very beginning.
    let (to, retry) = raft.host().sent_append_entries.last().unwrap().clone();
    assert_eq!(2, to);
    assert_eq!(0, retry.prev_log_idx);
    assert_eq!(3, retry.entries.len());
    Ok(())
}

#[test]
fn test_leader_only_commits_entries_of_its_own_term() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.append_entries(&[ety(1, 10)])?;
    raft.set_current_term(2)?;
    raft.state.state = ServerState::Leader;

    tracing::info!("--- a majority on an old-term entry does not commit it");
    raft.recv_append_entries_response(2, &ok_resp(2, 1, 0))?;
    assert_eq!(0, raft.commit_idx());

    tracing::info!("--- once a current-term entry is replicated, both commit");
    raft.append_entries(&[ety(2, 11)])?;
    raft.recv_append_entries_response(2, &ok_resp(2, 2, 0))?;
    assert_eq!(2, raft.commit_idx());
    Ok(())
}

#[test]
fn test_leader_steps_down_on_higher_term_response() -> anyhow::Result<()> {
    let mut raft = make_leader(&[1, 2, 3], 1);

    raft.recv_append_entries_response(2, &ok_resp(9, 0, 0))?;

    assert!(raft.is_follower());
    assert_eq!(9, raft.current_term());
    assert_eq!(None, raft.leader_id());
    Ok(())
}

#[test]
fn test_recv_entry_requires_leadership() {
    let mut raft = follower();
    let err = raft.recv_entry(entry(1, b"x")).unwrap_err();
    assert_eq!(RaftError::NotLeader, err);
}

#[test]
fn test_stale_success_response_is_ignored() -> anyhow::Result<()> {
    let mut raft = make_leader(&[1, 2, 3], 1);
    raft.recv_entry(entry(1, b"x"))?;
    raft.recv_entry(entry(2, b"y"))?;

    raft.recv_append_entries_response(2, &ok_resp(1, 2, 0))?;
    assert_eq!(3, raft.get_node(2).unwrap().next_idx());
    assert_eq!(2, raft.get_node(2).unwrap().match_idx());

    tracing::info!("--- an out-of-date ack can not move the peer backwards");
    raft.recv_append_entries_response(2, &ok_resp(1, 1, 0))?;
    assert_eq!(3, raft.get_node(2).unwrap().next_idx());
    assert_eq!(2, raft.get_node(2).unwrap().match_idx());
    Ok(())
}

#[test]
fn test_response_from_unknown_node_is_an_error() {
    let mut raft = make_leader(&[1, 2, 3], 1);
    let err = raft.recv_append_entries_response(9, &ok_resp(1, 0, 0)).unwrap_err();
    assert_eq!(RaftError::UnknownNode(9), err);
}

#[test]
fn test_apply_shutdown_propagates_out_of_periodic() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.recv_append_entries(2, &ae(1, 0, 0, 1, vec![ety(1, 10)]))?;
    raft.host_mut().shutdown_on_apply = Some(1);

    let err = raft.periodic().unwrap_err();
    assert_eq!(RaftError::Shutdown, err);
    Ok(())
}

#[test]
fn test_entry_response_invalidated_by_other_leader() -> anyhow::Result<()> {
    let mut raft = follower();
    raft.recv_append_entries(2, &ae(1, 0, 0, 0, vec![ety(1, 42)]))?;
    let r = crate::messages::EntryResponse { id: 42, term: 1, idx: 1 };
    assert_eq!(EntryStatus::Pending, raft.entry_response_committed(&r));

    tracing::info!("--- another leader overwrites index 1");
    raft.recv_append_entries(3, &ae(2, 0, 0, 0, vec![ety(2, 50)]))?;
    assert_eq!(EntryStatus::Invalidated, raft.entry_response_committed(&r));
    Ok(())
}
