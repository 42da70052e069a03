//! Heartbeat, work stealing and election across real localhost nodes.


use std::time::Duration;

use tar_node::config::TransferMode;
use tar_node::grpc::PeerClients;
use tar_node::scheduler::ServerMetrics;
use test_harness::{start_pair, test_node_config, TestNode};

#[tokio::test]
async fn test_heartbeat_exchanges_metrics_both_ways() {
    let (a, b) = start_pair(
        ("a", 57101, TransferMode::Immediate),
        ("b", 57102, TransferMode::Immediate),
        |_| {},
    )
    .await;
    a.load("a", 3).await;

    let report = a.driver().tick().await;
    assert_eq!(report.reachable, vec!["b".to_string()]);
    assert!(report.unreachable.is_empty());

    // a learned b's own metrics, stamped with the measured round trip
    let b_seen_by_a = a.core.peer_metrics("b").await.expect("b metrics stored");
    assert_eq!(b_seen_by_a.queue_length, 0);
    assert_eq!(b_seen_by_a.cpu_utilization, 0.5);
    assert!(b_seen_by_a.network_latency >= 0.0);
    assert!(b_seen_by_a.network_latency < 0.5);

    // b stored what a pushed
    let a_seen_by_b = b.core.peer_metrics("a").await.expect("a metrics stored");
    assert_eq!(a_seen_by_b.queue_length, 3);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unreachable_peer_keeps_previous_metrics() {
    // Nothing listens on 57112
    let a = TestNode::start(test_node_config("a", 57111, &[57112])).await;
    let previous = ServerMetrics::new("ghost", 4, 0.3).with_last_heartbeat(1_000);
    a.core.update_server_metrics(previous.clone()).await;

    let report = a.driver().tick().await;

    assert!(report.reachable.is_empty());
    assert_eq!(report.unreachable, vec!["127.0.0.1:57112".to_string()]);
    assert_eq!(a.core.peer_metrics("ghost").await, Some(previous));

    a.stop().await;
}

#[tokio::test]
async fn test_underloaded_node_steals_from_overloaded_peer() {
    let (donor, thief) = start_pair(
        ("donor", 57121, TransferMode::Immediate),
        ("thief", 57122, TransferMode::Immediate),
        |_| {},
    )
    .await;
    donor.load("job", 12).await;

    let report = thief.driver().tick().await;

    assert_eq!(report.stolen, vec!["job-000".to_string()]);
    assert!(report.rejected.is_empty());
    assert_eq!(donor.core.task_queue_length().await, 11);

    let stolen = thief.core.queued_tasks().await;
    assert_eq!(stolen.len(), 1);
    assert_eq!(stolen[0].id, "job-000");
    assert_eq!(stolen[0].hop_count, 1);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_no_stealing_below_overload_threshold() {
    let (donor, thief) = start_pair(
        ("donor", 57131, TransferMode::Immediate),
        ("thief", 57132, TransferMode::Immediate),
        |_| {},
    )
    .await;
    // Exactly at the threshold is not overloaded
    donor.load("job", 10).await;

    let report = thief.driver().tick().await;

    assert!(report.stolen.is_empty());
    assert_eq!(donor.core.task_queue_length().await, 10);
    assert_eq!(thief.core.task_queue_length().await, 0);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_busy_node_does_not_steal() {
    let (donor, thief) = start_pair(
        ("donor", 57141, TransferMode::Immediate),
        ("thief", 57142, TransferMode::Immediate),
        |_| {},
    )
    .await;
    donor.load("job", 15).await;
    thief.load("own", 2).await;

    let report = thief.driver().tick().await;

    assert!(report.stolen.is_empty());
    assert_eq!(donor.core.task_queue_length().await, 15);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_immediate_transfer_drops_task_rejected_by_thief() {
    let donor = TestNode::start(test_node_config("donor", 57151, &[57152])).await;
    let mut thief_config = test_node_config("thief", 57152, &[57151]);
    thief_config.max_hop_count = 0;
    let thief = TestNode::start(thief_config).await;
    donor.load("job", 11).await;

    let report = thief.driver().tick().await;

    assert_eq!(report.rejected, vec!["job-000".to_string()]);
    assert!(report.stolen.is_empty());
    assert_eq!(thief.core.task_queue_length().await, 0);
    assert_eq!(donor.core.task_queue_length().await, 10);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_two_phase_transfer_returns_rejected_task() {
    let donor = TestNode::start(
        test_node_config("donor", 57161, &[57162]).with_transfer_mode(TransferMode::TwoPhase),
    )
    .await;
    let mut thief_config = test_node_config("thief", 57162, &[57161])
        .with_transfer_mode(TransferMode::TwoPhase);
    thief_config.max_hop_count = 0;
    let thief = TestNode::start(thief_config).await;
    donor.load("job", 11).await;

    let report = thief.driver().tick().await;

    assert_eq!(report.rejected, vec!["job-000".to_string()]);
    assert_eq!(thief.core.task_queue_length().await, 0);
    assert_eq!(donor.core.task_queue_length().await, 11);
    let restored = donor.core.queued_tasks().await;
    assert_eq!(restored[0].id, "job-000");
    assert_eq!(restored[0].hop_count, 0);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_two_phase_transfer_commits_accepted_task() {
    let (donor, thief) = start_pair(
        ("donor", 57171, TransferMode::TwoPhase),
        ("thief", 57172, TransferMode::TwoPhase),
        |_| {},
    )
    .await;
    donor.load("job", 11).await;

    let report = thief.driver().tick().await;
    assert_eq!(report.stolen, vec!["job-000".to_string()]);

    // A later reclaim pass on the donor must not resurrect the committed task
    donor.core.reclaim_expired_reservations(Duration::ZERO).await;
    assert_eq!(donor.core.task_queue_length().await, 10);
    assert_eq!(thief.core.task_queue_length().await, 1);

    donor.stop().await;
    thief.stop().await;
}

#[tokio::test]
async fn test_self_leader_reelects_once_a_better_peer_appears() {
    // b's port is configured but nothing serves it yet
    let a = TestNode::start(test_node_config("a", 57181, &[57182])).await;
    a.load("a", 8).await;

    let mut driver = a.driver();
    let first = driver.tick().await;
    assert_eq!(first.elected.as_deref(), Some("a"));
    assert_eq!(a.core.current_leader().await.as_deref(), Some("a"));

    // Within the timeout the self-leader is kept
    let second = driver.tick().await;
    assert!(second.elected.is_none());

    let b = TestNode::start(test_node_config("b", 57182, &[57181])).await;
    tokio::time::sleep(a.config.leader_timeout + Duration::from_millis(100)).await;

    let third = driver.tick().await;
    assert_eq!(third.reachable, vec!["b".to_string()]);
    assert_eq!(third.elected.as_deref(), Some("b"));
    assert_eq!(a.core.current_leader().await.as_deref(), Some("b"));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_peer_client_round_trip_excludes_connect() {
    let node = TestNode::start(test_node_config("b", 57185, &[])).await;
    let clients = PeerClients::new(Duration::from_millis(500));
    let local = ServerMetrics::new("a", 0, 0.5);

    let (answer, first_rtt) = clients.heartbeat("127.0.0.1:57185", &local).await.unwrap();
    assert_eq!(answer.server_id, "b");
    assert!(first_rtt < Duration::from_millis(500));

    // The cached channel is reused and the second call is a plain round trip
    let (_, second_rtt) = clients.heartbeat("127.0.0.1:57185", &local).await.unwrap();
    assert!(second_rtt < Duration::from_millis(500));
    assert!(node.core.peer_metrics("a").await.is_some());

    node.stop().await;
}

#[tokio::test]
async fn test_silent_leader_triggers_reelection() {
    let (a, b) = start_pair(
        ("a", 57191, TransferMode::Immediate),
        ("b", 57192, TransferMode::Immediate),
        |_| {},
    )
    .await;
    a.load("a", 5).await;

    let mut driver = a.driver();
    let first = driver.tick().await;
    assert_eq!(first.elected.as_deref(), Some("b"));

    // Leader still answering: no new election
    let second = driver.tick().await;
    assert!(second.elected.is_none());

    b.stop().await;
    let third = driver.tick().await;
    assert_eq!(third.unreachable, vec!["127.0.0.1:57192".to_string()]);
    assert!(third.reachable.is_empty());

    tokio::time::sleep(a.config.leader_timeout + Duration::from_millis(100)).await;
    let fourth = driver.tick().await;
    assert!(fourth.elected.is_some());

    a.stop().await;
}
