use std::time::Duration;

use lib_ranking::{PartitionKey, PublishOutcome, Snapshot, UpdateBroadcaster};
use project_tests::{GatedChannel, Harness, eventually};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_observer_never_slows_submissions() {
    let broadcaster = UpdateBroadcaster::spawn(2, Duration::from_secs(30));
    let h = Harness::with_broadcaster(broadcaster.clone());
    h.directory.add_game("chess").unwrap();
    h.directory.add_user(1, "alice").unwrap();

    let (observer, gate) = GatedChannel::closed_gate();
    broadcaster.register(observer.clone()).await;

    for score in 0..50 {
        tokio::time::timeout(
            Duration::from_secs(1),
            h.engine.submit_score(1, "chess", score),
        )
        .await
        .expect("submission blocked behind the broadcaster")
        .unwrap();
    }

    // Two snapshots (game and global) per submission reach the queue or are dropped.
    assert!(
        eventually(Duration::from_secs(5), || {
            let stats = broadcaster.stats();
            stats.queued + stats.dropped == 100
        })
        .await
    );
    let stats = broadcaster.stats();
    // One snapshot in flight plus a queue of two.
    assert!(stats.queued <= 3, "{stats:?}");
    assert!(stats.dropped >= 97, "{stats:?}");
    assert_eq!(observer.seen(), 0);

    gate.add_permits(100);
    broadcaster.shutdown().await;
    assert_eq!(observer.seen(), stats.queued);
}

#[tokio::test]
async fn publishing_past_capacity_drops_without_blocking() {
    let broadcaster = UpdateBroadcaster::spawn(4, Duration::from_secs(30));
    let (observer, gate) = GatedChannel::closed_gate();
    broadcaster.register(observer.clone()).await;

    let h = Harness::with_broadcaster(broadcaster.clone());
    h.directory.add_game("chess").unwrap();
    h.directory.add_user(1, "alice").unwrap();
    h.engine.submit_score(1, "chess", 10).await.unwrap();
    let board = h.engine.get_global_leaderboard(10).await.unwrap();

    let outcomes: Vec<PublishOutcome> = (0..20)
        .map(|_| broadcaster.publish(Snapshot::leaderboard(&PartitionKey::Global, board.clone())))
        .collect();
    assert!(outcomes.contains(&PublishOutcome::Dropped));
    assert!(outcomes.iter().filter(|o| **o == PublishOutcome::Queued).count() <= 5);

    gate.add_permits(1_000);
    broadcaster.shutdown().await;
    assert!(observer.seen() >= 1);
    assert!(broadcaster.is_shut_down());
    let late = broadcaster.publish(Snapshot::leaderboard(&PartitionKey::Global, board));
    assert_eq!(late, PublishOutcome::Dropped);
}
