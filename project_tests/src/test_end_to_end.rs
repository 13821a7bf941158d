use std::time::Duration;

use chrono::NaiveDate;
use lib_ranking::{
    Caller, ErrorKind, MemoryChannel, PartitionKey, Role, Snapshot, UpdateBroadcaster,
};
use project_tests::{Harness, fixed_clock};

#[tokio::test]
async fn alice_and_bob_play_chess() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let h = Harness::new().with_clock(fixed_clock(day));
    let alice = h.directory.add_user(1, "alice").unwrap();
    let bob = h.directory.add_user(2, "bob").unwrap();
    h.directory.add_game("chess").unwrap();

    h.engine.submit_score(alice.id, "chess", 1500).await.unwrap();
    h.engine.submit_score(bob.id, "chess", 2000).await.unwrap();

    let board = h
        .engine
        .get_leaderboard(&PartitionKey::game("chess"), 10)
        .await
        .unwrap();
    let view: Vec<(&str, i64, u64)> = board
        .iter()
        .map(|e| (e.username.as_str(), e.score, e.rank))
        .collect();
    assert_eq!(view, vec![("bob", 2000, 1), ("alice", 1500, 2)]);

    h.engine.submit_score(alice.id, "chess", 1000).await.unwrap();
    let rank = h.engine.get_user_rank("chess", alice.id).await.unwrap();
    assert_eq!(rank.score, 1500);
    assert_eq!(rank.rank, 2);
    assert_eq!(rank.username, "alice");

    // Every attempt is audited, including the one that changed nothing.
    let history = h
        .engine
        .get_user_history(Caller::new(alice.id, Role::User), alice.id, 10)
        .await
        .unwrap();
    let scores: Vec<i64> = history.iter().map(|s| s.score).collect();
    assert_eq!(scores, vec![1000, 1500]);

    let daily = h
        .engine
        .get_top_players_by_period("chess", day, 10)
        .await
        .unwrap();
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0].username, "bob");
    let next_day = day.succ_opt().unwrap();
    let empty = h
        .engine
        .get_top_players_by_period("chess", next_day, 10)
        .await
        .unwrap();
    assert!(empty.is_empty());

    let global = h.engine.get_global_leaderboard(10).await.unwrap();
    assert_eq!(global[0].user_id, bob.id);
}

#[tokio::test]
async fn unknown_game_leaves_everything_untouched() {
    let h = Harness::new();
    h.directory.add_user(1, "alice").unwrap();
    h.directory.add_game("chess").unwrap();

    let err = h.engine.submit_score(1, "checkers", 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.store.partition_count().unwrap(), 0);
    assert!(h.history.is_empty());
    assert_eq!(
        h.engine.get_user_rank("chess", 1).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn observer_receives_game_and_global_snapshots() {
    let broadcaster = UpdateBroadcaster::with_defaults();
    let h = Harness::with_broadcaster(broadcaster.clone());
    h.directory.add_user(1, "alice").unwrap();
    h.directory.add_game("chess").unwrap();

    let (observer, mut inbox) = MemoryChannel::pair();
    broadcaster.register(observer.clone()).await;

    h.engine.submit_score(1, "chess", 700).await.unwrap();

    let mut labels = Vec::new();
    for _ in 0..2 {
        let bytes = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("snapshot not delivered in time")
            .expect("observer channel closed");
        let snapshot: Snapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.kind, Snapshot::LEADERBOARD_UPDATE);
        assert_eq!(snapshot.entries[0].username, "alice");
        assert_eq!(snapshot.entries[0].score, 700);
        labels.push(snapshot.game);
    }
    labels.sort();
    assert_eq!(labels, vec!["chess".to_string(), "global".to_string()]);

    broadcaster.shutdown().await;
    assert!(observer.is_closed());
    assert_eq!(broadcaster.channel_count(), 0);
}
