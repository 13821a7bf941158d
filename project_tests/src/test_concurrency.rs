use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::future::join_all;
use lib_ranking::{PartitionKey, RankedStore};
use project_tests::{Harness, fixed_clock};
use rand::Rng;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_concurrent_submissions_keep_the_maximum() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let h = Arc::new(Harness::new().with_clock(fixed_clock(day)));
    h.directory.add_user(7, "carol").unwrap();
    h.directory.add_game("chess").unwrap();

    let mut rng = rand::rng();
    let scores: Vec<i64> = (0..100).map(|_| rng.random_range(-1_000..1_000_000)).collect();
    let expected = *scores.iter().max().unwrap();

    let tasks = scores.iter().map(|&score| {
        let h = h.clone();
        tokio::spawn(async move { h.engine.submit_score(7, "chess", score).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    for key in PartitionKey::fan_out("chess", day) {
        assert_eq!(h.store.rank(&key, 7).await.unwrap(), (1, expected), "{key}");
    }
    assert_eq!(h.history.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_players_produce_a_consistent_board() {
    let h = Arc::new(Harness::new());
    h.directory.add_game("go").unwrap();
    for id in 1..=50 {
        h.directory.add_user(id, &format!("player{id}")).unwrap();
    }

    // Every player submits three times; the middle score is their best.
    let tasks = (1..=50i64).flat_map(|id| {
        [id * 10 - 5, id * 10, id * 10 - 3].map(|score| {
            let h = h.clone();
            tokio::spawn(async move { h.engine.submit_score(id, "go", score).await })
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let board = h
        .engine
        .get_leaderboard(&PartitionKey::game("go"), 100)
        .await
        .unwrap();
    assert_eq!(board.len(), 50);
    for (idx, entry) in board.iter().enumerate() {
        assert_eq!(entry.rank, idx as u64 + 1);
        assert_eq!(entry.user_id, 50 - idx as i64);
        assert_eq!(entry.score, entry.user_id * 10);
        assert_eq!(entry.username, format!("player{}", entry.user_id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queries_run_alongside_submissions() {
    let h = Arc::new(Harness::new());
    h.directory.add_game("chess").unwrap();
    h.directory.add_user(1, "alice").unwrap();
    h.engine.submit_score(1, "chess", 1).await.unwrap();

    let writer = {
        let h = h.clone();
        tokio::spawn(async move {
            for score in 2..=200 {
                h.engine.submit_score(1, "chess", score).await.unwrap();
            }
        })
    };
    let reader = {
        let h = h.clone();
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..200 {
                let rank = h.engine.get_user_rank("chess", 1).await.unwrap();
                assert!(rank.score >= last, "score went backwards");
                last = rank.score;
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(h.engine.get_user_rank("chess", 1).await.unwrap().score, 200);
}
