use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::RankedStore;
use crate::errors::{RankingError, Result};
use crate::model::{PartitionKey, RankingEntry, Score, UserId};

/// Sort key: score descending, then member id ascending.
type OrderKey = (Reverse<Score>, UserId);

#[derive(Default)]
struct Board {
    scores: HashMap<UserId, Score>,
    order: BTreeSet<OrderKey>,
}

impl Board {
    /// Returns true when the stored score changed.
    fn merge_max(&mut self, member: UserId, score: Score) -> bool {
        match self.scores.get(&member).copied() {
            Some(current) if current >= score => false,
            Some(current) => {
                self.order.remove(&(Reverse(current), member));
                self.order.insert((Reverse(score), member));
                self.scores.insert(member, score);
                true
            }
            None => {
                self.order.insert((Reverse(score), member));
                self.scores.insert(member, score);
                true
            }
        }
    }

    fn rank_of(&self, member: UserId) -> Option<(u64, Score)> {
        let score = *self.scores.get(&member)?;
        let ahead = self.order.range(..(Reverse(score), member)).count();
        Some((ahead as u64 + 1, score))
    }
}

/// # Memory Ranked Store
///
/// Holds every partition behind one mutex. The max-merge compare and write
/// happen inside a single critical section, which gives the same atomicity a
/// `ZADD GT` gives against Redis.
#[derive(Default)]
pub struct MemoryRankedStore {
    boards: Mutex<HashMap<PartitionKey, Board>>,
}

impl MemoryRankedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members ranked under `key`.
    pub fn len(&self, key: &PartitionKey) -> Result<usize> {
        let boards = self.lock()?;
        Ok(boards.get(key).map_or(0, |b| b.scores.len()))
    }

    /// Number of partition keys that hold at least one entry.
    pub fn partition_count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PartitionKey, Board>>> {
        self.boards
            .lock()
            .map_err(|_| RankingError::internal("memory ranked store lock poisoned"))
    }
}

#[async_trait]
impl RankedStore for MemoryRankedStore {
    async fn submit(&self, key: &PartitionKey, member: UserId, score: Score) -> Result<()> {
        let mut boards = self.lock()?;
        let changed = boards.entry(key.clone()).or_default().merge_max(member, score);
        tracing::trace!(%key, member, score, changed, "max-merge applied");
        Ok(())
    }

    async fn top_n(&self, key: &PartitionKey, n: usize) -> Result<Vec<RankingEntry>> {
        let boards = self.lock()?;
        let Some(board) = boards.get(key) else {
            return Ok(Vec::new());
        };
        Ok(board
            .order
            .iter()
            .take(n)
            .map(|(Reverse(score), member)| RankingEntry {
                member: *member,
                score: *score,
            })
            .collect())
    }

    async fn rank(&self, key: &PartitionKey, member: UserId) -> Result<(u64, Score)> {
        let boards = self.lock()?;
        boards
            .get(key)
            .and_then(|board| board.rank_of(member))
            .ok_or_else(|| RankingError::not_found(format!("member {member} in {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::sync::Arc;

    fn chess() -> PartitionKey {
        PartitionKey::game("chess")
    }

    #[tokio::test]
    async fn keeps_the_maximum_score() {
        let store = MemoryRankedStore::new();
        store.submit(&chess(), 1, 1500).await.unwrap();
        store.submit(&chess(), 1, 1000).await.unwrap();
        assert_eq!(store.rank(&chess(), 1).await.unwrap(), (1, 1500));

        store.submit(&chess(), 1, 1700).await.unwrap();
        assert_eq!(store.rank(&chess(), 1).await.unwrap(), (1, 1700));
        assert_eq!(store.len(&chess()).unwrap(), 1);
    }

    #[tokio::test]
    async fn final_score_is_max_for_any_arrival_order() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let len = rng.random_range(1..30);
            let mut scores: Vec<Score> =
                (0..len).map(|_| rng.random_range(-5_000..5_000)).collect();
            let expected = *scores.iter().max().unwrap();
            scores.shuffle(&mut rng);

            let store = MemoryRankedStore::new();
            for score in &scores {
                store.submit(&chess(), 42, *score).await.unwrap();
            }
            assert_eq!(store.rank(&chess(), 42).await.unwrap().1, expected);
        }
    }

    #[tokio::test]
    async fn top_n_orders_by_score_then_ascending_member() {
        let store = MemoryRankedStore::new();
        store.submit(&chess(), 30, 900).await.unwrap();
        store.submit(&chess(), 10, 900).await.unwrap();
        store.submit(&chess(), 20, 1200).await.unwrap();
        store.submit(&chess(), 5, 100).await.unwrap();

        let top = store.top_n(&chess(), 3).await.unwrap();
        let members: Vec<UserId> = top.iter().map(|e| e.member).collect();
        assert_eq!(members, vec![20, 10, 30]);
    }

    #[tokio::test]
    async fn rank_counts_ties_with_lower_ids_ahead() {
        let store = MemoryRankedStore::new();
        for member in [9, 3, 7] {
            store.submit(&chess(), member, 500).await.unwrap();
        }
        store.submit(&chess(), 1, 800).await.unwrap();

        assert_eq!(store.rank(&chess(), 1).await.unwrap(), (1, 800));
        assert_eq!(store.rank(&chess(), 3).await.unwrap(), (2, 500));
        assert_eq!(store.rank(&chess(), 7).await.unwrap(), (3, 500));
        assert_eq!(store.rank(&chess(), 9).await.unwrap(), (4, 500));
    }

    #[tokio::test]
    async fn rank_of_absent_member_is_not_found() {
        let store = MemoryRankedStore::new();
        let err = store.rank(&chess(), 1).await.unwrap_err();
        assert!(err.is_not_found());

        store.submit(&chess(), 2, 10).await.unwrap();
        let err = store.rank(&chess(), 1).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let store = MemoryRankedStore::new();
        store.submit(&chess(), 1, 100).await.unwrap();
        store.submit(&PartitionKey::Global, 1, 300).await.unwrap();

        assert_eq!(store.rank(&chess(), 1).await.unwrap().1, 100);
        assert_eq!(store.rank(&PartitionKey::Global, 1).await.unwrap().1, 300);
        assert!(store.top_n(&PartitionKey::game("go"), 10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_keep_the_maximum() {
        let store = Arc::new(MemoryRankedStore::new());
        let scores: Vec<Score> = {
            let mut rng = rand::rng();
            (0..100).map(|_| rng.random_range(0..1_000_000)).collect()
        };
        let expected = *scores.iter().max().unwrap();

        let handles: Vec<_> = scores
            .into_iter()
            .map(|score| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.submit(&chess(), 7, score).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.rank(&chess(), 7).await.unwrap(), (1, expected));
    }
}
