//! # Ranking Engine
//!
//! Orchestrates score submission and leaderboard queries.
//!
//! ## Submission path
//! 1.  The game must exist in the catalog; otherwise `NotFound` with no side
//!     effects at all.
//! 2.  The score is max-merged into the game, global and today's daily
//!     partitions. The three writes are attempted independently and
//!     concurrently; there is no rollback, so a tier that succeeded stays
//!     applied when another fails.
//! 3.  The attempt is appended to the history log after the fan-out, whatever
//!     its outcome. A history failure fails the submission.
//! 4.  A background task refreshes the top-N snapshots of the game and global
//!     partitions and hands them to the broadcaster. Nothing on that path can
//!     fail the submission.
//!
//! Every outbound call runs under a deadline: ranking-store expiry is
//! `StoreUnavailable`, catalog/directory/history expiry is `Internal`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::{join_all, try_join_all};

use super::broadcaster::UpdateBroadcaster;
use crate::errors::{service_deadline, store_deadline, RankingError, Result};
use crate::model::{
    Caller, LeaderboardEntry, PartitionKey, RankingEntry, Score, Snapshot, Submission, UserId,
    UserRank,
};
use crate::repository::{GameCatalog, HistoryLog, UserDirectory};
use crate::store::RankedStore;

/// Source of "now"; replaced in tests to pin the daily partition.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Tunables for [`RankingEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Deadline for each ranking-store call.
    pub store_timeout: Duration,
    /// Deadline for each catalog, directory or history call.
    pub service_timeout: Duration,
    /// Size of the snapshots pushed to observers after a submission.
    pub broadcast_top_n: usize,
    /// Upper bound for any top-N request.
    pub max_top_n: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            service_timeout: Duration::from_secs(2),
            broadcast_top_n: 10,
            max_top_n: 100,
        }
    }
}

/// # Ranking Engine
///
/// Holds only shared handles, so clones are cheap and all see the same
/// backends.
#[derive(Clone)]
pub struct RankingEngine {
    store: Arc<dyn RankedStore>,
    catalog: Arc<dyn GameCatalog>,
    users: Arc<dyn UserDirectory>,
    history: Arc<dyn HistoryLog>,
    broadcaster: Option<UpdateBroadcaster>,
    settings: EngineSettings,
    clock: Clock,
}

impl RankingEngine {
    pub fn new(
        store: Arc<dyn RankedStore>,
        catalog: Arc<dyn GameCatalog>,
        users: Arc<dyn UserDirectory>,
        history: Arc<dyn HistoryLog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            users,
            history,
            broadcaster: None,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: UpdateBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Records a score for `user_id` in `game`.
    ///
    /// # Errors
    /// - `NotFound` if the game does not exist (nothing is written).
    /// - The first fan-out failure, after the history append was still
    ///   attempted.
    /// - The history failure, if the fan-out succeeded but the append did not.
    pub async fn submit_score(
        &self,
        user_id: UserId,
        game: &str,
        score: Score,
    ) -> Result<Submission> {
        service_deadline(
            self.settings.service_timeout,
            "catalog lookup",
            self.catalog.get_by_name(game),
        )
        .await?;

        let submitted_at = (self.clock)();
        let submission = Submission {
            user_id,
            game: game.to_string(),
            score,
            submitted_at,
        };

        let keys = PartitionKey::fan_out(game, submitted_at.date_naive());
        let outcomes = join_all(keys.iter().map(|key| {
            store_deadline(
                self.settings.store_timeout,
                "ranked submit",
                self.store.submit(key, user_id, score),
            )
        }))
        .await;

        let mut fan_out_error = None;
        for (key, outcome) in keys.iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::error!(%key, user_id, score, "fan-out write failed: {}", e);
                if fan_out_error.is_none() {
                    fan_out_error = Some(e);
                }
            }
        }

        let history_result = service_deadline(
            self.settings.service_timeout,
            "history append",
            self.history.append(&submission),
        )
        .await;

        self.refresh_observers(game);

        match (fan_out_error, history_result) {
            (Some(e), Err(history_error)) => {
                tracing::error!(
                    user_id,
                    game,
                    "history append failed after fan-out failure: {}",
                    history_error
                );
                Err(e)
            }
            (Some(e), Ok(())) => Err(e),
            (None, Err(history_error)) => {
                tracing::error!(user_id, game, "history append failed: {}", history_error);
                Err(history_error)
            }
            (None, Ok(())) => {
                tracing::debug!(user_id, game, score, "submission recorded");
                Ok(submission)
            }
        }
    }

    /// Top entries of `key`, enriched with usernames and ranked from 1.
    ///
    /// Users missing from the directory get an empty username.
    pub async fn get_leaderboard(
        &self,
        key: &PartitionKey,
        top_n: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let n = self.clamp_top_n(top_n);
        let entries = store_deadline(
            self.settings.store_timeout,
            "ranked top_n",
            self.store.top_n(key, n),
        )
        .await?;
        self.enrich(entries).await
    }

    pub async fn get_global_leaderboard(&self, top_n: usize) -> Result<Vec<LeaderboardEntry>> {
        self.get_leaderboard(&PartitionKey::Global, top_n).await
    }

    /// Daily leaderboard of `game` for the UTC calendar `date`.
    pub async fn get_top_players_by_period(
        &self,
        game: &str,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.get_leaderboard(&PartitionKey::daily(game, date), top_n)
            .await
    }

    /// `NotFound` if the user never submitted to `game`.
    pub async fn get_user_rank(&self, game: &str, user_id: UserId) -> Result<UserRank> {
        let key = PartitionKey::game(game);
        let (rank, score) = store_deadline(
            self.settings.store_timeout,
            "ranked rank",
            self.store.rank(&key, user_id),
        )
        .await?;
        let username = self.username_of(user_id).await?;
        Ok(UserRank {
            user_id,
            username,
            score,
            rank,
        })
    }

    pub async fn get_user_rank_by_username(&self, game: &str, username: &str) -> Result<UserRank> {
        let user = service_deadline(
            self.settings.service_timeout,
            "directory lookup",
            self.users.get_by_username(username),
        )
        .await?;
        self.get_user_rank(game, user.id).await
    }

    /// Submission history of `user_id`, newest first.
    ///
    /// Reading someone else's history requires the admin role. This path never
    /// touches the ranking store, so it keeps working while that store is down.
    pub async fn get_user_history(
        &self,
        caller: Caller,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Submission>> {
        if caller.user_id != user_id && !caller.is_admin() {
            return Err(RankingError::permission_denied(format!(
                "user {} may not read history of user {}",
                caller.user_id, user_id
            )));
        }
        service_deadline(
            self.settings.service_timeout,
            "history read",
            self.history.for_user(user_id, self.clamp_top_n(limit)),
        )
        .await
    }

    fn clamp_top_n(&self, n: usize) -> usize {
        n.clamp(1, self.settings.max_top_n.max(1))
    }

    async fn username_of(&self, user_id: UserId) -> Result<String> {
        match service_deadline(
            self.settings.service_timeout,
            "directory lookup",
            self.users.get_by_id(user_id),
        )
        .await
        {
            Ok(user) => Ok(user.username),
            Err(e) if e.is_not_found() => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn enrich(&self, entries: Vec<RankingEntry>) -> Result<Vec<LeaderboardEntry>> {
        let names = try_join_all(entries.iter().map(|e| self.username_of(e.member))).await?;
        Ok(entries
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(idx, (entry, username))| LeaderboardEntry {
                user_id: entry.member,
                username,
                score: entry.score,
                rank: idx as u64 + 1,
            })
            .collect())
    }

    /// Spawns the snapshot refresh for `game` and the global partition.
    fn refresh_observers(&self, game: &str) {
        let Some(broadcaster) = self.broadcaster.clone() else {
            return;
        };
        let engine = self.clone();
        let game = game.to_string();
        tokio::spawn(async move {
            for key in [PartitionKey::game(game), PartitionKey::Global] {
                match engine
                    .get_leaderboard(&key, engine.settings.broadcast_top_n)
                    .await
                {
                    Ok(entries) => {
                        broadcaster.publish(Snapshot::leaderboard(&key, entries));
                    }
                    Err(e) => {
                        tracing::warn!(%key, "snapshot refresh skipped: {}", e);
                    }
                }
            }
        });
    }
}
