//! # Ranking Data Model
//!
//! Plain data carried between the engine, its stores and observers.
//! Ranks are never stored; they are derived from descending score order at
//! query time.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type Score = i64;

/// Prefix shared by every ranking key in the backing store.
pub const KEY_PREFIX: &str = "leaderboard";

/// Label used for the global partition in keys and snapshots.
pub const GLOBAL_LABEL: &str = "global";

/// # Partition Key
///
/// A named, independent ranking space. Each variant is max-merged on its own;
/// none can be derived from another after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
    /// All-time ranking for one game.
    Game(String),
    /// All-time ranking across every game.
    Global,
    /// Ranking for one game on one UTC calendar date. A new date is a new key,
    /// so old days simply stop receiving writes.
    Daily(String, NaiveDate),
}

impl PartitionKey {
    pub fn game(name: impl Into<String>) -> Self {
        PartitionKey::Game(name.into())
    }

    pub fn daily(name: impl Into<String>, date: NaiveDate) -> Self {
        PartitionKey::Daily(name.into(), date)
    }

    /// The three keys a single submission fans out to.
    pub fn fan_out(game: &str, today: NaiveDate) -> [PartitionKey; 3] {
        [
            PartitionKey::game(game),
            PartitionKey::Global,
            PartitionKey::daily(game, today),
        ]
    }

    /// Key as rendered in the backing store, e.g. `leaderboard:chess:2024-03-01`.
    pub fn storage_key(&self) -> String {
        match self {
            PartitionKey::Game(game) => format!("{KEY_PREFIX}:{game}"),
            PartitionKey::Global => format!("{KEY_PREFIX}:{GLOBAL_LABEL}"),
            PartitionKey::Daily(game, date) => {
                format!("{KEY_PREFIX}:{game}:{}", date.format("%Y-%m-%d"))
            }
        }
    }

    /// Name shown to observers: the game name, or `global`.
    pub fn label(&self) -> &str {
        match self {
            PartitionKey::Game(game) | PartitionKey::Daily(game, _) => game,
            PartitionKey::Global => GLOBAL_LABEL,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// One score submission attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: UserId,
    pub game: String,
    pub score: Score,
    pub submitted_at: DateTime<Utc>,
}

/// A raw (member, score) pair inside one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub member: UserId,
    pub score: Score,
}

/// An enriched, ranked row of a leaderboard view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub username: String,
    pub score: Score,
    pub rank: u64,
}

/// A single user's standing in one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRank {
    pub user_id: UserId,
    pub username: String,
    pub score: Score,
    pub rank: u64,
}

/// # Snapshot
///
/// A fully rendered top-N view pushed to live observers. Each snapshot
/// replaces the previous one, so dropping one loses nothing the next will not
/// carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub game: String,
    pub entries: Vec<LeaderboardEntry>,
}

impl Snapshot {
    pub const LEADERBOARD_UPDATE: &'static str = "leaderboard_update";

    pub fn leaderboard(key: &PartitionKey, entries: Vec<LeaderboardEntry>) -> Self {
        Self {
            kind: Self::LEADERBOARD_UPDATE.to_string(),
            game: key.label().to_string(),
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// An identity already authenticated by the transport layer. The engine trusts
/// it as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn storage_keys_render_per_tier() {
        assert_eq!(PartitionKey::game("chess").storage_key(), "leaderboard:chess");
        assert_eq!(PartitionKey::Global.storage_key(), "leaderboard:global");
        assert_eq!(
            PartitionKey::daily("chess", date(2024, 3, 1)).storage_key(),
            "leaderboard:chess:2024-03-01"
        );
    }

    #[test]
    fn fan_out_targets_three_distinct_keys() {
        let keys = PartitionKey::fan_out("go", date(2024, 1, 9));
        assert_eq!(keys[0], PartitionKey::game("go"));
        assert_eq!(keys[1], PartitionKey::Global);
        assert_eq!(keys[2], PartitionKey::daily("go", date(2024, 1, 9)));
    }

    #[test]
    fn new_day_is_a_new_key() {
        let monday = PartitionKey::daily("chess", date(2024, 3, 4));
        let tuesday = PartitionKey::daily("chess", date(2024, 3, 5));
        assert_ne!(monday.storage_key(), tuesday.storage_key());
    }

    #[test]
    fn snapshot_serializes_with_type_field() {
        let snapshot = Snapshot::leaderboard(
            &PartitionKey::Global,
            vec![LeaderboardEntry {
                user_id: 2,
                username: "bob".into(),
                score: 2000,
                rank: 1,
            }],
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["type"], "leaderboard_update");
        assert_eq!(json["game"], "global");
        assert_eq!(json["entries"][0]["user_id"], 2);
        assert_eq!(json["entries"][0]["username"], "bob");
        assert_eq!(json["entries"][0]["rank"], 1);
    }
}
