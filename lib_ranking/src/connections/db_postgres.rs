//! # PostgreSQL Directory Store
//!
//! The relational side of the service: game catalog, user directory and the
//! append-only score history, all on one `deadpool_postgres` pool.
//!
//! Every failure here (pool exhaustion, connection loss, query errors) is
//! reported as `Internal`: only the ranked store is allowed to surface
//! `StoreUnavailable`.

use async_trait::async_trait;
use deadpool_postgres::{
    Config as DeadpoolConfig, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio_postgres::{NoTls, Row};

use crate::errors::{RankingError, Result};
use crate::model::{Game, Submission, User, UserId};
use crate::repository::{GameCatalog, HistoryLog, UserDirectory};

/// Idempotent schema for the three tables the service reads and writes.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id        BIGSERIAL PRIMARY KEY,
    username  TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS games (
    id    BIGSERIAL PRIMARY KEY,
    name  TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS score_history (
    id            BIGSERIAL PRIMARY KEY,
    user_id       BIGINT NOT NULL,
    game          TEXT NOT NULL,
    score         BIGINT NOT NULL,
    submitted_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS score_history_user_idx
    ON score_history (user_id, submitted_at DESC);
"#;

fn db_error(operation: &str, e: tokio_postgres::Error) -> RankingError {
    RankingError::internal_from(format!("postgres {operation}"), e)
}

/// # PostgreSQL Store
///
/// Implements `GameCatalog`, `UserDirectory` and `HistoryLog`. Clones share
/// the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Builds a pool for `database_url` with at most `max_connections`
    /// connections. No connection is opened until the first query.
    pub fn connect(database_url: &str, max_connections: usize) -> Result<Self> {
        let mut config = DeadpoolConfig::new();
        config.url = Some(database_url.to_string());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        config.pool = Some(PoolConfig::new(max_connections));

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RankingError::internal_from("failed to create database pool", e))?;
        tracing::info!(max_connections, "database pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| RankingError::internal_from("database pool", e))
    }

    /// Creates the tables if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        self.client()
            .await?
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| db_error("migrate", e))?;
        tracing::info!("database schema ready");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.client()
            .await?
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| db_error("ping", e))
    }

    /// Registers a game, returning the existing row when the name is taken.
    pub async fn create_game(&self, name: &str) -> Result<Game> {
        let row = self
            .client()
            .await?
            .query_one(
                "INSERT INTO games (name) VALUES ($1)
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING id, name",
                &[&name],
            )
            .await
            .map_err(|e| db_error("create_game", e))?;
        game_from_row(&row)
    }

    pub async fn create_user(&self, username: &str) -> Result<User> {
        let row = self
            .client()
            .await?
            .query_one(
                "INSERT INTO users (username) VALUES ($1)
                 ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
                 RETURNING id, username",
                &[&username],
            )
            .await
            .map_err(|e| db_error("create_user", e))?;
        user_from_row(&row)
    }
}

fn game_from_row(row: &Row) -> Result<Game> {
    Ok(Game {
        id: row.try_get("id").map_err(|e| db_error("games.id", e))?,
        name: row.try_get("name").map_err(|e| db_error("games.name", e))?,
    })
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id").map_err(|e| db_error("users.id", e))?,
        username: row
            .try_get("username")
            .map_err(|e| db_error("users.username", e))?,
    })
}

fn submission_from_row(row: &Row) -> Result<Submission> {
    Ok(Submission {
        user_id: row.try_get("user_id").map_err(|e| db_error("user_id", e))?,
        game: row.try_get("game").map_err(|e| db_error("game", e))?,
        score: row.try_get("score").map_err(|e| db_error("score", e))?,
        submitted_at: row
            .try_get("submitted_at")
            .map_err(|e| db_error("submitted_at", e))?,
    })
}

#[async_trait]
impl GameCatalog for PgStore {
    async fn get_by_name(&self, name: &str) -> Result<Game> {
        let row = self
            .client()
            .await?
            .query_opt("SELECT id, name FROM games WHERE name = $1", &[&name])
            .await
            .map_err(|e| db_error("get_game", e))?;
        match row {
            Some(row) => game_from_row(&row),
            None => Err(RankingError::not_found(format!("game {name}"))),
        }
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let row = self
            .client()
            .await?
            .query_opt("SELECT id, username FROM users WHERE id = $1", &[&id])
            .await
            .map_err(|e| db_error("get_user", e))?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(RankingError::not_found(format!("user {id}"))),
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<User> {
        let row = self
            .client()
            .await?
            .query_opt(
                "SELECT id, username FROM users WHERE username = $1",
                &[&username],
            )
            .await
            .map_err(|e| db_error("get_user_by_name", e))?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(RankingError::not_found(format!("user {username}"))),
        }
    }
}

#[async_trait]
impl HistoryLog for PgStore {
    async fn append(&self, submission: &Submission) -> Result<()> {
        self.client()
            .await?
            .execute(
                "INSERT INTO score_history (user_id, game, score, submitted_at)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &submission.user_id,
                    &submission.game,
                    &submission.score,
                    &submission.submitted_at,
                ],
            )
            .await
            .map_err(|e| db_error("append_history", e))?;
        Ok(())
    }

    async fn for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Submission>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client()
            .await?
            .query(
                "SELECT user_id, game, score, submitted_at FROM score_history
                 WHERE user_id = $1
                 ORDER BY submitted_at DESC, id DESC
                 LIMIT $2",
                &[&user_id, &limit],
            )
            .await
            .map_err(|e| db_error("user_history", e))?;
        rows.iter().map(submission_from_row).collect()
    }
}
