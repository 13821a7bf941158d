//! # Repository Contracts
//!
//! Collaborators the engine consumes but does not own: the game catalog, the
//! user directory and the append-only submission history.
//!
//! The PostgreSQL implementations live in `connections::db_postgres`; the
//! in-memory ones here back tests and single-process demos.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{Game, Submission, User, UserId};

/// In-process catalog, directory and history.
pub mod memory;

pub use memory::{MemoryDirectory, MemoryHistoryLog};

/// Existence lookup for games.
#[async_trait]
pub trait GameCatalog: Send + Sync {
    /// `NotFound` when no game carries `name`.
    async fn get_by_name(&self, name: &str) -> Result<Game>;
}

/// Identity lookup used to enrich ranking entries with display names.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: UserId) -> Result<User>;

    async fn get_by_username(&self, username: &str) -> Result<User>;
}

/// Append-only audit trail of every submission attempt, kept regardless of
/// the ranking outcome.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, submission: &Submission) -> Result<()>;

    /// Most recent submissions of `user_id`, newest first.
    async fn for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Submission>>;
}
