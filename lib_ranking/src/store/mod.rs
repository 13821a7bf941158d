//! # Ranked Store
//!
//! Ordered-set contract the engine ranks against. Each partition key holds at
//! most one `(member, score)` pair per member.
//!
//! ## Ordering
//! Entries are ordered by score descending; equal scores are ordered by
//! ascending numeric member id. A member's rank is therefore
//! `1 + (members with a higher score) + (members with the same score and a
//! lower id)`. Every implementation must follow this rule exactly instead of
//! falling back to whatever order its backend happens to use.
//!
//! ## Failure mode
//! Connectivity and timeout failures surface as
//! [`RankingError::StoreUnavailable`](crate::errors::RankingError), never as
//! `Internal`.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{PartitionKey, RankingEntry, Score, UserId};

/// In-process ranked store for tests, demos and single-node deployments.
pub mod memory;

pub use memory::MemoryRankedStore;

#[async_trait]
pub trait RankedStore: Send + Sync {
    /// Sets `member`'s score in `key` to `max(current, score)`, creating the
    /// entry if absent. Must be one atomic operation against the backend so
    /// concurrent submitters for the same member cannot lose the maximum.
    ///
    /// A backend may only hold part of the `i64` range exactly. Redis keeps
    /// scores as doubles and rejects magnitudes above 2^53 with `Internal`.
    async fn submit(&self, key: &PartitionKey, member: UserId, score: Score) -> Result<()>;

    /// Up to `n` entries in ranking order.
    async fn top_n(&self, key: &PartitionKey, n: usize) -> Result<Vec<RankingEntry>>;

    /// 1-based rank and stored score of `member`, or `NotFound` if the member
    /// has no entry in `key`.
    async fn rank(&self, key: &PartitionKey, member: UserId) -> Result<(u64, Score)>;
}
