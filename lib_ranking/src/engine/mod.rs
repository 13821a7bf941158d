//! # Engine Module
//!
//! The two moving parts of the ranking core:
//!
//! - **`ranking`**: the `RankingEngine`, which validates submissions, fans
//!   them out across partitions with max-merge, records history and answers
//!   leaderboard and rank queries.
//! - **`broadcaster`**: the `UpdateBroadcaster`, a bounded queue plus one
//!   dispatch task that pushes snapshots to live observers.

/// Submission fan-out and leaderboard queries.
pub mod ranking;
/// Best-effort snapshot delivery to live observers.
pub mod broadcaster;

pub use broadcaster::{
    BroadcastStats, ChannelError, ChannelId, MemoryChannel, OutboundChannel, PublishOutcome,
    UpdateBroadcaster,
};
pub use ranking::{Clock, EngineSettings, RankingEngine};
