//! # lib_ranking
//!
//! Ranking and real-time update engine for multi-game leaderboards.
//!
//! A score submission is validated against the game catalog, max-merged into
//! three independent ranking partitions (per game, global, per game per day),
//! recorded in the audit history and pushed to live observers as a full
//! leaderboard snapshot.
//!
//! Backend-specific code is gated by folder-level features:
//! `connections` (Redis, PostgreSQL), `configs` (settings files) and
//! `loggers` (tracing setup). The engine itself and the in-memory backends
//! are always available.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod engine;
pub mod errors;
pub mod model;
pub mod repository;
pub mod store;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "loggers")]
pub mod loggers;

pub use engine::{
    ChannelId, EngineSettings, MemoryChannel, OutboundChannel, PublishOutcome, RankingEngine,
    UpdateBroadcaster,
};
pub use errors::{ErrorKind, RankingError, Result};
pub use model::{
    Caller, Game, LeaderboardEntry, PartitionKey, RankingEntry, Role, Score, Snapshot,
    Submission, User, UserId, UserRank,
};
pub use repository::{GameCatalog, HistoryLog, MemoryDirectory, MemoryHistoryLog, UserDirectory};
pub use store::{MemoryRankedStore, RankedStore};
