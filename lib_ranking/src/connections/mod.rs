//! # Connections Module
//!
//! Backends for the storage traits, talking to external services.

/// Redis sorted-set implementation of `RankedStore`.
pub mod cache_redis;

/// PostgreSQL implementation of the catalog, directory and history traits.
pub mod db_postgres;

pub use cache_redis::RedisRankedStore;
pub use db_postgres::PgStore;
