use std::sync::Arc;

use lib_ranking::configs::RankingSettings;
use lib_ranking::connections::{PgStore, RedisRankedStore};
use lib_ranking::{RankingEngine, Result, UpdateBroadcaster};

/// Shared handles passed to every handler. Clones are cheap.
#[derive(Clone)]
pub struct AppState {
    pub engine: RankingEngine,
    pub broadcaster: UpdateBroadcaster,
}

impl AppState {
    pub fn new(engine: RankingEngine, broadcaster: UpdateBroadcaster) -> Self {
        Self {
            engine,
            broadcaster,
        }
    }

    /// Connects Redis and PostgreSQL, prepares the schema and starts the
    /// broadcaster's dispatch task.
    pub async fn connect(settings: &RankingSettings) -> Result<Self> {
        let store = RedisRankedStore::connect(&settings.redis_url).await?;
        store.ping().await?;

        let pg = PgStore::connect(&settings.database_url, settings.db_max_connections)?;
        pg.migrate().await?;
        let pg = Arc::new(pg);

        let broadcaster =
            UpdateBroadcaster::spawn(settings.broadcast_capacity, settings.channel_write_timeout());
        let engine = RankingEngine::new(
            Arc::new(store),
            pg.clone(),
            pg.clone(),
            pg,
            settings.into(),
        )
        .with_broadcaster(broadcaster.clone());

        Ok(Self::new(engine, broadcaster))
    }
}
