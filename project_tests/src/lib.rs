//! Shared fixtures for the cross-module scenario tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lib_ranking::engine::{ChannelError, Clock};
use lib_ranking::{
    EngineSettings, MemoryDirectory, MemoryHistoryLog, MemoryRankedStore, OutboundChannel,
    RankingEngine, UpdateBroadcaster,
};
use tokio::sync::Semaphore;

/// An engine wired to in-memory backends, with handles to inspect them.
pub struct Harness {
    pub engine: RankingEngine,
    pub store: Arc<MemoryRankedStore>,
    pub directory: Arc<MemoryDirectory>,
    pub history: Arc<MemoryHistoryLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_broadcaster(broadcaster: UpdateBroadcaster) -> Self {
        Self::build(Some(broadcaster))
    }

    /// Pins the engine's clock so daily partitions are deterministic.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.engine = self.engine.with_clock(clock);
        self
    }

    fn build(broadcaster: Option<UpdateBroadcaster>) -> Self {
        let store = Arc::new(MemoryRankedStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let history = Arc::new(MemoryHistoryLog::new());
        let mut engine = RankingEngine::new(
            store.clone(),
            directory.clone(),
            directory.clone(),
            history.clone(),
            EngineSettings::default(),
        );
        if let Some(broadcaster) = broadcaster {
            engine = engine.with_broadcaster(broadcaster);
        }
        Self {
            engine,
            store,
            directory,
            history,
        }
    }
}

/// Midday UTC on `day`, as a clock that never advances.
pub fn fixed_clock(day: NaiveDate) -> Clock {
    let at: DateTime<Utc> = Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).unwrap());
    Arc::new(move || at)
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// An observer whose writes wait for a permit, simulating a slow client.
pub struct GatedChannel {
    gate: Arc<Semaphore>,
    seen: AtomicU64,
}

impl GatedChannel {
    pub fn closed_gate() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let channel = Arc::new(Self {
            gate: gate.clone(),
            seen: AtomicU64::new(0),
        });
        (channel, gate)
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundChannel for GatedChannel {
    async fn write(&self, _payload: Bytes) -> Result<(), ChannelError> {
        let permit = self.gate.acquire().await.map_err(|_| ChannelError::Closed)?;
        permit.forget();
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}

/// Polls `check` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
