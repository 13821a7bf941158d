//! # Leaderboard Update Broadcaster
//!
//! Pushes full leaderboard snapshots to every connected observer.
//!
//! ## Core Design:
//!
//! 1.  **Non-blocking publish**: `publish` never waits. It places the snapshot
//!     on a bounded queue; when the queue is full the snapshot being published
//!     (the newest one) is dropped. Every snapshot is a complete replacement,
//!     so the next successful publish carries everything a dropped one would
//!     have.
//!
//! 2.  **Single dispatch task**: one background task drains the queue,
//!     serializes each snapshot once and writes the same bytes to every
//!     registered channel.
//!
//! 3.  **Per-channel failure isolation**: a failed or timed-out write removes
//!     only that channel. The remaining writes for the same snapshot still go
//!     out.
//!
//! 4.  **Idempotent shutdown**: `shutdown` stops intake, lets the dispatch task
//!     deliver what is already queued, then force-closes every channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::Snapshot;

/// Default queue capacity between `publish` and the dispatch task.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default bound on a single channel write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("channel write failed: {0}")]
    Write(String),
}

/// A push-only connection to one live observer (e.g. a WebSocket session).
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn write(&self, payload: Bytes) -> Result<(), ChannelError>;

    /// Force-closes the connection. Called at most once by the broadcaster.
    async fn close(&self);
}

/// Identifier handed out on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    Dropped,
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub queued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub evicted: u64,
}

struct ChannelHandle {
    id: ChannelId,
    channel: Arc<dyn OutboundChannel>,
}

type ChannelList = Arc<Mutex<Vec<ChannelHandle>>>;

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

struct Inner {
    sender: mpsc::Sender<Snapshot>,
    channels: ChannelList,
    counters: Arc<Counters>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    write_timeout: Duration,
}

/// # Update Broadcaster
///
/// Cheap to clone; all clones share one queue, one channel set and one
/// dispatch task.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    inner: Arc<Inner>,
}

impl UpdateBroadcaster {
    /// Creates the broadcaster and spawns its dispatch task on the current
    /// tokio runtime.
    pub fn spawn(capacity: usize, write_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let channels: ChannelList = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(dispatch_loop(
            receiver,
            Arc::clone(&channels),
            Arc::clone(&counters),
            shutdown.clone(),
            write_timeout,
        ));

        tracing::info!(capacity, "update broadcaster started");
        Self {
            inner: Arc::new(Inner {
                sender,
                channels,
                counters,
                next_id: AtomicU64::new(1),
                shutdown,
                dispatcher: Mutex::new(Some(task)),
                closed: AtomicBool::new(false),
                write_timeout,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::spawn(DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT)
    }

    /// Adds a channel to the fan-out set. After shutdown the channel is closed
    /// immediately instead.
    pub async fn register(&self, channel: Arc<dyn OutboundChannel>) -> ChannelId {
        let id = ChannelId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        // `shutdown` flips `closed` under the same lock, so a channel is
        // either pushed before the final drain or rejected here.
        let total = {
            let mut channels = lock_channels(&self.inner.channels);
            if self.inner.closed.load(Ordering::SeqCst) {
                None
            } else {
                channels.push(ChannelHandle {
                    id,
                    channel: Arc::clone(&channel),
                });
                Some(channels.len())
            }
        };
        match total {
            Some(total) => tracing::info!(%id, total, "observer registered"),
            None => {
                tracing::debug!(%id, "registration after shutdown, closing channel");
                channel.close().await;
            }
        }
        id
    }

    /// Removes a channel, e.g. after the transport saw a read error or close
    /// frame. Returns false if it was already gone.
    pub fn unregister(&self, id: ChannelId) -> bool {
        let mut channels = lock_channels(&self.inner.channels);
        let before = channels.len();
        channels.retain(|c| c.id != id);
        let removed = channels.len() != before;
        if removed {
            tracing::info!(%id, "observer removed");
        }
        removed
    }

    /// Queues a snapshot for delivery without waiting.
    pub fn publish(&self, snapshot: Snapshot) -> PublishOutcome {
        match self.inner.sender.try_send(snapshot) {
            Ok(()) => {
                self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(snapshot)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    game = %snapshot.game,
                    "broadcast queue full, dropping newest snapshot"
                );
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("broadcaster shut down, snapshot discarded");
                PublishOutcome::Dropped
            }
        }
    }

    pub fn channel_count(&self) -> usize {
        lock_channels(&self.inner.channels).len()
    }

    pub fn stats(&self) -> BroadcastStats {
        let c = &self.inner.counters;
        BroadcastStats {
            queued: c.queued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stops the dispatch task and closes every registered channel. Only the
    /// first call does any work.
    pub async fn shutdown(&self) {
        let already_closed = {
            let _channels = lock_channels(&self.inner.channels);
            self.inner.closed.swap(true, Ordering::SeqCst)
        };
        if already_closed {
            return;
        }
        self.inner.shutdown.cancel();

        let task = self
            .inner
            .dispatcher
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or(None);
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("broadcast dispatch task failed: {}", e);
            }
        }

        let remaining: Vec<ChannelHandle> = lock_channels(&self.inner.channels).drain(..).collect();
        let count = remaining.len();
        let timeout = self.inner.write_timeout;
        join_all(remaining.into_iter().map(|handle| async move {
            if tokio::time::timeout(timeout, handle.channel.close()).await.is_err() {
                tracing::warn!(id = %handle.id, "observer close timed out");
            }
        }))
        .await;
        tracing::info!(closed = count, "update broadcaster shut down");
    }
}

fn lock_channels(channels: &ChannelList) -> std::sync::MutexGuard<'_, Vec<ChannelHandle>> {
    // A panic while holding the lock cannot leave the Vec half-updated.
    channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<Snapshot>,
    channels: ChannelList,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(snapshot) => deliver(&channels, &counters, snapshot, write_timeout).await,
                None => return,
            },
        }
    }

    // Drain what was accepted before shutdown.
    receiver.close();
    while let Some(snapshot) = receiver.recv().await {
        deliver(&channels, &counters, snapshot, write_timeout).await;
    }
    tracing::debug!("broadcast dispatch task finished");
}

async fn deliver(
    channels: &ChannelList,
    counters: &Counters,
    snapshot: Snapshot,
    write_timeout: Duration,
) {
    let payload = match serde_json::to_vec(&snapshot) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::error!("failed to serialize snapshot for {}: {}", snapshot.game, e);
            return;
        }
    };

    // Writes happen outside the lock; the set may change meanwhile.
    let targets: Vec<(ChannelId, Arc<dyn OutboundChannel>)> = lock_channels(channels)
        .iter()
        .map(|h| (h.id, Arc::clone(&h.channel)))
        .collect();
    if targets.is_empty() {
        return;
    }

    let results = join_all(targets.into_iter().map(|(id, channel)| {
        let payload = payload.clone();
        async move {
            let outcome = match tokio::time::timeout(write_timeout, channel.write(payload)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("write exceeded {}ms", write_timeout.as_millis())),
            };
            (id, channel, outcome)
        }
    }))
    .await;

    let mut failed = Vec::new();
    for (id, channel, outcome) in results {
        match outcome {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                tracing::warn!(%id, "observer write failed, removing: {}", reason);
                failed.push((id, channel));
            }
        }
    }
    if failed.is_empty() {
        return;
    }

    lock_channels(channels).retain(|h| !failed.iter().any(|(id, _)| *id == h.id));
    counters
        .evicted
        .fetch_add(failed.len() as u64, Ordering::Relaxed);
    for (_, channel) in failed {
        let _ = tokio::time::timeout(write_timeout, channel.close()).await;
    }
}

/// # Memory Channel
///
/// In-process observer backed by an unbounded queue. A dropped receiver reads
/// as a disconnect.
pub struct MemoryChannel {
    sender: mpsc::UnboundedSender<Bytes>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            sender,
            closed: AtomicBool::new(false),
        });
        (channel, receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundChannel for MemoryChannel {
    async fn write(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.sender.send(payload).map_err(|_| ChannelError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
