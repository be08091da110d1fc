//! Resource synchronizer.
//!
//! Keeps one cache entry per remote resource (orders, earnings), collapses
//! concurrent fetches of the same key into one network call, and serves the
//! fixed offline dataset when a read fails on the wire. Nothing served from
//! the fallback is ever written to the cache.

pub mod fallback;
pub mod poller;
mod slot;

pub use fallback::{FallbackProvider, OfflineDataset};
pub use poller::spawn_orders_poller;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{DataIntegrityError, Error, TransportError};
use crate::lifecycle;
use crate::model::{Earnings, Order};
use slot::{FetchResult, Fetcher, Read, ResourceSlot};

/// Event channel capacity. Slow subscribers lag rather than block fetches.
const EVENT_CAPACITY: usize = 64;

/// Cacheable remote resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Orders,
    Earnings,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orders => write!(f, "orders"),
            Self::Earnings => write!(f, "earnings"),
        }
    }
}

/// What triggered a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// A read found no fresh entry.
    Cold,
    /// The periodic poller.
    Background,
    /// Pull-to-refresh.
    Manual,
}

/// Where a snapshot's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Network,
    Cache,
    /// The fixed offline dataset. Never cached.
    Fallback,
}

/// A resource value together with its provenance.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    pub source: DataSource,
}

impl<T> Snapshot<T> {
    pub fn is_offline(&self) -> bool {
        self.source == DataSource::Fallback
    }
}

/// Per-key indicators for the screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStatus {
    /// Any fetch is in flight.
    pub fetching: bool,
    /// The in-flight fetch is a manual refresh.
    pub refreshing: bool,
    /// The next read will go to the network.
    pub stale: bool,
    /// Age of the cached value, if there is one.
    pub age: Option<Duration>,
}

/// Cache activity, for screens that re-render on change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    FetchStarted { key: ResourceKey, mode: FetchMode, seq: u64 },
    Updated { key: ResourceKey, seq: u64 },
    FetchDiscarded { key: ResourceKey, seq: u64 },
    FetchFailed { key: ResourceKey, seq: u64 },
    Invalidated { key: ResourceKey },
    Cleared { key: ResourceKey },
    FallbackServed { key: ResourceKey },
}

/// Why a fetch produced no value.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum FetchFailure {
    #[error(transparent)]
    Transport(TransportError),
    #[error(transparent)]
    Integrity(DataIntegrityError),
}

impl From<FetchFailure> for Error {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Transport(e) => Error::from_transport(e),
            FetchFailure::Integrity(e) => e.into(),
        }
    }
}

/// Remote reads the synchronizer caches.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<Order>, TransportError>;
    async fn fetch_earnings(&self) -> Result<Earnings, TransportError>;
}

/// Cache of remote resources shared by every screen.
pub struct ResourceSync {
    orders: ResourceSlot<Vec<Order>>,
    earnings: ResourceSlot<Earnings>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    events: broadcast::Sender<SyncEvent>,
}

impl ResourceSync {
    /// `fallback` is consulted only if the config enables offline fallback.
    pub fn new(
        source: Arc<dyn ResourceSource>,
        config: &ClientConfig,
        fallback: Option<Arc<dyn FallbackProvider>>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);

        let orders_source = Arc::clone(&source);
        let fetch_orders: Fetcher<Vec<Order>> = Arc::new(move || {
            let source = Arc::clone(&orders_source);
            async move {
                let orders = source
                    .fetch_orders()
                    .await
                    .map_err(FetchFailure::Transport)?;
                lifecycle::validate_orders(&orders).map_err(FetchFailure::Integrity)?;
                Ok::<_, FetchFailure>(orders)
            }
            .boxed()
        });

        let fetch_earnings: Fetcher<Earnings> = Arc::new(move || {
            let source = Arc::clone(&source);
            async move {
                source
                    .fetch_earnings()
                    .await
                    .map_err(FetchFailure::Transport)
            }
            .boxed()
        });

        Self {
            orders: ResourceSlot::new(
                ResourceKey::Orders,
                config.orders_stale_after,
                fetch_orders,
                events.clone(),
            ),
            earnings: ResourceSlot::new(
                ResourceKey::Earnings,
                config.earnings_stale_after,
                fetch_earnings,
                events.clone(),
            ),
            fallback: fallback.filter(|_| config.offline_fallback),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Orders list: cached if fresh, otherwise fetched (or joined).
    pub async fn orders(&self) -> Result<Snapshot<Vec<Order>>, Error> {
        let read = self.orders.read().await;
        self.settle_read(ResourceKey::Orders, read, |f| f.orders())
    }

    /// Pull-to-refresh for orders.
    pub async fn refresh_orders(&self) -> Result<Snapshot<Vec<Order>>, Error> {
        let result = self.orders.fetch(FetchMode::Manual).await;
        self.settle(ResourceKey::Orders, result, |f| f.orders())
    }

    /// One background poll. Failures are returned, never papered over with
    /// fallback data.
    pub async fn poll_orders(&self) -> Result<Arc<Vec<Order>>, Error> {
        Ok(self.orders.fetch(FetchMode::Background).await?)
    }

    pub async fn earnings(&self) -> Result<Snapshot<Earnings>, Error> {
        let read = self.earnings.read().await;
        self.settle_read(ResourceKey::Earnings, read, |f| f.earnings())
    }

    pub async fn refresh_earnings(&self) -> Result<Snapshot<Earnings>, Error> {
        let result = self.earnings.fetch(FetchMode::Manual).await;
        self.settle(ResourceKey::Earnings, result, |f| f.earnings())
    }

    /// The worker's single accepted order, if any.
    pub async fn current_job(&self) -> Result<Option<Order>, Error> {
        let orders = self.orders().await?;
        Ok(lifecycle::current_job(&orders.value)?.cloned())
    }

    /// Mark keys stale so their next read goes to the network.
    pub fn invalidate(&self, keys: &[ResourceKey]) {
        for key in keys {
            match key {
                ResourceKey::Orders => self.orders.invalidate(),
                ResourceKey::Earnings => self.earnings.invalidate(),
            }
        }
    }

    /// Orders list a warm read would serve right now, if any. Never fetches.
    pub fn cached_orders(&self) -> Option<Arc<Vec<Order>>> {
        self.orders.peek()
    }

    pub fn cached_earnings(&self) -> Option<Arc<Earnings>> {
        self.earnings.peek()
    }

    pub fn status(&self, key: ResourceKey) -> ResourceStatus {
        match key {
            ResourceKey::Orders => self.orders.status(),
            ResourceKey::Earnings => self.earnings.status(),
        }
    }

    /// Forget everything. Used when the session ends.
    pub fn reset(&self) {
        self.orders.clear();
        self.earnings.clear();
    }

    fn settle_read<T>(
        &self,
        key: ResourceKey,
        read: Read<T>,
        fallback: impl FnOnce(&dyn FallbackProvider) -> T,
    ) -> Result<Snapshot<T>, Error> {
        match read {
            Read::Cached(value) => Ok(Snapshot {
                value,
                source: DataSource::Cache,
            }),
            Read::Fetched(result) => self.settle(key, result, fallback),
        }
    }

    fn settle<T>(
        &self,
        key: ResourceKey,
        result: FetchResult<T>,
        fallback: impl FnOnce(&dyn FallbackProvider) -> T,
    ) -> Result<Snapshot<T>, Error> {
        match result {
            Ok(value) => Ok(Snapshot {
                value,
                source: DataSource::Network,
            }),
            Err(FetchFailure::Transport(e)) if !e.is_auth_failure() => match &self.fallback {
                Some(provider) => {
                    warn!(key = %key, error = %e, "Serving offline data");
                    let _ = self.events.send(SyncEvent::FallbackServed { key });
                    Ok(Snapshot {
                        value: Arc::new(fallback(provider.as_ref())),
                        source: DataSource::Fallback,
                    })
                }
                None => Err(Error::Transport(e)),
            },
            Err(failure) => Err(failure.into()),
        }
    }
}
