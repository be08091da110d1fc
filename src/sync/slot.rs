//! One cache key: entry, staleness, single-flight and commit ordering.
//!
//! Every fetch gets a sequence number from `issued_seq`. A resolved fetch
//! commits only when its sequence is newer than the committed one and not
//! below `floor_seq`, the first sequence issued after the last invalidation.
//! Everything else is discarded and its waiters are handed the newer value.
//!
//! The slot lock is never held across an await.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{FetchFailure, FetchMode, ResourceKey, ResourceStatus, SyncEvent};
use crate::error::TransportError;

pub(crate) type FetchFuture<T> = BoxFuture<'static, Result<T, FetchFailure>>;
pub(crate) type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;
pub(crate) type FetchResult<T> = Result<Arc<T>, FetchFailure>;
type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
    invalidated: bool,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, stale_after: Duration) -> bool {
        !self.invalidated && self.fetched_at.elapsed() <= stale_after
    }
}

struct InFlight<T> {
    seq: u64,
    mode: FetchMode,
    fetch: SharedFetch<T>,
}

struct SlotState<T> {
    entry: Option<CacheEntry<T>>,
    issued_seq: u64,
    committed_seq: u64,
    floor_seq: u64,
    in_flight: Option<InFlight<T>>,
    /// A manual refresh detached by invalidation that is still running.
    detached_manual: Option<u64>,
}

/// Outcome of a plain read.
pub(crate) enum Read<T> {
    /// Served from a fresh entry without a network call.
    Cached(Arc<T>),
    /// Came from (or joined) a fetch.
    Fetched(FetchResult<T>),
}

pub(crate) struct ResourceSlot<T> {
    key: ResourceKey,
    stale_after: Duration,
    fetcher: Fetcher<T>,
    state: Arc<Mutex<SlotState<T>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl<T: Send + Sync + 'static> ResourceSlot<T> {
    pub(crate) fn new(
        key: ResourceKey,
        stale_after: Duration,
        fetcher: Fetcher<T>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            key,
            stale_after,
            fetcher,
            state: Arc::new(Mutex::new(SlotState {
                entry: None,
                issued_seq: 0,
                committed_seq: 0,
                floor_seq: 0,
                in_flight: None,
                detached_manual: None,
            })),
            events,
        }
    }

    /// Warm reads return the entry; cold or stale reads start a fetch or
    /// join the one already running.
    pub(crate) async fn read(&self) -> Read<T> {
        let fetch = {
            let mut state = self.state.lock();
            if let Some(entry) = state
                .entry
                .as_ref()
                .filter(|e| e.is_fresh(self.stale_after))
            {
                debug!(key = %self.key, "Cache hit");
                return Read::Cached(Arc::clone(&entry.value));
            }
            match &state.in_flight {
                Some(in_flight) => {
                    debug!(key = %self.key, seq = in_flight.seq, "Joining in-flight fetch");
                    in_flight.fetch.clone()
                }
                None => self.start(&mut state, FetchMode::Cold),
            }
        };
        Read::Fetched(fetch.await)
    }

    /// Fetch regardless of staleness.
    ///
    /// Background and cold fetches join whatever is in flight. A manual
    /// refresh joins only another manual refresh; it supersedes a cold or
    /// background fetch by starting a newer one.
    pub(crate) async fn fetch(&self, mode: FetchMode) -> FetchResult<T> {
        let fetch = {
            let mut state = self.state.lock();
            let joinable = match &state.in_flight {
                Some(in_flight)
                    if mode != FetchMode::Manual || in_flight.mode == FetchMode::Manual =>
                {
                    Some(in_flight.fetch.clone())
                }
                _ => None,
            };
            match joinable {
                Some(fetch) => fetch,
                None => self.start(&mut state, mode),
            }
        };
        fetch.await
    }

    /// Mark the entry stale and detach any in-flight fetch so the next read
    /// goes to the network. Fetches issued before this call never commit.
    pub(crate) fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.entry.as_mut() {
                entry.invalidated = true;
            }
            state.floor_seq = state.issued_seq + 1;
            if let Some(detached) = state.in_flight.take() {
                debug!(key = %self.key, seq = detached.seq, "Detached in-flight fetch on invalidation");
                if detached.mode == FetchMode::Manual {
                    state.detached_manual = Some(detached.seq);
                }
            }
        }
        debug!(key = %self.key, "Cache invalidated");
        let _ = self.events.send(SyncEvent::Invalidated { key: self.key });
    }

    /// Drop the entry entirely (session change).
    pub(crate) fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entry = None;
            state.floor_seq = state.issued_seq + 1;
            state.in_flight = None;
            state.detached_manual = None;
        }
        let _ = self.events.send(SyncEvent::Cleared { key: self.key });
    }

    /// The entry a warm read would serve, without fetching. Stale and
    /// invalidated entries yield `None`.
    pub(crate) fn peek(&self) -> Option<Arc<T>> {
        self.state
            .lock()
            .entry
            .as_ref()
            .filter(|e| e.is_fresh(self.stale_after))
            .map(|e| Arc::clone(&e.value))
    }

    pub(crate) fn status(&self) -> ResourceStatus {
        let state = self.state.lock();
        let refreshing = state.detached_manual.is_some()
            || state
                .in_flight
                .as_ref()
                .is_some_and(|f| f.mode == FetchMode::Manual);
        ResourceStatus {
            fetching: refreshing || state.in_flight.is_some(),
            refreshing,
            stale: !state
                .entry
                .as_ref()
                .is_some_and(|e| e.is_fresh(self.stale_after)),
            age: state.entry.as_ref().map(|e| e.fetched_at.elapsed()),
        }
    }

    /// Issue a new fetch on a spawned task. Must be called with the slot
    /// locked so the in-flight marker is visible before anyone else looks.
    fn start(&self, state: &mut SlotState<T>, mode: FetchMode) -> SharedFetch<T> {
        state.issued_seq += 1;
        let seq = state.issued_seq;
        let key = self.key;

        let fetch = (self.fetcher)();
        let slot_state = Arc::clone(&self.state);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            commit(&slot_state, &events, key, seq, result)
        });

        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(FetchFailure::Transport(TransportError::network(format!(
                    "fetch task ended abnormally: {e}"
                ))))
            })
        }
        .boxed()
        .shared();

        if let Some(previous) = state.in_flight.replace(InFlight {
            seq,
            mode,
            fetch: shared.clone(),
        }) {
            debug!(key = %key, seq, superseded = previous.seq, "Superseding in-flight fetch");
        }
        debug!(key = %key, seq, mode = ?mode, "Fetch started");
        let _ = self.events.send(SyncEvent::FetchStarted { key, mode, seq });
        shared
    }
}

fn commit<T>(
    state: &Mutex<SlotState<T>>,
    events: &broadcast::Sender<SyncEvent>,
    key: ResourceKey,
    seq: u64,
    result: Result<T, FetchFailure>,
) -> FetchResult<T> {
    let mut state = state.lock();
    if state.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
        state.in_flight = None;
    }
    if state.detached_manual == Some(seq) {
        state.detached_manual = None;
    }

    let newer = match &state.entry {
        Some(entry) if state.committed_seq > seq => Some(Arc::clone(&entry.value)),
        _ => None,
    };

    let value = match result {
        Ok(value) => Arc::new(value),
        Err(failure) => {
            warn!(key = %key, seq, error = %failure, "Fetch failed");
            let _ = events.send(SyncEvent::FetchFailed { key, seq });
            // A newer fetch already landed; its waiters would have got it too.
            return newer.ok_or(failure);
        }
    };

    if seq >= state.floor_seq && seq > state.committed_seq {
        state.entry = Some(CacheEntry {
            value: Arc::clone(&value),
            fetched_at: Instant::now(),
            invalidated: false,
        });
        state.committed_seq = seq;
        debug!(key = %key, seq, "Cache entry committed");
        let _ = events.send(SyncEvent::Updated { key, seq });
        return Ok(value);
    }

    debug!(
        key = %key,
        seq,
        committed = state.committed_seq,
        floor = state.floor_seq,
        "Discarding superseded fetch"
    );
    let _ = events.send(SyncEvent::FetchDiscarded { key, seq });
    Ok(newer.unwrap_or(value))
}
