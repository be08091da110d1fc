use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::ResourceSync;
use crate::session::Session;

/// Refresh orders every `period` while a worker is signed in.
///
/// The first poll happens one period after spawning. Ticks are skipped while
/// the session is not authenticated, and a poll that overruns the period
/// delays the next tick instead of bursting. Abort the handle to stop.
pub fn spawn_orders_poller(
    sync: Arc<ResourceSync>,
    session: Arc<Session>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !session.is_authenticated().await {
                debug!("Skipping orders poll, no active session");
                continue;
            }
            match sync.poll_orders().await {
                Ok(orders) => debug!(count = orders.len(), "Orders poll complete"),
                Err(e) => warn!(error = %e, "Orders poll failed"),
            }
        }
    })
}
