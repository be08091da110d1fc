//! Job lifecycle: at most one accepted order per worker, accept and complete
//! intents, and the cache invalidation that follows each mutation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{DataIntegrityError, Error, JobError, TransportError};
use crate::model::{Order, OrderStatus};
use crate::sync::{ResourceKey, ResourceSync};

/// Reject lists that break the single-active-job rule or repeat an id.
pub fn validate_orders(orders: &[Order]) -> Result<(), DataIntegrityError> {
    let mut seen = HashSet::with_capacity(orders.len());
    for order in orders {
        if !seen.insert(order.id.as_str()) {
            return Err(DataIntegrityError::DuplicateOrder {
                id: order.id.clone(),
            });
        }
    }

    let accepted: Vec<String> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Accepted)
        .map(|o| o.id.clone())
        .collect();
    if accepted.len() > 1 {
        return Err(DataIntegrityError::MultipleAccepted { ids: accepted });
    }
    Ok(())
}

/// The single accepted order in `orders`, if any.
pub fn current_job(orders: &[Order]) -> Result<Option<&Order>, DataIntegrityError> {
    let mut accepted = orders.iter().filter(|o| o.status == OrderStatus::Accepted);
    let first = accepted.next();
    if first.is_some() && accepted.next().is_some() {
        return Err(DataIntegrityError::MultipleAccepted {
            ids: orders
                .iter()
                .filter(|o| o.status == OrderStatus::Accepted)
                .map(|o| o.id.clone())
                .collect(),
        });
    }
    Ok(first)
}

/// Local pre-check for accepting `order_id` against a known orders list.
///
/// Only refuses what the list proves wrong; an id the list does not know is
/// left for the server to judge.
pub fn check_accept(orders: &[Order], order_id: &str) -> Result<(), JobError> {
    match current_job(orders) {
        Ok(Some(active)) if active.id != order_id => Err(JobError::AlreadyActive {
            active: active.id.clone(),
            requested: order_id.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Local pre-check for completing `order_id`.
pub fn check_complete(orders: &[Order], order_id: &str) -> Result<(), JobError> {
    match orders.iter().find(|o| o.id == order_id) {
        Some(order) if !order.status.can_transition_to(OrderStatus::Completed) => {
            Err(JobError::NotAccepted {
                id: order.id.clone(),
                status: order.status.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Server-side job mutations.
#[async_trait]
pub trait JobActions: Send + Sync {
    async fn accept(&self, order_id: &str) -> Result<(), TransportError>;
    async fn complete(&self, order_id: &str) -> Result<(), TransportError>;
}

/// Accept / complete intents wired to the cache.
pub struct JobLifecycle {
    actions: Arc<dyn JobActions>,
    sync: Arc<ResourceSync>,
}

impl JobLifecycle {
    pub fn new(actions: Arc<dyn JobActions>, sync: Arc<ResourceSync>) -> Self {
        Self { actions, sync }
    }

    /// Accept an available order. The local pre-check only consults a fresh
    /// orders list. Orders are invalidated only once the server confirms; a
    /// failed accept leaves the cache untouched.
    pub async fn accept(&self, order_id: &str) -> Result<(), Error> {
        if let Some(orders) = self.sync.cached_orders() {
            check_accept(&orders, order_id)?;
        }

        if let Err(e) = self.actions.accept(order_id).await {
            warn!(order_id, error = %e, "Accept failed");
            return Err(Error::from_transport(e));
        }
        self.sync.invalidate(&[ResourceKey::Orders]);
        info!(order_id, "Job accepted");
        Ok(())
    }

    /// Complete the active job. Both orders and earnings are invalidated on
    /// success so the next reads pick up the new history and totals.
    pub async fn complete(&self, order_id: &str) -> Result<(), Error> {
        if let Some(orders) = self.sync.cached_orders() {
            check_complete(&orders, order_id)?;
        }

        if let Err(e) = self.actions.complete(order_id).await {
            warn!(order_id, error = %e, "Complete failed");
            return Err(Error::from_transport(e));
        }
        self.sync
            .invalidate(&[ResourceKey::Orders, ResourceKey::Earnings]);
        info!(order_id, "Job completed");
        Ok(())
    }
}
