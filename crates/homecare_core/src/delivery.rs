//! crates/homecare_core/src/delivery.rs
//!
//! The delivery service drives the PIN handshake: dispatch, verification,
//! reset and cancellation of orders.
//!
//! Writes go through `OrderStore::compare_and_swap`. A transition is computed
//! from a fresh read and only lands if no other writer touched the order in
//! between; otherwise the read and the transition are repeated.

use mockable::Clock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{AttemptOutcome, DeliveryOrder, VerificationAttempt, DEFAULT_RETRY_LIMIT};
use crate::error::{ServiceError, ServiceResult};
use crate::pin::{Pin, VerificationOutcome};
use crate::ports::{OrderStore, PortError, VerificationAuditLog};

/// How often a transition is recomputed after losing a compare-and-swap race.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Loads `order_id`, applies `transition` and writes the result back
/// conditionally, retrying on concurrent modification.
pub(crate) async fn update_order<T, F>(
    orders: &dyn OrderStore,
    order_id: &str,
    mut transition: F,
) -> ServiceResult<(DeliveryOrder, T)>
where
    F: FnMut(&DeliveryOrder) -> ServiceResult<(DeliveryOrder, T)>,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let current = load_order(orders, order_id).await?;
        let (mut next, value) = transition(&current)?;
        if orders.compare_and_swap(current.version, &next).await? {
            next.version = current.version + 1;
            return Ok((next, value));
        }
        debug!(order_id, attempt, "Order changed concurrently; retrying transition.");
    }
    Err(ServiceError::Conflict(format!(
        "order {order_id} is being modified concurrently; try again"
    )))
}

pub(crate) async fn load_order(
    orders: &dyn OrderStore,
    order_id: &str,
) -> ServiceResult<DeliveryOrder> {
    orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("order {order_id} not found")))
}

/// The full result of one PIN entry, including the audit record.
#[derive(Debug, Clone)]
pub struct PinVerification {
    pub order: DeliveryOrder,
    pub outcome: VerificationOutcome,
    pub attempt: VerificationAttempt,
}

/// Service owning the PIN issuance and verification state machine.
#[derive(Clone)]
pub struct DeliveryService {
    orders: Arc<dyn OrderStore>,
    audit: Arc<dyn VerificationAuditLog>,
    clock: Arc<dyn Clock>,
    retry_limit: u8,
}

impl DeliveryService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        audit: Arc<dyn VerificationAuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            audit,
            clock,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    /// Overrides the number of attempts granted on dispatch and reset.
    ///
    /// Orders already issued keep their own remaining-attempts counter.
    pub fn with_retry_limit(mut self, retry_limit: u8) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    /// Creates an order on dispatch with a fresh PIN.
    pub async fn dispatch_order(
        &self,
        order_id: &str,
        items: Vec<String>,
    ) -> ServiceResult<DeliveryOrder> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(ServiceError::validation("order id is required"));
        }
        if items.is_empty() {
            return Err(ServiceError::validation("an order needs at least one item"));
        }
        if items.iter().any(|item| item.trim().is_empty()) {
            return Err(ServiceError::validation("item ids must not be empty"));
        }
        let distinct: BTreeSet<&String> = items.iter().collect();
        if distinct.len() != items.len() {
            return Err(ServiceError::validation("item ids must be unique"));
        }

        let pin = Pin::generate(&mut rand::thread_rng(), None);
        let order = DeliveryOrder::dispatched(
            order_id.to_string(),
            pin,
            items,
            self.retry_limit,
            self.clock.utc(),
        );
        self.orders.insert_order(&order).await.map_err(|e| match e {
            PortError::AlreadyExists(_) => {
                ServiceError::invalid_state(format!("order {order_id} already exists"))
            }
            other => ServiceError::Port(other),
        })?;

        info!(order_id, items = order.items.len(), "Order dispatched.");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> ServiceResult<DeliveryOrder> {
        load_order(self.orders.as_ref(), order_id).await
    }

    /// Checks `entered_pin` against the order's PIN on behalf of `agent_id`.
    pub async fn verify_pin(
        &self,
        order_id: &str,
        entered_pin: &str,
        agent_id: &str,
    ) -> ServiceResult<PinVerification> {
        let entered = Pin::parse(entered_pin)?;
        if agent_id.trim().is_empty() {
            return Err(ServiceError::validation("agent id is required"));
        }

        let now = self.clock.utc();
        let (order, outcome) = update_order(self.orders.as_ref(), order_id, |order| {
            order.apply_pin_attempt(&entered, agent_id, now)
        })
        .await?;

        let attempt = VerificationAttempt {
            order_id: order.id.clone(),
            agent_id: agent_id.to_string(),
            attempted_at: now,
            outcome: outcome.attempt_outcome(),
            remaining_attempts: order.remaining_attempts,
        };
        self.record_attempt(&attempt).await;

        Ok(PinVerification {
            order,
            outcome,
            attempt,
        })
    }

    /// Issues a new PIN, invalidating the old one immediately.
    pub async fn reset_pin(
        &self,
        order_id: &str,
        reason: &str,
        requested_by: &str,
    ) -> ServiceResult<DeliveryOrder> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::validation("a reason is required to reset a PIN"));
        }

        let retry_limit = self.retry_limit;
        let (order, ()) = update_order(self.orders.as_ref(), order_id, |order| {
            let new_pin = Pin::generate(&mut rand::thread_rng(), Some(&order.pin));
            Ok((order.apply_pin_reset(new_pin, retry_limit)?, ()))
        })
        .await?;

        info!(
            order_id,
            requested_by,
            reason,
            retry_limit,
            "Delivery PIN reset."
        );
        Ok(order)
    }

    pub async fn cancel_order(
        &self,
        order_id: &str,
        requested_by: &str,
    ) -> ServiceResult<DeliveryOrder> {
        let (order, ()) = update_order(self.orders.as_ref(), order_id, |order| {
            Ok((order.apply_cancel()?, ()))
        })
        .await?;
        info!(order_id, requested_by, "Order cancelled.");
        Ok(order)
    }

    /// The audited PIN entries for an order, oldest first.
    pub async fn verification_history(
        &self,
        order_id: &str,
    ) -> ServiceResult<Vec<VerificationAttempt>> {
        load_order(self.orders.as_ref(), order_id).await?;
        Ok(self.audit.attempts_for_order(order_id).await?)
    }

    async fn record_attempt(&self, attempt: &VerificationAttempt) {
        match attempt.outcome {
            AttemptOutcome::Verified => info!(
                order_id = %attempt.order_id,
                agent_id = %attempt.agent_id,
                "Delivery PIN verified."
            ),
            AttemptOutcome::Rejected => info!(
                order_id = %attempt.order_id,
                agent_id = %attempt.agent_id,
                remaining_attempts = attempt.remaining_attempts,
                "Delivery PIN rejected."
            ),
            AttemptOutcome::LockedOut => warn!(
                order_id = %attempt.order_id,
                agent_id = %attempt.agent_id,
                "Delivery PIN locked; customer must be called."
            ),
        }

        // The transition is already committed; a lost audit row must not undo it.
        if let Err(e) = self.audit.record_attempt(attempt).await {
            warn!(order_id = %attempt.order_id, "Failed to record PIN attempt: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
