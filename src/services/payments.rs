use crate::{
    auth::CallerIdentity,
    cache::PaymentOrderCache,
    db::UnitOfWork,
    entities::OrderStatus,
    errors::ServiceError,
    gateway::PaymentGateway,
    models::{
        CartSnapshot, CommitCheckout, PaymentIntent, PendingPaymentOrder, ReconcileOutcome,
        SnapshotLine,
    },
    repositories::OrderRepository,
    services::orders::OrderService,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Payment initiation and gateway callback handling.
///
/// Gateway calls never run inside a unit of work, and the pending-payment cache is
/// written best effort after the gateway answered. Callbacks can therefore arrive for
/// orders the cache knows nothing about; those are resolved from the order reference.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    orders: OrderRepository,
    order_service: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    cache: Arc<dyn PaymentOrderCache>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        order_service: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn PaymentOrderCache>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            orders: OrderRepository::new(),
            order_service,
            gateway,
            cache,
            currency: currency.into(),
        }
    }

    /// Requests a checkout page for a committed, still pending order owned by the caller.
    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn initiate_payment(
        &self,
        caller: &CallerIdentity,
        order_id: i64,
    ) -> Result<PendingPaymentOrder, ServiceError> {
        let order = self
            .orders
            .find_by_id(&*self.db, order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;

        if order.customer_id != caller.user_id {
            return Err(ServiceError::Forbidden(format!(
                "order {} does not belong to customer {}",
                order_id, caller.user_id
            )));
        }
        if order.status_id != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {}, only pending orders can be paid",
                order_id, order.status_id
            )));
        }

        let lines = self.orders.find_lines(&*self.db, order_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} has no lines to pay for",
                order_id
            )));
        }
        let amount = lines.iter().try_fold(0i64, |acc, line| {
            line.line_total()
                .and_then(|t| acc.checked_add(t))
                .ok_or_else(|| ServiceError::ValidationError(format!("order {} amount overflows", order_id)))
        })?;

        let intent = PaymentIntent {
            order_ref: format!("{}_{}", order.id, Utc::now().timestamp_millis()),
            amount,
            currency: self.currency.clone(),
            description: format!("Order {}", order.id),
            sender_email: None,
            product_id: None,
        };

        let checkout = self.gateway.request_payment(&intent).await?;

        let pending = PendingPaymentOrder {
            id: intent.order_ref.clone(),
            cart: CartSnapshot {
                customer_id: order.customer_id,
                supplier_id: order.supplier_id,
                order_id: order.id,
                amount,
                currency: intent.currency.clone(),
                lines: lines
                    .iter()
                    .map(|l| SnapshotLine {
                        product_id: l.product_id,
                        quantity: l.quantity,
                        price: l.price,
                    })
                    .collect(),
            },
            checkout,
            created_at: Utc::now(),
        };

        if let Err(e) = self.cache.save(&pending).await {
            // Reconciliation falls back to the order reference.
            warn!(order_ref = %pending.id, error = %e, "could not record pending payment");
        }

        info!(
            order_id,
            order_ref = %pending.id,
            payment_id = %pending.checkout.payment_id,
            "payment initiated"
        );
        Ok(pending)
    }

    /// Applies a gateway callback to its order. Success moves the order to
    /// `InProgress`, failure to `Cancelled`. Repeated callbacks are harmless.
    #[instrument(skip(self), fields(order_ref = %commit.order_id, status = %commit.payment_status))]
    pub async fn reconcile(&self, commit: CommitCheckout) -> Result<ReconcileOutcome, ServiceError> {
        let entry = self.resolve_entry(&commit.order_id).await?;
        let order_id = match &entry {
            Some(entry) => entry.cart.order_id,
            None => order_id_from_ref(&commit.order_id)?,
        };

        let target = match commit.payment_status.target_order_status() {
            Some(target) => target,
            None => {
                info!(order_id, "non-final payment status; order left as is");
                return Ok(ReconcileOutcome::Ignored {
                    order_id,
                    payment_status: commit.payment_status.to_string(),
                });
            }
        };

        let uow = UnitOfWork::begin(&self.db, "payments.reconcile").await?;
        let result: Result<ReconcileOutcome, ServiceError> = async {
            let conn = uow.connection()?;
            let order = self
                .orders
                .find_by_id(conn, order_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
            if order.status_id != OrderStatus::Pending {
                return Ok(ReconcileOutcome::AlreadySettled {
                    order_id,
                    status: order.status_id,
                });
            }
            let updated = self.order_service.transition(conn, order_id, target).await?;
            Ok(ReconcileOutcome::Applied {
                order_id,
                status: updated.status_id,
            })
        }
        .await;
        let outcome = uow.finish(result).await?;

        let cache_id = entry
            .as_ref()
            .map(|e| e.id.clone())
            .unwrap_or_else(|| commit.order_id.clone());
        if let Err(e) = self.cache.remove(&cache_id).await {
            warn!(id = %cache_id, error = %e, "could not evict settled payment");
        }

        info!(?outcome, "payment callback reconciled");
        Ok(outcome)
    }

    /// Pending payments whose reference starts with `prefix`.
    pub async fn pending_payments(&self, prefix: &str) -> Result<Vec<PendingPaymentOrder>, ServiceError> {
        self.cache.list_by_id_prefix(prefix).await
    }

    /// Exact id first, then a prefix scan for gateways that echo a shortened reference.
    async fn resolve_entry(&self, reference: &str) -> Result<Option<PendingPaymentOrder>, ServiceError> {
        match self.cache.get(reference).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => {}
            Err(e) => warn!(reference, error = %e, "pending payment entry unreadable"),
        }

        let prefix = if reference.contains('_') {
            reference.to_string()
        } else {
            format!("{}_", reference)
        };
        match self.cache.list_by_id_prefix(&prefix).await {
            Ok(mut candidates) => {
                candidates.sort_by_key(|c| c.created_at);
                Ok(candidates.pop())
            }
            Err(e) => {
                warn!(reference, error = %e, "pending payment scan failed");
                Ok(None)
            }
        }
    }
}

/// Order id encoded in a `{order_id}_{millis}` reference (or a bare order id).
fn order_id_from_ref(reference: &str) -> Result<i64, ServiceError> {
    reference
        .split('_')
        .next()
        .and_then(|head| head.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "cannot resolve an order from payment reference {:?}",
                reference
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("12_1717200000000", Some(12))]
    #[case("12", Some(12))]
    #[case("abc_1", None)]
    #[case("", None)]
    fn order_ids_come_from_the_reference_head(#[case] reference: &str, #[case] expected: Option<i64>) {
        assert_eq!(order_id_from_ref(reference).ok(), expected);
    }
}
