use crate::{
    auth::{CallerIdentity, UserRole},
    db::UnitOfWork,
    errors::ServiceError,
    models::CheckoutReceipt,
    repositories::CartRepository,
    services::orders::OrderService,
};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Checkout service for converting carts to orders
///
/// A checkout reads the cart, validates every supplier group, writes one order per
/// group and clears the cart inside one unit of work. Any failure leaves no order
/// behind and the cart untouched. Payment is requested afterwards, outside the
/// transaction, by [`PaymentService`](crate::services::payments::PaymentService).
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    carts: CartRepository,
    order_service: Arc<OrderService>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, order_service: Arc<OrderService>) -> Self {
        Self {
            db,
            carts: CartRepository::new(),
            order_service,
        }
    }

    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn checkout(&self, caller: &CallerIdentity) -> Result<CheckoutReceipt, ServiceError> {
        caller.require_role(UserRole::Customer)?;

        let uow = UnitOfWork::begin(&self.db, "checkout").await?;
        let unit_of_work = uow.id();
        let result = match uow.connection() {
            Ok(conn) => self.checkout_on(conn, caller.user_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if !e.is_not_found() {
                error!(%unit_of_work, error = %e, "checkout failed; rolling back");
            }
        }
        let receipt = uow.finish(result).await?;

        info!(
            %unit_of_work,
            orders = ?receipt.order_ids(),
            "checkout completed"
        );
        Ok(receipt)
    }

    async fn checkout_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let mut cart = self
            .carts
            .load_cart_for_update(conn, customer_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart for customer {}", customer_id)))?;
        // The cart must belong to the caller whatever was loaded.
        cart.customer_id = customer_id;

        let line_count = cart.groups.line_count();
        let new_orders = cart.into_new_orders(self.order_service.fulfillment_date())?;

        let mut placed = Vec::with_capacity(new_orders.len());
        for order in &new_orders {
            placed.push(self.order_service.place_order(conn, order).await?);
        }

        let cleared = self.carts.clear(conn, customer_id).await?;
        ensure_cart_consumed(customer_id, line_count, cleared)?;

        Ok(CheckoutReceipt {
            customer_id,
            orders: placed,
        })
    }
}

/// The clear must remove exactly the lines the orders were built from. Anything else
/// means another checkout or cart edit got there first.
fn ensure_cart_consumed(customer_id: i64, loaded: usize, cleared: u64) -> Result<(), ServiceError> {
    if u64::try_from(loaded).ok() == Some(cleared) {
        return Ok(());
    }
    Err(ServiceError::Conflict(format!(
        "cart for customer {} changed during checkout: {} line(s) loaded, {} removed",
        customer_id, loaded, cleared
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderConfig;
    use crate::db::test_support::migrated_pool;
    use crate::directory::InMemoryDirectory;
    use crate::models::{CartLine, SupplierTerms};
    use assert_matches::assert_matches;
    use sea_orm::TransactionTrait;

    fn service(db: Arc<DatabaseConnection>) -> CheckoutService {
        let dir = Arc::new(InMemoryDirectory::new());
        let orders = Arc::new(OrderService::new(
            db.clone(),
            dir.clone(),
            dir,
            OrderConfig::default(),
        ));
        CheckoutService::new(db, orders)
    }

    #[test]
    fn clear_count_must_match_loaded_lines() {
        assert!(ensure_cart_consumed(1, 3, 3).is_ok());
        assert_matches!(ensure_cart_consumed(1, 3, 0), Err(ServiceError::Conflict(_)));
        assert_matches!(ensure_cart_consumed(1, 2, 3), Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn cart_consumed_by_an_earlier_checkout_is_not_ordered_twice() {
        let db = Arc::new(migrated_pool().await);
        let checkout = service(db.clone());
        let carts = CartRepository::new();
        carts
            .insert_group(&*db, 1, 7, SupplierTerms::default())
            .await
            .unwrap();
        carts
            .upsert_line(
                &*db,
                1,
                &CartLine {
                    product_id: 3,
                    supplier_id: 7,
                    quantity: 2,
                    unit_price: 400,
                },
            )
            .await
            .unwrap();

        let txn = db.begin().await.unwrap();
        let receipt = checkout.checkout_on(&txn, 1).await.unwrap();
        assert_eq!(receipt.orders.len(), 1);
        assert_matches!(
            checkout.checkout_on(&txn, 1).await,
            Err(ServiceError::NotFound(_))
        );
        txn.commit().await.unwrap();
    }
}
