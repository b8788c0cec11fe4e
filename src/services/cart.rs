use crate::{
    auth::{CallerIdentity, UserRole},
    db::UnitOfWork,
    directory::SupplierDirectory,
    errors::ServiceError,
    models::{AddCartLine, Cart, CartLine, CartSummary, RemoveCartLine},
    repositories::CartRepository,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

/// Per-customer cart grouped by supplier.
///
/// Supplier groups are maintained as lines come and go: the group row, with the
/// supplier's terms at that moment, is written with the first line for a supplier
/// and removed with its last one. Reads never recompute grouping from scratch.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    carts: CartRepository,
    suppliers: Arc<dyn SupplierDirectory>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, suppliers: Arc<dyn SupplierDirectory>) -> Self {
        Self {
            db,
            carts: CartRepository::new(),
            suppliers,
        }
    }

    /// Sets quantity and price of a product line, creating the cart and supplier
    /// group as needed. Returns the cart after the change.
    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn add_or_update_line(
        &self,
        caller: &CallerIdentity,
        input: AddCartLine,
    ) -> Result<Cart, ServiceError> {
        caller.require_role(UserRole::Customer)?;
        input.validate()?;
        let customer_id = caller.user_id;

        // Supplier terms come from the registry; fetch them before opening the transaction.
        let terms = match self
            .carts
            .find_group(&*self.db, customer_id, input.supplier_id)
            .await?
        {
            Some(_) => None,
            None => Some(self.suppliers.supplier(input.supplier_id).await?.terms),
        };

        let line = CartLine {
            product_id: input.product_id,
            supplier_id: input.supplier_id,
            quantity: input.quantity,
            unit_price: input.price,
        };

        let uow = UnitOfWork::begin(&self.db, "cart.add_line").await?;
        let result: Result<Cart, ServiceError> = async {
            let conn = uow.connection()?;
            if let Some(terms) = terms {
                if self
                    .carts
                    .find_group(conn, customer_id, line.supplier_id)
                    .await?
                    .is_none()
                {
                    self.carts
                        .insert_group(conn, customer_id, line.supplier_id, terms)
                        .await?;
                }
            }
            self.carts.upsert_line(conn, customer_id, &line).await?;
            self.carts
                .load_cart(conn, customer_id)
                .await?
                .ok_or_else(|| ServiceError::InternalError("cart vanished after upsert".into()))
        }
        .await;
        let cart = uow.finish(result).await?;

        info!(
            product_id = line.product_id,
            supplier_id = line.supplier_id,
            quantity = line.quantity,
            "cart line saved"
        );
        Ok(cart)
    }

    /// Takes `quantity` units out of a line; the line goes when nothing is left, and the
    /// supplier group goes with its last line. Returns the remaining cart, if any.
    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn remove_line(
        &self,
        caller: &CallerIdentity,
        input: RemoveCartLine,
    ) -> Result<Option<Cart>, ServiceError> {
        caller.require_role(UserRole::Customer)?;
        input.validate()?;
        let customer_id = caller.user_id;

        let uow = UnitOfWork::begin(&self.db, "cart.remove_line").await?;
        let result: Result<Option<Cart>, ServiceError> = async {
            let conn = uow.connection()?;
            let line = self
                .carts
                .find_line(conn, customer_id, input.supplier_id, input.product_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "product {} from supplier {} is not in the cart",
                        input.product_id, input.supplier_id
                    ))
                })?;

            let remaining = line.quantity - input.quantity;
            if remaining <= 0 {
                self.carts.delete_line(conn, line.id).await?;
                self.carts
                    .delete_group_if_empty(conn, customer_id, input.supplier_id)
                    .await?;
            } else {
                self.carts.set_line_quantity(conn, line, remaining).await?;
            }
            self.carts.load_cart(conn, customer_id).await
        }
        .await;
        let cart = uow.finish(result).await?;

        info!(
            product_id = input.product_id,
            supplier_id = input.supplier_id,
            removed = input.quantity,
            "cart line reduced"
        );
        Ok(cart)
    }

    /// `NotFound` when the customer has no lines, so "no cart" is never an empty cart.
    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn read_cart(&self, caller: &CallerIdentity) -> Result<Cart, ServiceError> {
        caller.require_role(UserRole::Customer)?;
        self.carts
            .load_cart(&*self.db, caller.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart for customer {}", caller.user_id)))
    }

    pub async fn summary(&self, caller: &CallerIdentity) -> Result<CartSummary, ServiceError> {
        self.read_cart(caller).await?.summary()
    }

    /// Removes every line and group. Clearing an absent cart is a no-op.
    #[instrument(skip(self), fields(customer_id = caller.user_id))]
    pub async fn clear(&self, caller: &CallerIdentity) -> Result<u64, ServiceError> {
        caller.require_role(UserRole::Customer)?;
        let uow = UnitOfWork::begin(&self.db, "cart.clear").await?;
        let result = match uow.connection() {
            Ok(conn) => self.carts.clear(conn, caller.user_id).await,
            Err(e) => Err(e),
        };
        let removed = uow.finish(result).await?;
        info!(removed, "cart cleared");
        Ok(removed)
    }
}
