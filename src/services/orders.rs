use crate::{
    auth::{CallerIdentity, UserRole},
    config::OrderConfig,
    db::UnitOfWork,
    directory::{CatalogDirectory, SupplierDirectory},
    entities::{order, order_line, OrderStatus},
    errors::ServiceError,
    models::{NewOrder, OrderDetails, OrderLineDetails, PlacedOrder},
    repositories::OrderRepository,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};

/// Service for placing, listing and progressing orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    orders: OrderRepository,
    catalog: Arc<dyn CatalogDirectory>,
    suppliers: Arc<dyn SupplierDirectory>,
    config: OrderConfig,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogDirectory>,
        suppliers: Arc<dyn SupplierDirectory>,
        config: OrderConfig,
    ) -> Self {
        Self {
            db,
            orders: OrderRepository::new(),
            catalog,
            suppliers,
            config,
        }
    }

    /// Date stamped on new orders: now plus the configured fulfillment offset.
    pub fn fulfillment_date(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.config.fulfillment_offset_days)
    }

    /// Writes an order and all of its lines on `conn`. Callers own the transaction.
    pub async fn place_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &NewOrder,
    ) -> Result<PlacedOrder, ServiceError> {
        if order.lines.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "order for supplier {} has no lines",
                order.supplier_id
            )));
        }

        let created = self.orders.create_order(conn, order).await?;
        let mut total = 0i64;
        for line in &order.lines {
            let saved = self.orders.create_order_line(conn, created.id, line).await?;
            total = saved
                .line_total()
                .and_then(|t| total.checked_add(t))
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("order {} total overflows", created.id))
                })?;
        }

        Ok(PlacedOrder {
            order_id: created.id,
            supplier_id: created.supplier_id,
            total,
            line_count: order.lines.len(),
        })
    }

    /// Creates one order with its lines in a single unit of work.
    #[instrument(skip(self, order), fields(customer_id = order.customer_id, supplier_id = order.supplier_id))]
    pub async fn create_order(&self, order: NewOrder) -> Result<PlacedOrder, ServiceError> {
        let uow = UnitOfWork::begin(&self.db, "orders.create").await?;
        let result = match uow.connection() {
            Ok(conn) => self.place_order(conn, &order).await,
            Err(e) => Err(e),
        };
        let placed = uow.finish(result).await?;
        info!(order_id = placed.order_id, "order created");
        Ok(placed)
    }

    pub async fn order_by_id(&self, id: i64) -> Result<order::Model, ServiceError> {
        self.orders
            .find_by_id(&*self.db, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", id)))
    }

    pub async fn order_lines(&self, order_id: i64) -> Result<Vec<order_line::Model>, ServiceError> {
        self.orders.find_lines(&*self.db, order_id).await
    }

    #[instrument(skip(self))]
    pub async fn orders_by_customer(&self, customer_id: i64) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = self.orders.find_by_customer(&*self.db, customer_id).await?;
        self.enrich(orders).await
    }

    #[instrument(skip(self))]
    pub async fn orders_by_supplier(&self, supplier_id: i64) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = self.orders.find_by_supplier(&*self.db, supplier_id).await?;
        self.enrich(orders).await
    }

    /// Orders visible to the caller: placed by a customer, received by a supplier.
    pub async fn list_for(&self, caller: &CallerIdentity) -> Result<Vec<OrderDetails>, ServiceError> {
        match caller.role {
            UserRole::Customer => self.orders_by_customer(caller.user_id).await,
            UserRole::Supplier => self.orders_by_supplier(caller.user_id).await,
            UserRole::Admin => Err(ServiceError::InvalidOperation(
                "admins list orders per customer or supplier".into(),
            )),
        }
    }

    /// One order with details, if the caller is a party to it or an admin.
    pub async fn get_for(&self, caller: &CallerIdentity, id: i64) -> Result<OrderDetails, ServiceError> {
        let order = self.order_by_id(id).await?;
        ensure_party(caller, &order)?;
        self.enrich(vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError(format!("order {} lost during enrichment", id)))
    }

    /// Moves an order to `status`. Completed and Cancelled are final; repeating the
    /// current status changes nothing.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let uow = UnitOfWork::begin(&self.db, "orders.update_status").await?;
        let result = match uow.connection() {
            Ok(conn) => self.transition(conn, id, status).await,
            Err(e) => Err(e),
        };
        uow.finish(result).await
    }

    /// Status change requested by a user: the order's supplier or an admin.
    pub async fn change_status(
        &self,
        caller: &CallerIdentity,
        id: i64,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = self.order_by_id(id).await?;
        let allowed = caller.is_admin()
            || (caller.role == UserRole::Supplier && caller.user_id == order.supplier_id);
        if !allowed {
            return Err(ServiceError::Forbidden(format!(
                "user {} cannot change the status of order {}",
                caller.user_id, id
            )));
        }
        self.update_order_status(id, status).await
    }

    pub(crate) async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = self
            .orders
            .find_by_id(conn, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", id)))?;

        if order.status_id == status {
            return Ok(order);
        }
        if !order.status_id.can_become(status) {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {} and cannot become {}",
                id, order.status_id, status
            )));
        }

        let from = order.status_id;
        let updated = self.orders.update_status(conn, order, status).await?;
        info!(order_id = id, %from, to = %status, "order status changed");
        Ok(updated)
    }

    /// Joins lines, product and supplier data onto `orders`: one line query plus one
    /// call per directory over the distinct ids in the page.
    async fn enrich(&self, orders: Vec<order::Model>) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let lines = self
            .orders
            .find_lines_for_orders(&*self.db, &order_ids)
            .await?;

        let product_ids: Vec<i64> = lines
            .iter()
            .map(|l| l.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let supplier_ids: Vec<i64> = orders
            .iter()
            .map(|o| o.supplier_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let products = if product_ids.is_empty() {
            HashMap::new()
        } else {
            self.catalog.products(&product_ids).await?
        };
        let suppliers = self.suppliers.suppliers(&supplier_ids).await?;

        let mut lines_by_order: HashMap<i64, Vec<OrderLineDetails>> = HashMap::new();
        for line in lines {
            let product = products.get(&line.product_id);
            lines_by_order
                .entry(line.order_id)
                .or_default()
                .push(OrderLineDetails {
                    product_name: product.map(|p| p.name.clone()),
                    product_image: product.and_then(|p| p.image.clone()),
                    line,
                });
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let lines = lines_by_order.remove(&order.id).unwrap_or_default();
                let total = lines
                    .iter()
                    .filter_map(|l| l.line.line_total())
                    .fold(0i64, |acc, t| acc.saturating_add(t));
                OrderDetails {
                    supplier_name: suppliers.get(&order.supplier_id).map(|s| s.name.clone()),
                    total,
                    lines,
                    order,
                }
            })
            .collect())
    }
}

fn ensure_party(caller: &CallerIdentity, order: &order::Model) -> Result<(), ServiceError> {
    let is_party = match caller.role {
        UserRole::Customer => caller.user_id == order.customer_id,
        UserRole::Supplier => caller.user_id == order.supplier_id,
        UserRole::Admin => true,
    };
    if is_party {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "user {} is not a party to order {}",
            caller.user_id, order.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;
    use crate::directory::{InMemoryDirectory, ProductSummary, SupplierProfile};
    use crate::models::{NewOrderLine, SupplierTerms};
    use assert_matches::assert_matches;

    async fn service() -> (OrderService, Arc<InMemoryDirectory>) {
        let db = Arc::new(migrated_pool().await);
        let dir = Arc::new(
            InMemoryDirectory::new()
                .with_product(ProductSummary {
                    id: 1,
                    name: "Flour".into(),
                    image: Some("flour.png".into()),
                })
                .with_product(ProductSummary {
                    id: 2,
                    name: "Sugar".into(),
                    image: None,
                })
                .with_supplier(SupplierProfile {
                    id: 10,
                    name: "Mill".into(),
                    terms: SupplierTerms::default(),
                }),
        );
        let svc = OrderService::new(db, dir.clone(), dir.clone(), OrderConfig::default());
        (svc, dir)
    }

    fn new_order(customer_id: i64, lines: Vec<(i64, i32, i64)>) -> NewOrder {
        NewOrder {
            customer_id,
            supplier_id: 10,
            order_date: Utc::now(),
            lines: lines
                .into_iter()
                .map(|(product_id, quantity, price)| NewOrderLine {
                    product_id,
                    quantity,
                    price,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn listing_enriches_with_one_lookup_per_directory() {
        let (svc, dir) = service().await;
        svc.create_order(new_order(1, vec![(1, 2, 100), (2, 1, 50)]))
            .await
            .unwrap();
        svc.create_order(new_order(1, vec![(1, 1, 100)])).await.unwrap();

        let orders = svc.orders_by_customer(1).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(dir.product_lookups(), 1);
        assert_eq!(dir.supplier_lookups(), 1);

        let older = &orders[1];
        assert_eq!(older.total, 250);
        assert_eq!(older.supplier_name.as_deref(), Some("Mill"));
        assert_eq!(older.lines[0].product_name.as_deref(), Some("Flour"));
        assert_eq!(older.lines[1].product_image, None);
    }

    #[tokio::test]
    async fn terminal_statuses_are_final() {
        let (svc, _) = service().await;
        let placed = svc.create_order(new_order(1, vec![(1, 1, 100)])).await.unwrap();

        let same = svc
            .update_order_status(placed.order_id, OrderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(same.status_id, OrderStatus::Pending);

        svc.update_order_status(placed.order_id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_matches!(
            svc.update_order_status(placed.order_id, OrderStatus::InProgress).await,
            Err(ServiceError::InvalidStatus(_))
        );
    }

    #[tokio::test]
    async fn in_progress_orders_cannot_go_back_to_pending() {
        let (svc, _) = service().await;
        let placed = svc.create_order(new_order(1, vec![(1, 1, 100)])).await.unwrap();

        svc.update_order_status(placed.order_id, OrderStatus::InProgress)
            .await
            .unwrap();
        assert_matches!(
            svc.update_order_status(placed.order_id, OrderStatus::Pending).await,
            Err(ServiceError::InvalidStatus(_))
        );
        let order = svc.order_by_id(placed.order_id).await.unwrap();
        assert_eq!(order.status_id, OrderStatus::InProgress);
    }

    #[tokio::test]
    async fn order_without_lines_is_rejected() {
        let (svc, _) = service().await;
        assert_matches!(
            svc.create_order(new_order(1, vec![])).await,
            Err(ServiceError::ValidationError(_))
        );
        assert!(svc.orders_by_customer(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strangers_cannot_read_or_progress_an_order() {
        let (svc, _) = service().await;
        let placed = svc.create_order(new_order(1, vec![(1, 1, 100)])).await.unwrap();

        assert_matches!(
            svc.get_for(&CallerIdentity::customer(2), placed.order_id).await,
            Err(ServiceError::Forbidden(_))
        );
        assert!(svc
            .get_for(&CallerIdentity::supplier(10), placed.order_id)
            .await
            .is_ok());
        assert_matches!(
            svc.change_status(&CallerIdentity::customer(1), placed.order_id, OrderStatus::Completed)
                .await,
            Err(ServiceError::Forbidden(_))
        );
    }
}
