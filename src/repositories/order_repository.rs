use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::order::{self, Entity as Order, Model as OrderModel};
use crate::entities::order_line::{self, Entity as OrderLine, Model as OrderLineModel};
use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::models::{NewOrder, NewOrderLine};

/// Repository for orders and their lines
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderRepository;

impl OrderRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts the order header as `Pending`. Lines are added with `create_order_line`
    /// on the same connection.
    pub async fn create_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &NewOrder,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let active = order::ActiveModel {
            customer_id: Set(order.customer_id),
            supplier_id: Set(order.supplier_id),
            status_id: Set(OrderStatus::Pending),
            order_date: Set(order.order_date),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(active.insert(conn).await?)
    }

    pub async fn create_order_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
        line: &NewOrderLine,
    ) -> Result<OrderLineModel, ServiceError> {
        let active = order_line::ActiveModel {
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.price),
            ..Default::default()
        };
        Ok(active.insert(conn).await?)
    }

    /// Find an order by ID
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(conn).await?)
    }

    /// Orders of a customer, newest first
    pub async fn find_by_customer<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::Id)
            .all(conn)
            .await?)
    }

    /// Orders placed with a supplier, newest first
    pub async fn find_by_supplier<C: ConnectionTrait>(
        &self,
        conn: &C,
        supplier_id: i64,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::SupplierId.eq(supplier_id))
            .order_by_desc(order::Column::Id)
            .all(conn)
            .await?)
    }

    pub async fn find_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
    ) -> Result<Vec<OrderLineModel>, ServiceError> {
        Ok(OrderLine::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::Id)
            .all(conn)
            .await?)
    }

    /// Lines of several orders in a single query.
    pub async fn find_lines_for_orders<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_ids: &[i64],
    ) -> Result<Vec<OrderLineModel>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(OrderLine::find()
            .filter(order_line::Column::OrderId.is_in(order_ids.iter().copied()))
            .order_by_asc(order_line::Column::OrderId)
            .order_by_asc(order_line::Column::Id)
            .all(conn)
            .await?)
    }

    pub async fn update_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
        status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let mut active: order::ActiveModel = order.into();
        active.status_id = Set(status);
        Ok(active.update(conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;

    fn new_order(customer_id: i64, supplier_id: i64) -> NewOrder {
        NewOrder {
            customer_id,
            supplier_id,
            order_date: Utc::now(),
            lines: vec![],
        }
    }

    #[tokio::test]
    async fn created_orders_start_pending() {
        let db = migrated_pool().await;
        let repo = OrderRepository::new();
        let order = repo.create_order(&db, &new_order(1, 2)).await.unwrap();
        assert_eq!(order.status_id, OrderStatus::Pending);

        let line = NewOrderLine {
            product_id: 3,
            quantity: 2,
            price: 600,
        };
        repo.create_order_line(&db, order.id, &line).await.unwrap();
        let lines = repo.find_lines(&db, order.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_total(), Some(1200));
    }

    #[tokio::test]
    async fn listing_filters_by_party() {
        let db = migrated_pool().await;
        let repo = OrderRepository::new();
        let a = repo.create_order(&db, &new_order(1, 10)).await.unwrap();
        let b = repo.create_order(&db, &new_order(1, 20)).await.unwrap();
        repo.create_order(&db, &new_order(2, 10)).await.unwrap();

        let mine: Vec<i64> = repo
            .find_by_customer(&db, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(mine, vec![b.id, a.id]);
        assert_eq!(repo.find_by_supplier(&db, 10).await.unwrap().len(), 2);
        assert!(repo.find_lines_for_orders(&db, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_update_persists() {
        let db = migrated_pool().await;
        let repo = OrderRepository::new();
        let order = repo.create_order(&db, &new_order(1, 2)).await.unwrap();
        let id = order.id;
        repo.update_status(&db, order, OrderStatus::InProgress)
            .await
            .unwrap();
        let reloaded = repo.find_by_id(&db, id).await.unwrap().unwrap();
        assert_eq!(reloaded.status_id, OrderStatus::InProgress);
    }
}
