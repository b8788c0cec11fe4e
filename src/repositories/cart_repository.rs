use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::warn;

use crate::entities::cart_line::{self, Entity as CartLineEntity};
use crate::entities::cart_supplier_group::{self, Entity as CartGroupEntity};
use crate::errors::ServiceError;
use crate::models::{Cart, CartLine, SupplierTerms};

/// Repository for cart lines and their per-supplier groups
#[derive(Debug, Clone, Copy, Default)]
pub struct CartRepository;

impl CartRepository {
    pub fn new() -> Self {
        Self
    }

    /// Loads the customer's cart. `None` when the customer has no lines.
    pub async fn load_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
    ) -> Result<Option<Cart>, ServiceError> {
        self.load(conn, customer_id, false).await
    }

    /// Like [`load_cart`](Self::load_cart) but locks the cart lines until the
    /// surrounding transaction ends.
    pub async fn load_cart_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
    ) -> Result<Option<Cart>, ServiceError> {
        self.load(conn, customer_id, true).await
    }

    async fn load<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        lock: bool,
    ) -> Result<Option<Cart>, ServiceError> {
        let mut query = CartLineEntity::find()
            .filter(cart_line::Column::CustomerId.eq(customer_id))
            .order_by_asc(cart_line::Column::Id);
        if lock {
            query = query.lock_exclusive();
        }
        let lines = query.all(conn).await?;
        if lines.is_empty() {
            return Ok(None);
        }

        let groups = CartGroupEntity::find()
            .filter(cart_supplier_group::Column::CustomerId.eq(customer_id))
            .order_by_asc(cart_supplier_group::Column::Id)
            .all(conn)
            .await?;

        let mut cart = Cart::new(customer_id);
        for group in &groups {
            cart.groups.entry(group.supplier_id, terms_of(group));
        }
        for line in lines {
            if cart.groups.get(line.supplier_id).is_none() {
                warn!(
                    customer_id,
                    supplier_id = line.supplier_id,
                    "cart line without supplier group; using empty terms"
                );
            }
            cart.groups
                .entry(line.supplier_id, SupplierTerms::default())
                .lines
                .push(CartLine {
                    product_id: line.product_id,
                    supplier_id: line.supplier_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                });
        }

        Ok(Some(cart))
    }

    pub async fn find_group<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        supplier_id: i64,
    ) -> Result<Option<cart_supplier_group::Model>, ServiceError> {
        Ok(CartGroupEntity::find()
            .filter(cart_supplier_group::Column::CustomerId.eq(customer_id))
            .filter(cart_supplier_group::Column::SupplierId.eq(supplier_id))
            .one(conn)
            .await?)
    }

    pub async fn insert_group<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        supplier_id: i64,
        terms: SupplierTerms,
    ) -> Result<cart_supplier_group::Model, ServiceError> {
        let group = cart_supplier_group::ActiveModel {
            customer_id: Set(customer_id),
            supplier_id: Set(supplier_id),
            min_order_amount: Set(terms.min_order_amount),
            free_delivery_amount: Set(terms.free_delivery_amount),
            delivery_fee: Set(terms.delivery_fee),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        Ok(group.insert(conn).await?)
    }

    pub async fn find_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        supplier_id: i64,
        product_id: i64,
    ) -> Result<Option<cart_line::Model>, ServiceError> {
        Ok(CartLineEntity::find()
            .filter(cart_line::Column::CustomerId.eq(customer_id))
            .filter(cart_line::Column::SupplierId.eq(supplier_id))
            .filter(cart_line::Column::ProductId.eq(product_id))
            .one(conn)
            .await?)
    }

    /// Sets quantity and unit price of the (customer, supplier, product) line.
    pub async fn upsert_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        line: &CartLine,
    ) -> Result<cart_line::Model, ServiceError> {
        match self
            .find_line(conn, customer_id, line.supplier_id, line.product_id)
            .await?
        {
            Some(existing) => {
                let mut active: cart_line::ActiveModel = existing.into();
                active.quantity = Set(line.quantity);
                active.unit_price = Set(line.unit_price);
                Ok(active.update(conn).await?)
            }
            None => {
                let active = cart_line::ActiveModel {
                    customer_id: Set(customer_id),
                    supplier_id: Set(line.supplier_id),
                    product_id: Set(line.product_id),
                    quantity: Set(line.quantity),
                    unit_price: Set(line.unit_price),
                    ..Default::default()
                };
                Ok(active.insert(conn).await?)
            }
        }
    }

    pub async fn set_line_quantity<C: ConnectionTrait>(
        &self,
        conn: &C,
        line: cart_line::Model,
        quantity: i32,
    ) -> Result<cart_line::Model, ServiceError> {
        let mut active: cart_line::ActiveModel = line.into();
        active.quantity = Set(quantity);
        Ok(active.update(conn).await?)
    }

    pub async fn delete_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        line_id: i64,
    ) -> Result<(), ServiceError> {
        CartLineEntity::delete_by_id(line_id).exec(conn).await?;
        Ok(())
    }

    /// Drops the supplier group once its last line is gone. Returns whether it was removed.
    pub async fn delete_group_if_empty<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
        supplier_id: i64,
    ) -> Result<bool, ServiceError> {
        let remaining = CartLineEntity::find()
            .filter(cart_line::Column::CustomerId.eq(customer_id))
            .filter(cart_line::Column::SupplierId.eq(supplier_id))
            .count(conn)
            .await?;
        if remaining > 0 {
            return Ok(false);
        }
        CartGroupEntity::delete_many()
            .filter(cart_supplier_group::Column::CustomerId.eq(customer_id))
            .filter(cart_supplier_group::Column::SupplierId.eq(supplier_id))
            .exec(conn)
            .await?;
        Ok(true)
    }

    /// Deletes every line and group of the customer. Returns the number of lines removed.
    pub async fn clear<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: i64,
    ) -> Result<u64, ServiceError> {
        let lines = CartLineEntity::delete_many()
            .filter(cart_line::Column::CustomerId.eq(customer_id))
            .exec(conn)
            .await?;
        CartGroupEntity::delete_many()
            .filter(cart_supplier_group::Column::CustomerId.eq(customer_id))
            .exec(conn)
            .await?;
        Ok(lines.rows_affected)
    }
}

fn terms_of(group: &cart_supplier_group::Model) -> SupplierTerms {
    SupplierTerms {
        min_order_amount: group.min_order_amount,
        free_delivery_amount: group.free_delivery_amount,
        delivery_fee: group.delivery_fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;

    fn line(product_id: i64, supplier_id: i64, quantity: i32, unit_price: i64) -> CartLine {
        CartLine {
            product_id,
            supplier_id,
            quantity,
            unit_price,
        }
    }

    #[tokio::test]
    async fn empty_cart_reads_as_none() {
        let db = migrated_pool().await;
        let repo = CartRepository::new();
        assert!(repo.load_cart(&db, 1).await.unwrap().is_none());
        assert!(repo.load_cart_for_update(&db, 1).await.unwrap().is_none());
        assert_eq!(repo.clear(&db, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_quantity_and_price() {
        let db = migrated_pool().await;
        let repo = CartRepository::new();
        repo.insert_group(&db, 1, 9, SupplierTerms::default())
            .await
            .unwrap();
        repo.upsert_line(&db, 1, &line(5, 9, 2, 100)).await.unwrap();
        repo.upsert_line(&db, 1, &line(5, 9, 4, 120)).await.unwrap();

        let cart = repo.load_cart(&db, 1).await.unwrap().unwrap();
        let group = cart.groups.get(9).unwrap();
        assert_eq!(group.lines, vec![line(5, 9, 4, 120)]);
    }

    #[tokio::test]
    async fn groups_load_in_insertion_order_with_terms() {
        let db = migrated_pool().await;
        let repo = CartRepository::new();
        let terms = SupplierTerms {
            min_order_amount: 1000,
            free_delivery_amount: 3000,
            delivery_fee: 200,
        };
        repo.insert_group(&db, 1, 20, terms).await.unwrap();
        repo.insert_group(&db, 1, 10, SupplierTerms::default())
            .await
            .unwrap();
        repo.upsert_line(&db, 1, &line(1, 10, 1, 50)).await.unwrap();
        repo.upsert_line(&db, 1, &line(2, 20, 1, 50)).await.unwrap();

        let cart = repo.load_cart(&db, 1).await.unwrap().unwrap();
        let suppliers: Vec<i64> = cart.groups.iter().map(|g| g.supplier_id).collect();
        assert_eq!(suppliers, vec![20, 10]);
        assert_eq!(cart.groups.get(20).unwrap().terms, terms);
    }

    #[tokio::test]
    async fn group_is_removed_with_its_last_line() {
        let db = migrated_pool().await;
        let repo = CartRepository::new();
        repo.insert_group(&db, 1, 9, SupplierTerms::default())
            .await
            .unwrap();
        let saved = repo.upsert_line(&db, 1, &line(5, 9, 2, 100)).await.unwrap();

        assert!(!repo.delete_group_if_empty(&db, 1, 9).await.unwrap());
        repo.delete_line(&db, saved.id).await.unwrap();
        assert!(repo.delete_group_if_empty(&db, 1, 9).await.unwrap());
        assert!(repo.find_group(&db, 1, 9).await.unwrap().is_none());
    }
}
