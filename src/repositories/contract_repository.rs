use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::entities::contract::{self, Entity as Contract, Model as ContractModel};
use crate::entities::ContractStatus;
use crate::errors::ServiceError;
use crate::models::NewContract;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContractRepository;

impl ContractRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        new: &NewContract,
    ) -> Result<ContractModel, ServiceError> {
        let active = contract::ActiveModel {
            order_id: Set(new.order_id),
            supplier_id: Set(new.supplier_id),
            customer_id: Set(new.customer_id),
            content: Set(new.content.clone()),
            supplier_signature: Set(None),
            customer_signature: Set(None),
            status: Set(ContractStatus::Created),
            created_at: Set(Utc::now()),
            signed_at: Set(None),
            ..Default::default()
        };
        Ok(active.insert(conn).await?)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<Option<ContractModel>, ServiceError> {
        Ok(Contract::find_by_id(id).one(conn).await?)
    }

    /// Reads the contract and takes a row lock until the surrounding transaction ends.
    pub async fn find_by_id_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<Option<ContractModel>, ServiceError> {
        Ok(Contract::find_by_id(id).lock_exclusive().one(conn).await?)
    }

    pub async fn find_by_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
    ) -> Result<Option<ContractModel>, ServiceError> {
        Ok(Contract::find()
            .filter(contract::Column::OrderId.eq(order_id))
            .one(conn)
            .await?)
    }

    /// Contracts where the user is either party, newest first
    pub async fn find_by_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
    ) -> Result<Vec<ContractModel>, ServiceError> {
        Ok(Contract::find()
            .filter(
                Condition::any()
                    .add(contract::Column::SupplierId.eq(user_id))
                    .add(contract::Column::CustomerId.eq(user_id)),
            )
            .order_by_desc(contract::Column::CreatedAt)
            .order_by_desc(contract::Column::Id)
            .all(conn)
            .await?)
    }

    /// Writes the signature columns, status and `signed_at` of an already-transitioned model.
    ///
    /// The row is only updated while its stored status is still `expected`; a concurrent
    /// signer that committed first turns this write into a `Conflict`.
    pub async fn save_signatures<C: ConnectionTrait>(
        &self,
        conn: &C,
        expected: ContractStatus,
        signed: ContractModel,
    ) -> Result<ContractModel, ServiceError> {
        let updated = Contract::update_many()
            .col_expr(
                contract::Column::SupplierSignature,
                Expr::value(signed.supplier_signature.clone()),
            )
            .col_expr(
                contract::Column::CustomerSignature,
                Expr::value(signed.customer_signature.clone()),
            )
            .col_expr(contract::Column::Status, Expr::value(signed.status.into_value()))
            .col_expr(contract::Column::SignedAt, Expr::value(signed.signed_at))
            .filter(contract::Column::Id.eq(signed.id))
            .filter(contract::Column::Status.eq(expected.into_value()))
            .exec(conn)
            .await?;
        if updated.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "contract {} changed while it was being signed",
                signed.id
            )));
        }
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;
    use assert_matches::assert_matches;
    use crate::models::NewOrder;
    use crate::repositories::OrderRepository;

    async fn order_for(db: &sea_orm::DatabaseConnection, customer: i64, supplier: i64) -> i64 {
        OrderRepository::new()
            .create_order(
                db,
                &NewOrder {
                    customer_id: customer,
                    supplier_id: supplier,
                    order_date: Utc::now(),
                    lines: vec![],
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn contracts_are_listed_for_both_parties() {
        let db = migrated_pool().await;
        let repo = ContractRepository::new();
        let order_id = order_for(&db, 1, 2).await;
        let created = repo
            .create(
                &db,
                &NewContract {
                    order_id,
                    supplier_id: 2,
                    customer_id: 1,
                    content: "terms".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.status, ContractStatus::Created);

        assert_eq!(repo.find_by_user(&db, 1).await.unwrap().len(), 1);
        assert_eq!(repo.find_by_user(&db, 2).await.unwrap().len(), 1);
        assert!(repo.find_by_user(&db, 3).await.unwrap().is_empty());
        assert_eq!(
            repo.find_by_order(&db, order_id).await.unwrap().map(|c| c.id),
            Some(created.id)
        );
    }

    #[tokio::test]
    async fn second_contract_for_an_order_violates_uniqueness() {
        let db = migrated_pool().await;
        let repo = ContractRepository::new();
        let order_id = order_for(&db, 1, 2).await;
        let new = NewContract {
            order_id,
            supplier_id: 2,
            customer_id: 1,
            content: "terms".into(),
        };
        repo.create(&db, &new).await.unwrap();
        assert!(repo.create(&db, &new).await.is_err());
    }

    #[tokio::test]
    async fn saving_from_a_stale_copy_conflicts() {
        let db = migrated_pool().await;
        let repo = ContractRepository::new();
        let order_id = order_for(&db, 1, 2).await;
        let created = repo
            .create(
                &db,
                &NewContract {
                    order_id,
                    supplier_id: 2,
                    customer_id: 1,
                    content: "terms".into(),
                },
            )
            .await
            .unwrap();

        let mut by_customer = repo.find_by_id_for_update(&db, created.id).await.unwrap().unwrap();
        let mut by_supplier = repo.find_by_id(&db, created.id).await.unwrap().unwrap();
        by_customer.customer_signature = Some("jane".into());
        by_customer.status = ContractStatus::SignedByCustomer;
        by_supplier.supplier_signature = Some("acme".into());
        by_supplier.status = ContractStatus::SignedBySupplier;

        repo.save_signatures(&db, ContractStatus::Created, by_customer)
            .await
            .unwrap();
        assert_matches!(
            repo.save_signatures(&db, ContractStatus::Created, by_supplier).await,
            Err(ServiceError::Conflict(_))
        );

        let stored = repo.find_by_id(&db, created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::SignedByCustomer);
        assert_eq!(stored.customer_signature.as_deref(), Some("jane"));
        assert!(stored.supplier_signature.is_none());
    }
}
