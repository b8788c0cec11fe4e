//! Explicit unit of work over a single database transaction.
//!
//! Repositories accept any `ConnectionTrait`, so the same calls run against the pool
//! or against `UnitOfWork::connection()`. Every write inside one checkout or contract
//! signature goes through one `UnitOfWork` and becomes visible together on `commit`.

use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, IsolationLevel,
    TransactionTrait,
};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Committed,
    RolledBack,
}

pub struct UnitOfWork {
    id: Uuid,
    label: &'static str,
    started: Instant,
    txn: Option<DatabaseTransaction>,
}

impl UnitOfWork {
    /// Opens a transaction. Read committed is requested where the backend supports
    /// choosing it; SQLite serializes writers anyway.
    pub async fn begin(db: &DatabaseConnection, label: &'static str) -> Result<Self, ServiceError> {
        let isolation = match db.get_database_backend() {
            DatabaseBackend::Sqlite => None,
            _ => Some(IsolationLevel::ReadCommitted),
        };
        let txn = db.begin_with_config(isolation, None).await?;
        let id = Uuid::new_v4();
        debug!(unit_of_work = %id, label, "transaction started");
        counter!("marketplace_db.transaction.started", 1);

        Ok(Self {
            id,
            label,
            started: Instant::now(),
            txn: Some(txn),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection handle for repository calls inside this unit of work.
    pub fn connection(&self) -> Result<&DatabaseTransaction, ServiceError> {
        self.txn.as_ref().ok_or_else(|| {
            ServiceError::InternalError(format!("unit of work {} already finished", self.id))
        })
    }

    pub async fn commit(mut self) -> Result<(), ServiceError> {
        let txn = self.take()?;
        txn.commit().await?;
        self.record(Outcome::Committed);
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), ServiceError> {
        let txn = self.take()?;
        txn.rollback().await?;
        self.record(Outcome::RolledBack);
        Ok(())
    }

    /// Commits when `result` is `Ok`, rolls back otherwise, and hands `result` back.
    /// A rollback failure is logged; the original error wins.
    pub async fn finish<T>(self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let id = self.id;
                if let Err(rollback_err) = self.rollback().await {
                    warn!(unit_of_work = %id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn take(&mut self) -> Result<DatabaseTransaction, ServiceError> {
        self.txn.take().ok_or_else(|| {
            ServiceError::InternalError(format!("unit of work {} already finished", self.id))
        })
    }

    fn record(&self, outcome: Outcome) {
        let elapsed = self.started.elapsed();
        debug!(unit_of_work = %self.id, label = self.label, ?outcome, ?elapsed, "transaction finished");
        match outcome {
            Outcome::Committed => counter!("marketplace_db.transaction.committed", 1),
            Outcome::RolledBack => counter!("marketplace_db.transaction.rolled_back", 1),
        }
        histogram!(
            "marketplace_db.transaction.duration_seconds",
            elapsed.as_secs_f64(),
            "label" => self.label
        );
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        // The inner transaction rolls itself back when dropped open.
        if self.txn.is_some() {
            warn!(
                unit_of_work = %self.id,
                label = self.label,
                "unit of work dropped without commit; rolling back"
            );
            counter!("marketplace_db.transaction.abandoned", 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;
    use sea_orm::{ConnectionTrait, Statement};

    async fn count_groups(conn: &impl ConnectionTrait) -> i64 {
        let row = conn
            .query_one(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT COUNT(*) AS n FROM cart_supplier_groups".to_owned(),
            ))
            .await
            .unwrap()
            .unwrap();
        row.try_get::<i64>("", "n").unwrap()
    }

    async fn insert_group(conn: &impl ConnectionTrait) {
        conn.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "INSERT INTO cart_supplier_groups \
             (customer_id, supplier_id, min_order_amount, free_delivery_amount, delivery_fee, created_at) \
             VALUES (1, 2, 0, 0, 0, '2024-06-01T00:00:00Z')"
                .to_owned(),
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn finish_with_error_discards_writes() {
        let pool = migrated_pool().await;
        let uow = UnitOfWork::begin(&pool, "test").await.unwrap();
        insert_group(uow.connection().unwrap()).await;
        let result: Result<(), _> = uow
            .finish(Err(ServiceError::InvalidCart("nope".into())))
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidCart(_))));
        assert_eq!(count_groups(&pool).await, 0);
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let pool = migrated_pool().await;
        let uow = UnitOfWork::begin(&pool, "test").await.unwrap();
        insert_group(uow.connection().unwrap()).await;
        uow.commit().await.unwrap();
        assert_eq!(count_groups(&pool).await, 1);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let pool = migrated_pool().await;
        {
            let uow = UnitOfWork::begin(&pool, "test").await.unwrap();
            insert_group(uow.connection().unwrap()).await;
        }
        assert_eq!(count_groups(&pool).await, 0);
    }
}
