use sea_orm_migration::prelude::*;

use super::m20240601_000002_create_orders_tables::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contracts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Contracts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Contracts::OrderId).big_integer().not_null())
                    .col(ColumnDef::new(Contracts::SupplierId).big_integer().not_null())
                    .col(ColumnDef::new(Contracts::CustomerId).big_integer().not_null())
                    .col(ColumnDef::new(Contracts::Content).text().not_null())
                    .col(ColumnDef::new(Contracts::SupplierSignature).string().null())
                    .col(ColumnDef::new(Contracts::CustomerSignature).string().null())
                    // 0 = created, 1 = signed by supplier, 2 = signed by customer, 3 = completed
                    .col(
                        ColumnDef::new(Contracts::Status)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Contracts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Contracts::SignedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contracts_order_id")
                            .from(Contracts::Table, Contracts::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contracts_order_id")
                    .table(Contracts::Table)
                    .col(Contracts::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Contracts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Contracts {
    Table,
    Id,
    OrderId,
    SupplierId,
    CustomerId,
    Content,
    SupplierSignature,
    CustomerSignature,
    Status,
    CreatedAt,
    SignedAt,
}
