use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per (customer, supplier) holding the supplier terms snapshotted
        // when the first line for that supplier was added.
        manager
            .create_table(
                Table::create()
                    .table(CartSupplierGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CartSupplierGroups::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::CustomerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::SupplierId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::MinOrderAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::FreeDeliveryAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::DeliveryFee)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CartSupplierGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cart_supplier_groups_customer_supplier")
                    .table(CartSupplierGroups::Table)
                    .col(CartSupplierGroups::CustomerId)
                    .col(CartSupplierGroups::SupplierId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CartLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CartLines::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CartLines::CustomerId).big_integer().not_null())
                    .col(ColumnDef::new(CartLines::SupplierId).big_integer().not_null())
                    .col(ColumnDef::new(CartLines::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(CartLines::Quantity).integer().not_null())
                    .col(ColumnDef::new(CartLines::UnitPrice).big_integer().not_null())
                    .col(
                        ColumnDef::new(CartLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CartLines::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cart_lines_customer_supplier_product")
                    .table(CartLines::Table)
                    .col(CartLines::CustomerId)
                    .col(CartLines::SupplierId)
                    .col(CartLines::ProductId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CartLines::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CartSupplierGroups::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CartSupplierGroups {
    Table,
    Id,
    CustomerId,
    SupplierId,
    MinOrderAmount,
    FreeDeliveryAmount,
    DeliveryFee,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CartLines {
    Table,
    Id,
    CustomerId,
    SupplierId,
    ProductId,
    Quantity,
    UnitPrice,
    CreatedAt,
    UpdatedAt,
}
