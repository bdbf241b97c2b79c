use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_orders_table::Migration),
            Box::new(m20240301_000002_create_order_items_table::Migration),
            Box::new(m20240301_000003_create_discount_tables::Migration),
            Box::new(m20240301_000004_create_inventory_tables::Migration),
            Box::new(m20240301_000005_create_inventory_batches_table::Migration),
            Box::new(m20240301_000006_create_payment_attempts_table::Migration),
        ]
    }
}

mod m20240301_000001_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::CustomerType).string().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal().not_null())
                        .col(ColumnDef::new(Orders::DiscountCode).string().null())
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::TotalAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).json().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::OrderStatus).string().not_null())
                        .col(
                            ColumnDef::new(Orders::SizeConfirmation)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::PickupToken).string().null())
                        .col(
                            ColumnDef::new(Orders::PickupTokenUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::LatestPaymentReference).string().null())
                        .col(ColumnDef::new(Orders::GatewayTransactionId).string().null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_pickup_token")
                        .table(Orders::Table)
                        .col(Orders::PickupToken)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_status")
                        .table(Orders::Table)
                        .col(Orders::PaymentStatus)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerType,
        Subtotal,
        DiscountCode,
        DiscountAmount,
        ShippingCost,
        TotalAmount,
        ShippingAddress,
        PaymentMethod,
        PaymentStatus,
        OrderStatus,
        SizeConfirmation,
        PickupToken,
        PickupTokenUsed,
        LatestPaymentReference,
        GatewayTransactionId,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_order_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).string().not_null())
                        .col(ColumnDef::new(OrderItems::ProductCode).string().null())
                        .col(ColumnDef::new(OrderItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderItems::Variant).string().not_null())
                        .col(ColumnDef::new(OrderItems::Size).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                        .col(ColumnDef::new(OrderItems::Customizations).json().not_null())
                        .col(ColumnDef::new(OrderItems::LineTotal).decimal().not_null())
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductCode,
        ProductName,
        Variant,
        Size,
        Quantity,
        UnitPrice,
        Customizations,
        LineTotal,
        CreatedAt,
    }
}

mod m20240301_000003_create_discount_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_discount_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DiscountCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DiscountCodes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(DiscountCodes::DiscountType).string().not_null())
                        .col(ColumnDef::new(DiscountCodes::Value).decimal().not_null())
                        .col(ColumnDef::new(DiscountCodes::UsageClass).string().not_null())
                        .col(ColumnDef::new(DiscountCodes::MaxUses).integer().null())
                        .col(
                            ColumnDef::new(DiscountCodes::CurrentUses)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::ValidFrom)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::ValidUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DiscountRedemptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DiscountRedemptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountRedemptions::DiscountCodeId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DiscountRedemptions::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(DiscountRedemptions::Fingerprint)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DiscountRedemptions::DedupeKey).string().null())
                        .col(
                            ColumnDef::new(DiscountRedemptions::RedeemedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // NULL dedupe keys (authorized codes) never collide
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_discount_redemptions_code_dedupe")
                        .table(DiscountRedemptions::Table)
                        .col(DiscountRedemptions::DiscountCodeId)
                        .col(DiscountRedemptions::DedupeKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_discount_redemptions_order_id")
                        .table(DiscountRedemptions::Table)
                        .col(DiscountRedemptions::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DiscountRedemptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DiscountCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DiscountCodes {
        Table,
        Id,
        Code,
        DiscountType,
        Value,
        UsageClass,
        MaxUses,
        CurrentUses,
        ValidFrom,
        ValidUntil,
        Active,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum DiscountRedemptions {
        Table,
        Id,
        DiscountCodeId,
        OrderId,
        Fingerprint,
        DedupeKey,
        RedeemedAt,
    }
}

mod m20240301_000004_create_inventory_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryStock::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryStock::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryStock::ProductId).string().not_null())
                        .col(ColumnDef::new(InventoryStock::Variant).string().not_null())
                        .col(ColumnDef::new(InventoryStock::Size).string().not_null())
                        .col(
                            ColumnDef::new(InventoryStock::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Target of the upsert used for stock adjustments
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_inventory_stock_product_variant_size")
                        .table(InventoryStock::Table)
                        .col(InventoryStock::ProductId)
                        .col(InventoryStock::Variant)
                        .col(InventoryStock::Size)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryEntries::ProductId).string().not_null())
                        .col(ColumnDef::new(InventoryEntries::ProductCode).string().null())
                        .col(ColumnDef::new(InventoryEntries::Variant).string().not_null())
                        .col(ColumnDef::new(InventoryEntries::Size).string().not_null())
                        .col(ColumnDef::new(InventoryEntries::Quantity).integer().not_null())
                        .col(ColumnDef::new(InventoryEntries::EntryPrice).decimal().null())
                        .col(ColumnDef::new(InventoryEntries::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryEntries::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryStock {
        Table,
        Id,
        ProductId,
        Variant,
        Size,
        Quantity,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryEntries {
        Table,
        Id,
        ProductId,
        ProductCode,
        Variant,
        Size,
        Quantity,
        EntryPrice,
        Notes,
        CreatedAt,
    }
}

mod m20240301_000005_create_inventory_batches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_inventory_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBatches::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBatches::Barcode).string().not_null())
                        .col(ColumnDef::new(InventoryBatches::ProductCode).string().null())
                        .col(ColumnDef::new(InventoryBatches::ProductName).string().null())
                        .col(ColumnDef::new(InventoryBatches::Gender).string().null())
                        .col(ColumnDef::new(InventoryBatches::GarmentType).string().null())
                        .col(ColumnDef::new(InventoryBatches::Team).string().null())
                        .col(ColumnDef::new(InventoryBatches::Quantity).integer().not_null())
                        .col(ColumnDef::new(InventoryBatches::EntryPrice).decimal().not_null())
                        .col(
                            ColumnDef::new(InventoryBatches::SellingPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::TotalInvestment)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::ProjectedRevenue)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::ProjectedProfit)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::ProfitMargin)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBatches::Status).string().not_null())
                        .col(ColumnDef::new(InventoryBatches::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryBatches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_batches_barcode")
                        .table(InventoryBatches::Table)
                        .col(InventoryBatches::Barcode)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryBatches {
        Table,
        Id,
        Barcode,
        ProductCode,
        ProductName,
        Gender,
        GarmentType,
        Team,
        Quantity,
        EntryPrice,
        SellingPrice,
        TotalInvestment,
        ProjectedRevenue,
        ProjectedProfit,
        ProfitMargin,
        Status,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_payment_attempts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_payment_attempts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentAttempts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentAttempts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::Reference)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AmountInCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::Currency).string().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::Status).string().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::StatusSource)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::GatewayTransactionId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::GatewayStatus).string().null())
                        .col(ColumnDef::new(PaymentAttempts::GatewayResponse).json().null())
                        .col(ColumnDef::new(PaymentAttempts::RedirectUrl).text().null())
                        // one in-flight attempt per order; terminal attempts clear it
                        .col(
                            ColumnDef::new(PaymentAttempts::InFlightKey)
                                .string()
                                .null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::CustomerEmail).string().null())
                        .col(ColumnDef::new(PaymentAttempts::ClientStatus).string().null())
                        .col(
                            ColumnDef::new(PaymentAttempts::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_order_id")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentAttempts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentAttempts {
        Table,
        Id,
        OrderId,
        Reference,
        AmountInCents,
        Currency,
        PaymentMethod,
        Status,
        StatusSource,
        GatewayTransactionId,
        GatewayStatus,
        GatewayResponse,
        RedirectUrl,
        InFlightKey,
        CustomerEmail,
        ClientStatus,
        CompletedAt,
        CreatedAt,
        UpdatedAt,
    }
}
