use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_reference_tables::Migration),
            Box::new(m20240101_000002_create_sale_orders_table::Migration),
            Box::new(m20240101_000003_create_work_breakdown_structures_table::Migration),
            Box::new(m20240101_000004_create_sale_lines_table::Migration),
        ]
    }
}

#[derive(DeriveIden)]
enum Currencies {
    Table,
    Id,
    Code,
    Name,
    Rounding,
    Digits,
}

#[derive(DeriveIden)]
enum Units {
    Table,
    Id,
    Name,
    Symbol,
    Category,
    Digits,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Name,
    Salable,
    DefaultUnitId,
}

#[derive(DeriveIden)]
enum SaleOrders {
    Table,
    Id,
    Number,
    Description,
    State,
    CurrencyId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkBreakdownStructures {
    Table,
    Id,
    ParentId,
    Sequence,
    NodeType,
    Description,
    ProductId,
    UnitId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SaleLines {
    Table,
    Id,
    SaleId,
    ParentId,
    Sequence,
    LineType,
    Description,
    Note,
    ProductId,
    UnitId,
    Quantity,
    UnitPrice,
    WbsId,
    CreatedAt,
    UpdatedAt,
}

mod m20240101_000001_create_reference_tables {
    use super::{Currencies, Products, Units};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_reference_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Currencies::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Currencies::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Currencies::Code)
                                .string_len(3)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Currencies::Name).string().not_null())
                        .col(ColumnDef::new(Currencies::Rounding).decimal().not_null())
                        .col(
                            ColumnDef::new(Currencies::Digits)
                                .integer()
                                .not_null()
                                .default(2),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Units::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Units::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Units::Name).string().not_null())
                        .col(ColumnDef::new(Units::Symbol).string().not_null())
                        .col(ColumnDef::new(Units::Category).string().not_null())
                        .col(
                            ColumnDef::new(Units::Digits)
                                .integer()
                                .not_null()
                                .default(2),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::Salable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::DefaultUnitId)
                                .big_integer()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_default_unit_id")
                                .from(Products::Table, Products::DefaultUnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Units::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Currencies::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_sale_orders_table {
    use super::{Currencies, SaleOrders};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_sale_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SaleOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SaleOrders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SaleOrders::Number).string().null())
                        .col(ColumnDef::new(SaleOrders::Description).string().null())
                        .col(
                            ColumnDef::new(SaleOrders::State)
                                .string_len(16)
                                .not_null()
                                .default("draft"),
                        )
                        .col(
                            ColumnDef::new(SaleOrders::CurrencyId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_orders_currency_id")
                                .from(SaleOrders::Table, SaleOrders::CurrencyId)
                                .to(Currencies::Table, Currencies::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_orders_state")
                        .table(SaleOrders::Table)
                        .col(SaleOrders::State)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SaleOrders::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000003_create_work_breakdown_structures_table {
    use super::{Products, Units, WorkBreakdownStructures};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_work_breakdown_structures_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WorkBreakdownStructures::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::ParentId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::Sequence)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::NodeType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::ProductId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::UnitId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkBreakdownStructures::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wbs_parent_id")
                                .from(
                                    WorkBreakdownStructures::Table,
                                    WorkBreakdownStructures::ParentId,
                                )
                                .to(WorkBreakdownStructures::Table, WorkBreakdownStructures::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wbs_product_id")
                                .from(
                                    WorkBreakdownStructures::Table,
                                    WorkBreakdownStructures::ProductId,
                                )
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wbs_unit_id")
                                .from(
                                    WorkBreakdownStructures::Table,
                                    WorkBreakdownStructures::UnitId,
                                )
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wbs_parent_id")
                        .table(WorkBreakdownStructures::Table)
                        .col(WorkBreakdownStructures::ParentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(WorkBreakdownStructures::Table)
                        .to_owned(),
                )
                .await
        }
    }
}

mod m20240101_000004_create_sale_lines_table {
    use super::{Products, SaleLines, SaleOrders, Units, WorkBreakdownStructures};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_sale_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SaleLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SaleLines::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SaleLines::SaleId).big_integer().not_null())
                        .col(ColumnDef::new(SaleLines::ParentId).big_integer().null())
                        .col(ColumnDef::new(SaleLines::Sequence).integer().null())
                        .col(
                            ColumnDef::new(SaleLines::LineType)
                                .string_len(16)
                                .not_null()
                                .default("line"),
                        )
                        .col(
                            ColumnDef::new(SaleLines::Description)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(SaleLines::Note).text().null())
                        .col(ColumnDef::new(SaleLines::ProductId).big_integer().null())
                        .col(ColumnDef::new(SaleLines::UnitId).big_integer().null())
                        .col(
                            ColumnDef::new(SaleLines::Quantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(SaleLines::UnitPrice).decimal().null())
                        .col(ColumnDef::new(SaleLines::WbsId).big_integer().null())
                        .col(
                            ColumnDef::new(SaleLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_sale_id")
                                .from(SaleLines::Table, SaleLines::SaleId)
                                .to(SaleOrders::Table, SaleOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_parent_id")
                                .from(SaleLines::Table, SaleLines::ParentId)
                                .to(SaleLines::Table, SaleLines::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_wbs_id")
                                .from(SaleLines::Table, SaleLines::WbsId)
                                .to(WorkBreakdownStructures::Table, WorkBreakdownStructures::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_product_id")
                                .from(SaleLines::Table, SaleLines::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_unit_id")
                                .from(SaleLines::Table, SaleLines::UnitId)
                                .to(Units::Table, Units::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_lines_sale_id")
                        .table(SaleLines::Table)
                        .col(SaleLines::SaleId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_lines_parent_id")
                        .table(SaleLines::Table)
                        .col(SaleLines::ParentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_lines_wbs_id")
                        .table(SaleLines::Table)
                        .col(SaleLines::WbsId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SaleLines::Table).to_owned())
                .await
        }
    }
}

/// Connects to `db_url` and applies every pending migration.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
