use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_tracked_entities_table::Migration),
            Box::new(m20240301_000002_create_stock_aggregates_table::Migration),
            Box::new(m20240301_000003_create_stock_movements_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_tracked_entities_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_tracked_entities_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TrackedEntities::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TrackedEntities::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TrackedEntities::EntityType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(TrackedEntities::Name).string().not_null())
                        .col(
                            ColumnDef::new(TrackedEntities::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(TrackedEntities::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_tracked_entities_type")
                        .table(TrackedEntities::Table)
                        .col(TrackedEntities::EntityType)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TrackedEntities::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum TrackedEntities {
        Table,
        Id,
        EntityType,
        Name,
        Active,
        CreatedAt,
    }
}

mod m20240301_000002_create_stock_aggregates_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_aggregates_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches entities/stock_aggregate.rs
            manager
                .create_table(
                    Table::create()
                        .table(StockAggregates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockAggregates::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::ChainKind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::ChainKey)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockAggregates::ScopeId).uuid().not_null())
                        .col(ColumnDef::new(StockAggregates::SubId).uuid().null())
                        .col(
                            ColumnDef::new(StockAggregates::CurrentQuantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::ReservedQuantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::AverageUnitCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::TotalValue)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::LastMovementAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::MovementCount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::NeedsRecalculation)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::LastRecalculatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAggregates::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One aggregate per chain key
            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_aggregates_chain")
                        .table(StockAggregates::Table)
                        .col(StockAggregates::ChainKind)
                        .col(StockAggregates::ChainKey)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockAggregates::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockAggregates {
        Table,
        Id,
        ChainKind,
        ChainKey,
        ScopeId,
        SubId,
        CurrentQuantity,
        ReservedQuantity,
        AverageUnitCost,
        TotalValue,
        LastMovementAt,
        MovementCount,
        NeedsRecalculation,
        LastRecalculatedAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_stock_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches entities/stock_movement.rs
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::AggregateId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::ChainKind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::ChainKey)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Sequence)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::UnitCost)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::PreviousBalance)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::CurrentBalance)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ReservationId).uuid().null())
                        .col(ColumnDef::new(StockMovements::TransferId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::ReferenceType)
                                .string_len(64)
                                .null(),
                        )
                        .col(ColumnDef::new(StockMovements::ReferenceId).string().null())
                        .col(ColumnDef::new(StockMovements::PerformedBy).uuid().null())
                        .col(ColumnDef::new(StockMovements::Notes).text().null())
                        .col(
                            ColumnDef::new(StockMovements::MovementDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_aggregate")
                                .from(StockMovements::Table, StockMovements::AggregateId)
                                .to(StockAggregates::Table, StockAggregates::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_movements_chain_sequence")
                        .table(StockMovements::Table)
                        .col(StockMovements::ChainKind)
                        .col(StockMovements::ChainKey)
                        .col(StockMovements::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_movements_reservation")
                        .table(StockMovements::Table)
                        .col(StockMovements::ReservationId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_movements_transfer")
                        .table(StockMovements::Table)
                        .col(StockMovements::TransferId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        AggregateId,
        ChainKind,
        ChainKey,
        Sequence,
        MovementType,
        Quantity,
        UnitCost,
        PreviousBalance,
        CurrentBalance,
        ReservationId,
        TransferId,
        ReferenceType,
        ReferenceId,
        PerformedBy,
        Notes,
        MovementDate,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum StockAggregates {
        Table,
        Id,
    }
}
