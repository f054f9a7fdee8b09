#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use inventory_ledger::{
    config::LedgerConfig,
    db::{self, ChainLockManager, DbConfig, DbPool},
    entities::{stock_aggregate, tracked_entity::EntityType},
    models::{ChainKey, FuelStockKey, MovementRequest, PartStockKey},
    services::{EntityDirectory, RegisterEntityRequest, StockLedger},
};
use inventory_ledger::entities::stock_movement::{self, MovementType};
use uuid::Uuid;

/// Ledger engines over a fresh in-memory SQLite database.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub locks: Arc<ChainLockManager>,
    pub parts: StockLedger<PartStockKey>,
    pub fuel: StockLedger<FuelStockKey>,
    pub directory: EntityDirectory,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::default()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        // One connection keeps every engine on the same in-memory database.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        Self::over(Arc::new(pool), config)
    }

    pub fn over(db: Arc<DbPool>, config: LedgerConfig) -> Self {
        let locks = Arc::new(ChainLockManager::new(config.lock_timeout()));
        Self {
            parts: StockLedger::new(db.clone(), locks.clone(), config.clone()),
            fuel: StockLedger::new(db.clone(), locks.clone(), config),
            directory: EntityDirectory::new(db.clone()),
            locks,
            db,
        }
    }

    pub async fn register(&self, entity_type: EntityType, name: &str) -> Uuid {
        self.directory
            .register(RegisterEntityRequest {
                id: None,
                entity_type,
                name: name.to_string(),
            })
            .await
            .expect("failed to register entity")
            .id
    }

    pub async fn warehouse(&self) -> Uuid {
        self.register(EntityType::Warehouse, "Main Warehouse").await
    }

    /// Registers a fresh warehouse and part and returns their chain key.
    pub async fn part_key(&self) -> PartStockKey {
        let warehouse = self.warehouse().await;
        let part = self.register(EntityType::Part, "Hydraulic Filter").await;
        PartStockKey::new(warehouse, part)
    }

    /// Same part at a second, freshly registered warehouse.
    pub async fn part_key_elsewhere(&self, key: &PartStockKey) -> PartStockKey {
        let warehouse = self.register(EntityType::Warehouse, "Field Depot").await;
        PartStockKey::new(warehouse, key.part_id)
    }

    pub async fn fuel_key(&self) -> FuelStockKey {
        FuelStockKey::new(self.warehouse().await)
    }

    pub async fn receive(
        &self,
        key: &PartStockKey,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> stock_movement::Model {
        self.parts
            .append(
                MovementRequest::new(*key, MovementType::Receipt, quantity).with_unit_cost(unit_cost),
            )
            .await
            .expect("receipt should commit")
    }

    /// Overwrites the cached on-hand quantity, simulating drift.
    pub async fn corrupt_aggregate<K: ChainKey>(&self, key: &K, current_quantity: Decimal) {
        let aggregate = stock_aggregate::Entity::find()
            .filter(stock_aggregate::Column::ChainKind.eq(K::KIND.as_str()))
            .filter(stock_aggregate::Column::ChainKey.eq(key.storage_key()))
            .one(self.db.as_ref())
            .await
            .expect("aggregate lookup")
            .expect("aggregate exists");

        let mut active: stock_aggregate::ActiveModel = aggregate.into();
        active.current_quantity = Set(current_quantity);
        active
            .update(self.db.as_ref())
            .await
            .expect("aggregate update");
    }
}

/// Config with a short lock wait so contention tests finish quickly.
pub fn fast_timeout_config() -> LedgerConfig {
    LedgerConfig {
        lock_timeout_ms: 50,
        ..LedgerConfig::default()
    }
}

pub const SHORT_WAIT: Duration = Duration::from_millis(50);
