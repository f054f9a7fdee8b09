mod common;

use std::sync::Arc;

use inventory_ledger::config::LedgerConfig;
use inventory_ledger::db::{self, DbConfig, DbPool};
use inventory_ledger::entities::stock_movement::MovementType;
use inventory_ledger::models::{MovementRequest, ReserveRequest, UnreserveRequest};
use rust_decimal_macros::dec;
use tempfile::TempDir;

use common::TestLedger;

async fn open(dir: &TempDir) -> Arc<DbPool> {
    let path = dir.path().join("ledger.db");
    let pool = db::establish_connection_with_config(&DbConfig {
        url: format!("sqlite://{}?mode=rwc", path.display()),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("failed to open database file");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    Arc::new(pool)
}

#[tokio::test]
async fn ledger_survives_reconnect() {
    let dir = TempDir::new().unwrap();

    let (key, reservation_id) = {
        let ledger = TestLedger::over(open(&dir).await, LedgerConfig::default());
        let key = ledger.part_key().await;
        ledger.receive(&key, dec!(30), dec!(4)).await;
        ledger
            .parts
            .append(MovementRequest::new(key, MovementType::Issue, dec!(-5)))
            .await
            .unwrap();
        let reservation = ledger
            .parts
            .reserve(ReserveRequest::new(key, dec!(10)))
            .await
            .unwrap();
        (key, reservation.id)
    };

    // Migrations are idempotent against an existing file.
    let ledger = TestLedger::over(open(&dir).await, LedgerConfig::default());

    let snapshot = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(snapshot.current_quantity, dec!(25));
    assert_eq!(snapshot.reserved_quantity, dec!(10));
    assert_eq!(snapshot.available_quantity, dec!(15));
    assert_eq!(snapshot.movement_count, 3);

    let report = ledger.parts.audit(&key).await.unwrap();
    assert!(report.is_healthy(), "{:?}", report);

    let unreserved = ledger
        .parts
        .unreserve(
            reservation_id,
            UnreserveRequest {
                reason: Some("restart".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(unreserved.quantity, dec!(-10));
    assert_eq!(
        ledger.parts.aggregate(&key).await.unwrap().available_quantity,
        dec!(25)
    );
}
