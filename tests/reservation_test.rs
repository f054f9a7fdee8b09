mod common;

use assert_matches::assert_matches;
use inventory_ledger::entities::stock_movement::MovementType;
use inventory_ledger::errors::ServiceError;
use inventory_ledger::models::{MovementRequest, Reference, ReserveRequest, UnreserveRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestLedger;

#[tokio::test]
async fn issue_against_reservation_releases_the_hold() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(50), dec!(1)).await;

    let reservation = ledger
        .parts
        .reserve(
            ReserveRequest::new(key, dec!(10)).with_reference(Reference::new("work_order", "WO-7")),
        )
        .await
        .unwrap();
    assert_eq!(reservation.movement_type, MovementType::Reservation);
    assert_eq!(reservation.previous_balance, dec!(50));
    assert_eq!(reservation.current_balance, dec!(50));
    assert_eq!(reservation.unit_cost, None);

    let held = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(held.reserved_quantity, dec!(10));
    assert_eq!(held.available_quantity, dec!(40));

    let issue = ledger
        .parts
        .append(
            MovementRequest::new(key, MovementType::Issue, dec!(-10))
                .against_reservation(reservation.id),
        )
        .await
        .unwrap();
    assert_eq!(issue.reservation_id, Some(reservation.id));

    let after = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(after.reserved_quantity, Decimal::ZERO);
    assert_eq!(after.current_quantity, dec!(40));
    assert!(ledger.parts.open_reservations(&key).await.unwrap().is_empty());
}

#[tokio::test]
async fn reserve_beyond_available_fails() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(50), dec!(1)).await;
    ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(30)))
        .await
        .unwrap();

    let err = ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(21)))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientAvailable { available, .. } if available == dec!(20)
    );

    assert_matches!(
        ledger.parts.reserve(ReserveRequest::new(key, dec!(0))).await,
        Err(ServiceError::InvalidQuantity(_))
    );
}

#[tokio::test]
async fn reserved_stock_is_not_available_to_free_issues() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(100), dec!(1)).await;
    ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(30)))
        .await
        .unwrap();

    let err = ledger
        .parts
        .append(MovementRequest::new(key, MovementType::Issue, dec!(-80)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientAvailable { .. });

    ledger
        .parts
        .append(MovementRequest::new(key, MovementType::Issue, dec!(-70)))
        .await
        .unwrap();
    let snapshot = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(snapshot.current_quantity, dec!(30));
    assert_eq!(snapshot.reserved_quantity, dec!(30));
    assert_eq!(snapshot.available_quantity, Decimal::ZERO);
}

#[tokio::test]
async fn partial_issue_then_unreserve_releases_the_remainder() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(40), dec!(1)).await;

    let reservation = ledger
        .parts
        .reserve(
            ReserveRequest::new(key, dec!(12)).with_reference(Reference::new("sales_order", "SO-9")),
        )
        .await
        .unwrap();
    ledger
        .parts
        .append(
            MovementRequest::new(key, MovementType::Issue, dec!(-5))
                .against_reservation(reservation.id),
        )
        .await
        .unwrap();

    let open = ledger.parts.open_reservations(&key).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].remaining, dec!(7));

    let release = ledger
        .parts
        .unreserve(
            reservation.id,
            UnreserveRequest {
                reason: Some("order cancelled".to_string()),
                performed_by: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(release.movement_type, MovementType::Unreserve);
    assert_eq!(release.quantity, dec!(-7));
    assert_eq!(release.notes.as_deref(), Some("order cancelled"));
    assert_eq!(release.reference_id.as_deref(), Some("SO-9"));

    let snapshot = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(snapshot.reserved_quantity, Decimal::ZERO);
    assert_eq!(snapshot.current_quantity, dec!(35));

    let err = ledger
        .parts
        .unreserve(reservation.id, UnreserveRequest::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NothingToUnreserve(id) if id == reservation.id);
}

#[tokio::test]
async fn issue_larger_than_hold_draws_the_excess_from_free_stock() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(20), dec!(1)).await;
    let reservation = ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(5)))
        .await
        .unwrap();

    ledger
        .parts
        .append(
            MovementRequest::new(key, MovementType::Issue, dec!(-8))
                .against_reservation(reservation.id),
        )
        .await
        .unwrap();

    let snapshot = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(snapshot.current_quantity, dec!(12));
    assert_eq!(snapshot.reserved_quantity, Decimal::ZERO);
}

#[tokio::test]
async fn unreserve_of_unknown_or_non_reservation_id_is_not_found() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    let receipt = ledger.receive(&key, dec!(5), dec!(1)).await;

    assert_matches!(
        ledger
            .parts
            .unreserve(Uuid::new_v4(), UnreserveRequest::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ledger
            .parts
            .unreserve(receipt.id, UnreserveRequest::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn reservation_of_another_chain_cannot_be_consumed() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    let other = ledger.part_key_elsewhere(&key).await;
    ledger.receive(&key, dec!(10), dec!(1)).await;
    ledger.receive(&other, dec!(10), dec!(1)).await;

    let reservation = ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(4)))
        .await
        .unwrap();

    let err = ledger
        .parts
        .append(
            MovementRequest::new(other, MovementType::Issue, dec!(-4))
                .against_reservation(reservation.id),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn reservation_bound_holds_after_every_operation() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(30), dec!(1)).await;

    let mut reservations = Vec::new();
    for qty in [dec!(10), dec!(8), dec!(12)] {
        reservations.push(
            ledger
                .parts
                .reserve(ReserveRequest::new(key, qty))
                .await
                .unwrap(),
        );
        let s = ledger.parts.aggregate(&key).await.unwrap();
        assert!(s.reserved_quantity >= Decimal::ZERO);
        assert!(s.reserved_quantity <= s.current_quantity);
    }

    // Fully reserved: nothing further can be reserved or freely issued.
    assert!(ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(1)))
        .await
        .is_err());
    assert!(ledger
        .parts
        .append(MovementRequest::new(key, MovementType::Issue, dec!(-1)))
        .await
        .is_err());

    ledger
        .parts
        .append(
            MovementRequest::new(key, MovementType::Issue, dec!(-10))
                .against_reservation(reservations[0].id),
        )
        .await
        .unwrap();
    ledger
        .parts
        .unreserve(reservations[1].id, UnreserveRequest::default())
        .await
        .unwrap();

    let s = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(s.current_quantity, dec!(20));
    assert_eq!(s.reserved_quantity, dec!(12));
    assert!(s.reserved_quantity <= s.current_quantity);
}

#[tokio::test]
async fn unreserve_requires_an_active_chain_key() {
    let ledger = TestLedger::new().await;
    let key = ledger.part_key().await;
    ledger.receive(&key, dec!(20), dec!(1)).await;
    let reservation = ledger
        .parts
        .reserve(ReserveRequest::new(key, dec!(8)))
        .await
        .unwrap();

    ledger
        .directory
        .set_active(key.warehouse_id, false)
        .await
        .unwrap();

    let err = ledger
        .parts
        .unreserve(reservation.id, UnreserveRequest::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidChainKey(_));

    ledger
        .directory
        .set_active(key.warehouse_id, true)
        .await
        .unwrap();
    let held = ledger.parts.aggregate(&key).await.unwrap();
    assert_eq!(held.reserved_quantity, dec!(8));
    assert_eq!(held.movement_count, 2);

    let released = ledger
        .parts
        .unreserve(reservation.id, UnreserveRequest::default())
        .await
        .unwrap();
    assert_eq!(released.quantity, dec!(-8));
}
