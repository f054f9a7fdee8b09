//! Property-based tests for the balance calculator.
//!
//! Chains are generated in arbitrary date order with arbitrary (possibly
//! wrong) stamped balances, then replayed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use inventory_ledger::entities::stock_movement::{self, MovementType};
use inventory_ledger::services::balance_calculator::{
    count_chain_breaks, replay, sort_chronologically, sum_on_hand, weighted_average_cost,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn movement_type_strategy() -> impl Strategy<Value = MovementType> {
    prop_oneof![
        Just(MovementType::Receipt),
        Just(MovementType::Issue),
        Just(MovementType::Adjustment),
        Just(MovementType::TransferIn),
        Just(MovementType::TransferOut),
        Just(MovementType::Return),
        Just(MovementType::ReturnToSupplier),
        Just(MovementType::Reservation),
        Just(MovementType::Unreserve),
    ]
}

/// (type, magnitude, day offset, stamped previous, stamped current)
fn raw_movement_strategy() -> impl Strategy<Value = (MovementType, i64, i64, i64, i64)> {
    (
        movement_type_strategy(),
        1i64..10_000,
        0i64..30,
        -1_000i64..1_000,
        -1_000i64..1_000,
    )
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn build_chain(raw: Vec<(MovementType, i64, i64, i64, i64)>) -> Vec<stock_movement::Model> {
    raw.into_iter()
        .enumerate()
        .map(|(i, (movement_type, magnitude, day, previous, current))| {
            let negative = matches!(
                movement_type,
                MovementType::Issue
                    | MovementType::TransferOut
                    | MovementType::ReturnToSupplier
                    | MovementType::Unreserve
            ) || (movement_type == MovementType::Adjustment && magnitude % 2 == 0);
            let quantity = if negative {
                Decimal::from(-magnitude)
            } else {
                Decimal::from(magnitude)
            };
            let movement_date = epoch() + Duration::days(day);

            stock_movement::Model {
                id: Uuid::new_v4(),
                aggregate_id: Uuid::nil(),
                chain_kind: "part_stock".to_string(),
                chain_key: "prop".to_string(),
                sequence: i as i64 + 1,
                movement_type,
                quantity,
                unit_cost: None,
                previous_balance: Decimal::from(previous),
                current_balance: Decimal::from(current),
                reservation_id: None,
                transfer_id: None,
                reference_type: None,
                reference_id: None,
                performed_by: None,
                notes: None,
                movement_date,
                created_at: epoch() + Duration::seconds(i as i64),
            }
        })
        .collect()
}

fn apply_replay(chain: &mut [stock_movement::Model], initial: Decimal) {
    let replayed = replay(chain, initial).unwrap();
    for (movement, balance) in chain.iter_mut().zip(replayed.balances.iter()) {
        assert_eq!(movement.id, balance.movement_id);
        movement.previous_balance = balance.previous_balance;
        movement.current_balance = balance.current_balance;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn replay_final_balance_is_opening_plus_on_hand_sum(
        raw in prop::collection::vec(raw_movement_strategy(), 0..40),
        initial in -500i64..500,
    ) {
        let mut chain = build_chain(raw);
        sort_chronologically(&mut chain);
        let initial = Decimal::from(initial);

        let replayed = replay(&chain, initial).unwrap();
        prop_assert_eq!(replayed.final_balance, initial + sum_on_hand(&chain).unwrap());
    }

    #[test]
    fn replayed_chain_is_continuous(
        raw in prop::collection::vec(raw_movement_strategy(), 1..40),
    ) {
        let mut chain = build_chain(raw);
        sort_chronologically(&mut chain);
        apply_replay(&mut chain, Decimal::ZERO);

        prop_assert_eq!(count_chain_breaks(&chain), 0);
        prop_assert_eq!(chain[0].previous_balance, Decimal::ZERO);
        prop_assert_eq!(
            chain.last().map(|m| m.current_balance),
            Some(sum_on_hand(&chain).unwrap())
        );
    }

    #[test]
    fn second_replay_makes_no_corrections(
        raw in prop::collection::vec(raw_movement_strategy(), 0..40),
        initial in -500i64..500,
    ) {
        let mut chain = build_chain(raw);
        sort_chronologically(&mut chain);
        let initial = Decimal::from(initial);
        apply_replay(&mut chain, initial);

        let again = replay(&chain, initial).unwrap();
        prop_assert_eq!(again.corrections().count(), 0);
    }

    #[test]
    fn chronological_order_ignores_insertion_order(
        raw in prop::collection::vec(raw_movement_strategy(), 2..30),
    ) {
        let mut chain = build_chain(raw);
        sort_chronologically(&mut chain);
        for pair in chain.windows(2) {
            prop_assert!(
                (pair[0].movement_date, pair[0].created_at, pair[0].sequence)
                    <= (pair[1].movement_date, pair[1].created_at, pair[1].sequence)
            );
        }
    }

    #[test]
    fn weighted_average_stays_between_inputs(
        on_hand in 1i64..100_000,
        average in 0i64..1_000_000,
        inbound in 1i64..100_000,
        cost in 0i64..1_000_000,
    ) {
        // Costs in ten-thousandths so inputs already sit on the cost scale.
        let average = Decimal::new(average, 4);
        let cost = Decimal::new(cost, 4);
        let blended = weighted_average_cost(
            Decimal::from(on_hand),
            average,
            Decimal::from(inbound),
            cost,
        )
        .unwrap();

        prop_assert!(blended >= average.min(cost));
        prop_assert!(blended <= average.max(cost));
        prop_assert!(blended.scale() <= 4);
    }
}
