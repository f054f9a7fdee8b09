//! Balance stamping, replay and continuity checks.
//!
//! Everything here is pure so it can be shared by the append path, the
//! auditor and the recalculation pass.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::entities::stock_aggregate;
use crate::entities::stock_movement::{self, MovementType};
use crate::errors::ServiceError;

/// Decimal places kept for unit costs and values.
pub const COST_SCALE: u32 = 4;

/// Largest absolute quantity a single movement may carry.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Largest unit cost a single movement may carry.
pub const MAX_UNIT_COST: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn overflow(what: &str) -> ServiceError {
    ServiceError::InvalidQuantity(format!("{} exceeds the representable range", what))
}

/// Rejects quantities and unit costs outside the ledger's working range.
pub fn check_bounds(quantity: Decimal, unit_cost: Option<Decimal>) -> Result<(), ServiceError> {
    if quantity.abs() > MAX_QUANTITY {
        return Err(ServiceError::InvalidQuantity(format!(
            "quantity {} exceeds the maximum of {}",
            quantity, MAX_QUANTITY
        )));
    }
    match unit_cost {
        Some(cost) if cost < Decimal::ZERO => Err(ServiceError::ValidationError(
            "unit_cost must not be negative".to_string(),
        )),
        Some(cost) if cost > MAX_UNIT_COST => Err(ServiceError::ValidationError(format!(
            "unit_cost {} exceeds the maximum of {}",
            cost, MAX_UNIT_COST
        ))),
        _ => Ok(()),
    }
}

/// Balances computed for a movement about to be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceStamp {
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    /// Change to `reserved_quantity` (reservation and unreserve only).
    pub reserved_delta: Decimal,
    /// The movement predates the latest movement on the chain.
    pub backdated: bool,
}

/// Stamps a new movement against the aggregate as it stands.
///
/// A backdated movement is not spliced into the middle of the chain; it is
/// stamped against the current balance and the chain is flagged for
/// recalculation.
pub fn stamp(
    aggregate: &stock_aggregate::Model,
    movement_type: MovementType,
    quantity: Decimal,
    movement_date: DateTime<Utc>,
) -> Result<BalanceStamp, ServiceError> {
    let previous_balance = aggregate.current_quantity;
    let backdated = aggregate
        .last_movement_at
        .map(|latest| movement_date < latest)
        .unwrap_or(false);

    let stamp = if movement_type.affects_on_hand() {
        BalanceStamp {
            previous_balance,
            current_balance: previous_balance
                .checked_add(quantity)
                .ok_or_else(|| overflow("balance"))?,
            reserved_delta: Decimal::ZERO,
            backdated,
        }
    } else {
        BalanceStamp {
            previous_balance,
            current_balance: previous_balance,
            reserved_delta: quantity,
            backdated,
        }
    };
    Ok(stamp)
}

/// Sorts movements into chain order: business date, then insertion time,
/// then per-chain sequence.
pub fn sort_chronologically(movements: &mut [stock_movement::Model]) {
    movements.sort_by(|a, b| {
        a.movement_date
            .cmp(&b.movement_date)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.sequence.cmp(&b.sequence))
    });
}

/// Number of movements whose `previous_balance` does not continue the
/// preceding movement's `current_balance`. Expects chain order.
pub fn count_chain_breaks(ordered: &[stock_movement::Model]) -> u64 {
    ordered
        .windows(2)
        .filter(|pair| pair[1].previous_balance != pair[0].current_balance)
        .count() as u64
}

/// Sum of every on-hand quantity, ignoring reservation traffic.
pub fn sum_on_hand(movements: &[stock_movement::Model]) -> Result<Decimal, ServiceError> {
    movements.iter().try_fold(Decimal::ZERO, |total, m| {
        total
            .checked_add(m.on_hand_delta())
            .ok_or_else(|| overflow("on-hand total"))
    })
}

/// Recomputed balances for one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedBalance {
    pub movement_id: Uuid,
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    /// Stored values differ from the recomputed ones.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub balances: Vec<ReplayedBalance>,
    pub final_balance: Decimal,
}

impl Replay {
    pub fn corrections(&self) -> impl Iterator<Item = &ReplayedBalance> {
        self.balances.iter().filter(|b| b.changed)
    }
}

/// Walks the chain from `initial_balance`, restamping each movement.
pub fn replay(
    ordered: &[stock_movement::Model],
    initial_balance: Decimal,
) -> Result<Replay, ServiceError> {
    let mut running = initial_balance;
    let mut balances = Vec::with_capacity(ordered.len());

    for movement in ordered {
        let previous_balance = running;
        running = running
            .checked_add(movement.on_hand_delta())
            .ok_or_else(|| overflow("replayed balance"))?;
        balances.push(ReplayedBalance {
            movement_id: movement.id,
            previous_balance,
            current_balance: running,
            changed: movement.previous_balance != previous_balance
                || movement.current_balance != running,
        });
    }

    Ok(Replay {
        balances,
        final_balance: running,
    })
}

/// Quantity-weighted average of the stock on hand and an inbound lot.
///
/// When nothing positive is on hand the inbound cost replaces the average.
pub fn weighted_average_cost(
    on_hand: Decimal,
    average_cost: Decimal,
    inbound_quantity: Decimal,
    inbound_cost: Decimal,
) -> Result<Decimal, ServiceError> {
    let total = on_hand
        .checked_add(inbound_quantity)
        .ok_or_else(|| overflow("on-hand quantity"))?;
    if on_hand <= Decimal::ZERO || total <= Decimal::ZERO {
        return Ok(inbound_cost.round_dp(COST_SCALE));
    }
    let held = on_hand
        .checked_mul(average_cost)
        .ok_or_else(|| overflow("stock value"))?;
    let inbound = inbound_quantity
        .checked_mul(inbound_cost)
        .ok_or_else(|| overflow("inbound value"))?;
    let blended = held
        .checked_add(inbound)
        .and_then(|value| value.checked_div(total))
        .ok_or_else(|| overflow("average cost"))?;
    Ok(blended.round_dp(COST_SCALE))
}

/// Inventory value at the given average cost.
pub fn stock_value(quantity: Decimal, average_cost: Decimal) -> Result<Decimal, ServiceError> {
    quantity
        .checked_mul(average_cost)
        .map(|value| value.round_dp(COST_SCALE))
        .ok_or_else(|| overflow("stock value"))
}
