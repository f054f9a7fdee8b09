//! Ledger Store: durable, append-only movement records per chain key.
//!
//! The helpers in this module run against any `ConnectionTrait` so the
//! reservation, transfer and recalculation paths can compose them inside a
//! single transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::balance_calculator;
use super::stock_ledger::StockLedger;
use crate::db::with_transaction;
use crate::entities::stock_aggregate::{self, Entity as StockAggregate};
use crate::entities::stock_movement::{self, Entity as StockMovement, MovementType, SignRule};
use crate::entities::tracked_entity::{self, Entity as TrackedEntity};
use crate::errors::ServiceError;
use crate::models::{ChainKey, ChainKind, MovementRequest, Reference};

/// Everything needed to write one movement besides its balances.
#[derive(Debug, Clone)]
pub(crate) struct MovementDraft {
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reservation_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
    pub reference: Option<Reference>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_date: DateTime<Utc>,
    /// Held quantity this movement releases (issue against a reservation).
    pub release_reserved: Decimal,
}

impl MovementDraft {
    pub fn new(movement_type: MovementType, quantity: Decimal, movement_date: DateTime<Utc>) -> Self {
        Self {
            movement_type,
            quantity,
            unit_cost: None,
            reservation_id: None,
            transfer_id: None,
            reference: None,
            performed_by: None,
            notes: None,
            movement_date,
            release_reserved: Decimal::ZERO,
        }
    }
}

pub(crate) fn check_sign(movement_type: MovementType, quantity: Decimal) -> Result<(), ServiceError> {
    if movement_type.accepts(quantity) {
        return Ok(());
    }
    let expected = match movement_type.sign_rule() {
        SignRule::Positive => "a positive",
        SignRule::Negative => "a negative",
        SignRule::NonZero => "a non-zero",
    };
    Err(ServiceError::InvalidQuantity(format!(
        "{} requires {} quantity, got {}",
        movement_type.as_str(),
        expected,
        quantity
    )))
}

/// Bounds how long a Postgres transaction waits on aggregate row locks.
///
/// Other backends serialize writers without row locks, so this is a no-op
/// there.
pub(crate) async fn bound_row_lock_wait<C>(db: &C, wait: Duration) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if db.get_database_backend() != DbBackend::Postgres {
        return Ok(());
    }
    db.execute_unprepared(&format!("SET LOCAL lock_timeout = '{}ms'", wait.as_millis()))
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Fails with `InvalidChainKey` unless every entity the key names exists,
/// has the expected type, and is active.
pub(crate) async fn ensure_chain_key_exists<C, K>(db: &C, key: &K) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
    K: ChainKey,
{
    let required = key.required_entities();
    let ids: Vec<Uuid> = required.iter().map(|(_, id)| *id).collect();

    let found = TrackedEntity::find()
        .filter(tracked_entity::Column::Id.is_in(ids))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    for (entity_type, id) in required {
        let known = found
            .iter()
            .any(|e| e.id == id && e.entity_type == entity_type && e.active);
        if !known {
            return Err(ServiceError::InvalidChainKey(format!(
                "{}: {} {} does not exist or is inactive",
                key,
                entity_type.as_str(),
                id
            )));
        }
    }
    Ok(())
}

/// Looks up the aggregate for a chain key, taking a row lock when asked and
/// the backend supports it.
pub(crate) async fn find_aggregate<C, K>(
    db: &C,
    key: &K,
    for_update: bool,
) -> Result<Option<stock_aggregate::Model>, ServiceError>
where
    C: ConnectionTrait,
    K: ChainKey,
{
    let mut query = StockAggregate::find()
        .filter(stock_aggregate::Column::ChainKind.eq(K::KIND.as_str()))
        .filter(stock_aggregate::Column::ChainKey.eq(key.storage_key()));

    if for_update && db.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }

    query.one(db).await.map_err(ServiceError::db_error)
}

/// Returns the locked aggregate, creating it at zero on first use.
pub(crate) async fn load_or_create_aggregate<C, K>(
    db: &C,
    key: &K,
    now: DateTime<Utc>,
) -> Result<stock_aggregate::Model, ServiceError>
where
    C: ConnectionTrait,
    K: ChainKey,
{
    if let Some(aggregate) = find_aggregate(db, key, true).await? {
        return Ok(aggregate);
    }

    let aggregate = stock_aggregate::ActiveModel {
        id: Set(Uuid::new_v4()),
        chain_kind: Set(K::KIND.as_str().to_string()),
        chain_key: Set(key.storage_key()),
        scope_id: Set(key.scope_id()),
        sub_id: Set(key.sub_id()),
        current_quantity: Set(Decimal::ZERO),
        reserved_quantity: Set(Decimal::ZERO),
        average_unit_cost: Set(Decimal::ZERO),
        total_value: Set(Decimal::ZERO),
        last_movement_at: Set(None),
        movement_count: Set(0),
        needs_recalculation: Set(false),
        last_recalculated_at: Set(None),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)?;

    info!(chain_key = %key, aggregate_id = %aggregate.id, "created stock aggregate");
    Ok(aggregate)
}

/// All movements of one chain key in insertion order.
pub(crate) async fn movements_for<C>(
    db: &C,
    kind: ChainKind,
    storage_key: &str,
) -> Result<Vec<stock_movement::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    StockMovement::find()
        .filter(stock_movement::Column::ChainKind.eq(kind.as_str()))
        .filter(stock_movement::Column::ChainKey.eq(storage_key))
        .order_by_asc(stock_movement::Column::Sequence)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Loads a reservation movement of the given kind.
pub(crate) async fn find_reservation<C>(
    db: &C,
    kind: ChainKind,
    reservation_id: Uuid,
) -> Result<stock_movement::Model, ServiceError>
where
    C: ConnectionTrait,
{
    StockMovement::find_by_id(reservation_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .filter(|m| m.movement_type == MovementType::Reservation && m.chain_kind == kind.as_str())
        .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))
}

/// Quantity a reservation still withholds: its amount minus every issue and
/// unreserve linked to it.
pub(crate) async fn reservation_remaining<C>(
    db: &C,
    reservation: &stock_movement::Model,
) -> Result<Decimal, ServiceError>
where
    C: ConnectionTrait,
{
    let resolved: Decimal = StockMovement::find()
        .filter(stock_movement::Column::ReservationId.eq(reservation.id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .iter()
        .filter(|m| matches!(m.movement_type, MovementType::Issue | MovementType::Unreserve))
        .map(|m| m.quantity.abs())
        .sum();

    Ok((reservation.quantity - resolved).max(Decimal::ZERO))
}

/// Stamps, costs and writes one movement, then folds it into the aggregate.
///
/// The caller must hold the chain-key lock and pass the aggregate it read in
/// the same transaction. Nothing is written when a check fails.
pub(crate) async fn apply_movement<C>(
    db: &C,
    aggregate: stock_aggregate::Model,
    draft: MovementDraft,
    now: DateTime<Utc>,
) -> Result<(stock_aggregate::Model, stock_movement::Model), ServiceError>
where
    C: ConnectionTrait,
{
    check_sign(draft.movement_type, draft.quantity)?;

    let stamp = balance_calculator::stamp(
        &aggregate,
        draft.movement_type,
        draft.quantity,
        draft.movement_date,
    )?;

    let mut new_reserved = aggregate
        .reserved_quantity
        .checked_add(stamp.reserved_delta)
        .and_then(|reserved| reserved.checked_sub(draft.release_reserved))
        .ok_or_else(|| {
            ServiceError::InvalidQuantity("reserved quantity exceeds the representable range".into())
        })?;
    if new_reserved < Decimal::ZERO {
        warn!(
            chain_key = %aggregate.chain_key,
            reserved = %aggregate.reserved_quantity,
            "reserved quantity would go negative; clamping to zero"
        );
        new_reserved = Decimal::ZERO;
    }

    let new_current = stamp.current_balance;
    if new_current < Decimal::ZERO || new_current - new_reserved < Decimal::ZERO {
        return Err(ServiceError::insufficient(
            aggregate.chain_key.clone(),
            aggregate.available_quantity(),
            draft.quantity.abs(),
        ));
    }

    let average = aggregate.average_unit_cost;
    let (unit_cost, new_average) = if draft.movement_type.is_costed_inbound() {
        match draft.unit_cost {
            Some(cost) => (
                Some(cost),
                balance_calculator::weighted_average_cost(
                    aggregate.current_quantity,
                    average,
                    draft.quantity,
                    cost,
                )?,
            ),
            None => (Some(average), average),
        }
    } else if draft.movement_type.affects_on_hand() {
        if draft.quantity < Decimal::ZERO {
            (Some(average), average)
        } else {
            (draft.unit_cost.or(Some(average)), average)
        }
    } else {
        (None, average)
    };

    let sequence = aggregate.movement_count + 1;
    let (reference_type, reference_id) = match draft.reference {
        Some(r) => (Some(r.reference_type), Some(r.reference_id)),
        None => (None, None),
    };

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        aggregate_id: Set(aggregate.id),
        chain_kind: Set(aggregate.chain_kind.clone()),
        chain_key: Set(aggregate.chain_key.clone()),
        sequence: Set(sequence),
        movement_type: Set(draft.movement_type),
        quantity: Set(draft.quantity),
        unit_cost: Set(unit_cost),
        previous_balance: Set(stamp.previous_balance),
        current_balance: Set(stamp.current_balance),
        reservation_id: Set(draft.reservation_id),
        transfer_id: Set(draft.transfer_id),
        reference_type: Set(reference_type),
        reference_id: Set(reference_id),
        performed_by: Set(draft.performed_by),
        notes: Set(draft.notes),
        movement_date: Set(draft.movement_date),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)?;

    let last_movement_at = match aggregate.last_movement_at {
        Some(latest) if latest >= draft.movement_date => Some(latest),
        _ => Some(draft.movement_date),
    };

    if stamp.backdated {
        warn!(
            chain_key = %aggregate.chain_key,
            movement_id = %movement.id,
            movement_date = %draft.movement_date,
            "backdated movement recorded; chain flagged for recalculation"
        );
    }

    let mut active: stock_aggregate::ActiveModel = aggregate.clone().into();
    active.current_quantity = Set(new_current);
    active.reserved_quantity = Set(new_reserved);
    active.average_unit_cost = Set(new_average);
    active.total_value = Set(balance_calculator::stock_value(new_current, new_average)?);
    active.last_movement_at = Set(last_movement_at);
    active.movement_count = Set(sequence);
    active.needs_recalculation = Set(aggregate.needs_recalculation || stamp.backdated);
    active.version = Set(aggregate.version + 1);
    active.updated_at = Set(now);

    let updated = active.update(db).await.map_err(ServiceError::db_error)?;

    counter!(
        "inventory_ledger.movements.committed",
        1,
        "type" => draft.movement_type.as_str()
    );

    Ok((updated, movement))
}

impl<K: ChainKey> StockLedger<K> {
    /// Appends a caller-initiated movement (receipt, issue, adjustment,
    /// return, return_to_supplier).
    ///
    /// Transfer legs and reservation traffic go through their own operations
    /// and are rejected here with `InvalidMovementType`.
    #[instrument(
        skip(self, request),
        fields(
            kind = K::KIND.as_str(),
            chain_key = %request.chain_key,
            movement_type = request.movement_type.as_str(),
            quantity = %request.quantity
        )
    )]
    pub async fn append(
        &self,
        request: MovementRequest<K>,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.append_inner(request)
            .await
            .map_err(|e| self.rejected("append", e))
    }

    async fn append_inner(
        &self,
        request: MovementRequest<K>,
    ) -> Result<stock_movement::Model, ServiceError> {
        if request.movement_type.is_engine_managed() {
            return Err(ServiceError::InvalidMovementType(format!(
                "{} movements are created by the ledger itself",
                request.movement_type.as_str()
            )));
        }
        if let Some(reference) = &request.reference {
            reference.validate()?;
        }
        if request.reservation_id.is_some() && request.movement_type != MovementType::Issue {
            return Err(ServiceError::ValidationError(
                "only issue movements may consume a reservation".to_string(),
            ));
        }
        check_sign(request.movement_type, request.quantity)?;
        balance_calculator::check_bounds(request.quantity, request.unit_cost)?;

        let key = request.chain_key.clone();
        let lock_wait = self.config.lock_timeout();
        let guard = self.locks.acquire(&key.lock_id()).await?;

        // Stamped under the lock so undated appends stay in commit order.
        let now = Utc::now();
        let mut draft = MovementDraft::new(
            request.movement_type,
            request.quantity,
            request.movement_date.unwrap_or(now),
        );
        draft.unit_cost = request.unit_cost;
        draft.reservation_id = request.reservation_id;
        draft.reference = request.reference;
        draft.performed_by = request.performed_by;
        draft.notes = request.notes;

        let (aggregate, movement) = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let mut draft = draft;
                bound_row_lock_wait(txn, lock_wait).await?;
                ensure_chain_key_exists(txn, &key).await?;
                let aggregate = load_or_create_aggregate(txn, &key, now).await?;

                if let Some(reservation_id) = draft.reservation_id {
                    let reservation = find_reservation(txn, K::KIND, reservation_id).await?;
                    if reservation.aggregate_id != aggregate.id {
                        return Err(ServiceError::NotFound(format!(
                            "reservation {} on {}",
                            reservation_id, key
                        )));
                    }
                    let remaining = reservation_remaining(txn, &reservation).await?;
                    draft.release_reserved = draft.quantity.abs().min(remaining);
                }

                apply_movement(txn, aggregate, draft, now).await
            })
        })
        .await?;
        drop(guard);

        info!(
            movement_id = %movement.id,
            current_balance = %movement.current_balance,
            reserved = %aggregate.reserved_quantity,
            "movement appended"
        );

        self.publish_committed(&aggregate, &movement).await;

        Ok(movement)
    }
}
