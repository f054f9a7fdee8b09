//! Reservation Manager: holds that withhold quantity without consuming it.
//!
//! A reservation is a `reservation` movement. It is resolved by `issue`
//! movements that name it (consuming stock) or by a single `unreserve`
//! movement that releases whatever is still held.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::balance_calculator;
use super::ledger_store::{self, MovementDraft};
use super::stock_ledger::StockLedger;
use crate::db::with_transaction;
use crate::entities::stock_aggregate::Entity as StockAggregate;
use crate::entities::stock_movement::{self, MovementType};
use crate::errors::ServiceError;
use crate::models::{ChainKey, OpenReservation, Reference, ReserveRequest, UnreserveRequest};

impl<K: ChainKey> StockLedger<K> {
    /// Withholds `quantity` from availability. Fails with
    /// `InsufficientAvailable` when `available < quantity`.
    #[instrument(
        skip(self, request),
        fields(kind = K::KIND.as_str(), chain_key = %request.chain_key, quantity = %request.quantity)
    )]
    pub async fn reserve(
        &self,
        request: ReserveRequest<K>,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.reserve_inner(request)
            .await
            .map_err(|e| self.rejected("reserve", e))
    }

    async fn reserve_inner(
        &self,
        request: ReserveRequest<K>,
    ) -> Result<stock_movement::Model, ServiceError> {
        ledger_store::check_sign(MovementType::Reservation, request.quantity)?;
        balance_calculator::check_bounds(request.quantity, None)?;
        if let Some(reference) = &request.reference {
            reference.validate()?;
        }

        let key = request.chain_key.clone();
        let lock_wait = self.config.lock_timeout();
        let guard = self.locks.acquire(&key.lock_id()).await?;

        let now = Utc::now();
        let mut draft = MovementDraft::new(
            MovementType::Reservation,
            request.quantity,
            request.movement_date.unwrap_or(now),
        );
        draft.reference = request.reference;
        draft.performed_by = request.performed_by;
        draft.notes = request.notes;
        let (aggregate, movement) = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                ledger_store::bound_row_lock_wait(txn, lock_wait).await?;
                ledger_store::ensure_chain_key_exists(txn, &key).await?;
                let aggregate = ledger_store::load_or_create_aggregate(txn, &key, now).await?;
                ledger_store::apply_movement(txn, aggregate, draft, now).await
            })
        })
        .await?;
        drop(guard);

        info!(
            reservation_id = %movement.id,
            reserved = %aggregate.reserved_quantity,
            available = %aggregate.available_quantity(),
            "quantity reserved"
        );
        self.publish_committed(&aggregate, &movement).await;

        Ok(movement)
    }

    /// Releases the open remainder of a reservation without consuming stock.
    ///
    /// Fails with `NotFound` when the id is not a reservation of this chain
    /// kind, with `InvalidChainKey` when its chain key has been deactivated,
    /// and with `NothingToUnreserve` when nothing is left to release.
    #[instrument(skip(self, request), fields(kind = K::KIND.as_str()))]
    pub async fn unreserve(
        &self,
        reservation_id: Uuid,
        request: UnreserveRequest,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.unreserve_inner(reservation_id, request)
            .await
            .map_err(|e| self.rejected("unreserve", e))
    }

    async fn unreserve_inner(
        &self,
        reservation_id: Uuid,
        request: UnreserveRequest,
    ) -> Result<stock_movement::Model, ServiceError> {
        let key = self.key_of_reservation(reservation_id).await?;
        let lock_wait = self.config.lock_timeout();
        let guard = self.locks.acquire(&key.lock_id()).await?;
        let now = Utc::now();
        let (aggregate, movement) = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                ledger_store::bound_row_lock_wait(txn, lock_wait).await?;
                ledger_store::ensure_chain_key_exists(txn, &key).await?;
                let aggregate = ledger_store::load_or_create_aggregate(txn, &key, now).await?;
                let reservation =
                    ledger_store::find_reservation(txn, K::KIND, reservation_id).await?;
                let remaining = ledger_store::reservation_remaining(txn, &reservation).await?;
                if remaining <= Decimal::ZERO {
                    return Err(ServiceError::NothingToUnreserve(reservation_id));
                }

                let mut draft = MovementDraft::new(MovementType::Unreserve, -remaining, now);
                draft.reservation_id = Some(reservation_id);
                draft.reference = reservation
                    .reference_type
                    .clone()
                    .zip(reservation.reference_id.clone())
                    .map(|(t, id)| Reference::new(t, id));
                draft.performed_by = request.performed_by;
                draft.notes = request.reason;

                ledger_store::apply_movement(txn, aggregate, draft, now).await
            })
        })
        .await?;
        drop(guard);

        info!(
            %reservation_id,
            released = %movement.quantity.abs(),
            reserved = %aggregate.reserved_quantity,
            "reservation released"
        );
        self.publish_committed(&aggregate, &movement).await;

        Ok(movement)
    }

    /// Reservations on `key` that still withhold quantity, oldest first.
    #[instrument(skip(self), fields(kind = K::KIND.as_str()))]
    pub async fn open_reservations(&self, key: &K) -> Result<Vec<OpenReservation>, ServiceError> {
        let db = self.db.as_ref();
        ledger_store::ensure_chain_key_exists(db, key).await?;
        let movements = ledger_store::movements_for(db, K::KIND, &key.storage_key()).await?;

        let mut resolved: HashMap<Uuid, Decimal> = HashMap::new();
        for m in &movements {
            if let (Some(rid), MovementType::Issue | MovementType::Unreserve) =
                (m.reservation_id, m.movement_type)
            {
                *resolved.entry(rid).or_default() += m.quantity.abs();
            }
        }

        Ok(movements
            .into_iter()
            .filter(|m| m.movement_type == MovementType::Reservation)
            .filter_map(|reservation| {
                let used = resolved.get(&reservation.id).copied().unwrap_or_default();
                let remaining = reservation.quantity - used;
                (remaining > Decimal::ZERO).then_some(OpenReservation {
                    reservation,
                    remaining,
                })
            })
            .collect())
    }

    /// Resolves the chain key a reservation was recorded against.
    async fn key_of_reservation(&self, reservation_id: Uuid) -> Result<K, ServiceError> {
        let db = self.db.as_ref();
        let reservation = ledger_store::find_reservation(db, K::KIND, reservation_id).await?;
        let aggregate = StockAggregate::find_by_id(reservation.aggregate_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "reservation {} has no aggregate",
                    reservation_id
                ))
            })?;

        K::from_parts(aggregate.scope_id, aggregate.sub_id).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "aggregate {} does not describe a {} key",
                aggregate.id,
                K::KIND
            ))
        })
    }
}
