//! Transfer Coordinator: paired out/in movements committed as one unit.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::balance_calculator;
use super::ledger_store::{self, MovementDraft};
use super::stock_ledger::StockLedger;
use crate::db::with_transaction;
use crate::entities::stock_movement::MovementType;
use crate::errors::ServiceError;
use crate::events::LedgerEvent;
use crate::models::{ChainKey, TransferRequest, TransferResult};

/// Whether the source aggregate is locked before the destination.
fn source_locks_first<K: ChainKey>(source: &K, dest: &K) -> bool {
    source.lock_id() < dest.lock_id()
}

impl<K: ChainKey> StockLedger<K> {
    /// Moves `quantity` from `source_key` to `dest_key`.
    ///
    /// Both chain keys are locked in sorted order regardless of direction.
    /// The `transfer_out` and `transfer_in` legs commit together or not at
    /// all. The destination's average cost absorbs the transfer cost, which
    /// defaults to the source's average.
    #[instrument(
        skip(self, request),
        fields(
            kind = K::KIND.as_str(),
            source = %request.source_key,
            dest = %request.dest_key,
            quantity = %request.quantity
        )
    )]
    pub async fn transfer(
        &self,
        request: TransferRequest<K>,
    ) -> Result<TransferResult, ServiceError> {
        self.transfer_inner(request)
            .await
            .map_err(|e| self.rejected("transfer", e))
    }

    async fn transfer_inner(
        &self,
        request: TransferRequest<K>,
    ) -> Result<TransferResult, ServiceError> {
        ledger_store::check_sign(MovementType::TransferIn, request.quantity)?;
        balance_calculator::check_bounds(request.quantity, request.unit_cost)?;
        if request.source_key == request.dest_key {
            return Err(ServiceError::ValidationError(
                "source and destination must be different chain keys".to_string(),
            ));
        }
        if let Some(reference) = &request.reference {
            reference.validate()?;
        }

        let transfer_id = Uuid::new_v4();
        let quantity = request.quantity;
        let source_key = request.source_key.clone();
        let dest_key = request.dest_key.clone();
        let lock_wait = self.config.lock_timeout();

        let guard = self
            .locks
            .acquire_many([source_key.lock_id(), dest_key.lock_id()])
            .await?;
        let now = Utc::now();
        let movement_date = request.movement_date.unwrap_or(now);

        let (source, out_movement, dest, in_movement) =
            with_transaction(self.db.as_ref(), move |txn| {
                Box::pin(async move {
                    ledger_store::bound_row_lock_wait(txn, lock_wait).await?;
                    ledger_store::ensure_chain_key_exists(txn, &source_key).await?;
                    ledger_store::ensure_chain_key_exists(txn, &dest_key).await?;

                    // Row locks follow the same order as the chain-key locks.
                    let (source, dest) = if source_locks_first(&source_key, &dest_key) {
                        let source = ledger_store::find_aggregate(txn, &source_key, true).await?;
                        let dest =
                            ledger_store::load_or_create_aggregate(txn, &dest_key, now).await?;
                        (source, dest)
                    } else {
                        let dest =
                            ledger_store::load_or_create_aggregate(txn, &dest_key, now).await?;
                        let source = ledger_store::find_aggregate(txn, &source_key, true).await?;
                        (source, dest)
                    };

                    let available = source
                        .as_ref()
                        .map(|a| a.available_quantity())
                        .unwrap_or(Decimal::ZERO);
                    let source = match source {
                        Some(aggregate) if available >= quantity => aggregate,
                        _ => {
                            return Err(ServiceError::insufficient(
                                source_key.storage_key(),
                                available,
                                quantity,
                            ))
                        }
                    };

                    let unit_cost = request.unit_cost.unwrap_or(source.average_unit_cost);

                    let mut out_draft =
                        MovementDraft::new(MovementType::TransferOut, -quantity, movement_date);
                    out_draft.transfer_id = Some(transfer_id);
                    out_draft.unit_cost = Some(unit_cost);
                    out_draft.reference = request.reference.clone();
                    out_draft.performed_by = request.performed_by;
                    out_draft.notes = request.notes.clone();
                    let (source, out_movement) =
                        ledger_store::apply_movement(txn, source, out_draft, now).await?;

                    let mut in_draft =
                        MovementDraft::new(MovementType::TransferIn, quantity, movement_date);
                    in_draft.transfer_id = Some(transfer_id);
                    in_draft.unit_cost = Some(unit_cost);
                    in_draft.reference = request.reference;
                    in_draft.performed_by = request.performed_by;
                    in_draft.notes = request.notes;
                    let (dest, in_movement) =
                        ledger_store::apply_movement(txn, dest, in_draft, now).await?;

                    Ok((source, out_movement, dest, in_movement))
                })
            })
            .await?;
        drop(guard);

        counter!("inventory_ledger.transfers.completed", 1, "kind" => K::KIND.as_str());
        info!(
            %transfer_id,
            source_balance = %source.current_quantity,
            dest_balance = %dest.current_quantity,
            dest_average_cost = %dest.average_unit_cost,
            "transfer committed"
        );

        self.publish_committed(&source, &out_movement).await;
        self.publish_committed(&dest, &in_movement).await;
        self.publish(LedgerEvent::TransferCompleted {
            transfer_id,
            chain_kind: K::KIND,
            source_key: source.chain_key.clone(),
            dest_key: dest.chain_key.clone(),
            quantity,
        })
        .await;

        Ok(TransferResult {
            transfer_id,
            out_movement,
            in_movement,
        })
    }
}
