//! Full replay of a chain key's history to repair drift.
//!
//! This is the only path that rewrites stored balances. It holds the chain
//! lock for the whole scan-and-rewrite pass, so live appends on the same key
//! wait until it finishes.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tracing::{error, info, instrument, warn};

use super::balance_calculator;
use super::ledger_store;
use super::stock_ledger::StockLedger;
use crate::db::with_transaction;
use crate::entities::{stock_aggregate, stock_movement};
use crate::errors::ServiceError;
use crate::events::LedgerEvent;
use crate::models::{ChainKey, RecalculationOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecalculationStats {
    transactions_processed: u64,
    corrections_made: u64,
    final_balance: Decimal,
}

impl<K: ChainKey> StockLedger<K> {
    /// Replays every movement of `key` from `initial_balance` (zero when
    /// absent), restamps the rows whose balances differ and overwrites the
    /// cached aggregate.
    ///
    /// Never returns an error: lock timeouts, unknown keys and datastore
    /// failures come back as `success: false` with `retryable` set for
    /// transient failures. Running it twice in a row makes no corrections the
    /// second time.
    #[instrument(skip(self), fields(kind = K::KIND.as_str(), chain_key = %key))]
    pub async fn recalculate(
        &self,
        key: &K,
        initial_balance: Option<Decimal>,
    ) -> RecalculationOutcome {
        let initial_balance = initial_balance.unwrap_or(Decimal::ZERO);

        match self.try_recalculate(key, initial_balance).await {
            Ok(stats) => {
                counter!(
                    "inventory_ledger.recalculation.corrections",
                    stats.corrections_made,
                    "kind" => K::KIND.as_str()
                );
                info!(
                    transactions_processed = stats.transactions_processed,
                    corrections_made = stats.corrections_made,
                    final_balance = %stats.final_balance,
                    "recalculation finished"
                );
                self.publish(LedgerEvent::ChainRecalculated {
                    chain_kind: K::KIND,
                    chain_key: key.storage_key(),
                    transactions_processed: stats.transactions_processed,
                    corrections_made: stats.corrections_made,
                    final_balance: stats.final_balance,
                })
                .await;

                RecalculationOutcome {
                    success: true,
                    chain_key: key.storage_key(),
                    transactions_processed: stats.transactions_processed,
                    corrections_made: stats.corrections_made,
                    initial_balance,
                    final_balance: Some(stats.final_balance),
                    error: None,
                    retryable: false,
                }
            }
            Err(e) => {
                counter!(
                    "inventory_ledger.recalculation.failures",
                    1,
                    "kind" => K::KIND.as_str(),
                    "code" => e.code()
                );
                if e.is_retryable() {
                    warn!(error = %e, "recalculation could not start");
                } else {
                    error!(error = %e, "recalculation failed");
                }

                RecalculationOutcome {
                    success: false,
                    chain_key: key.storage_key(),
                    transactions_processed: 0,
                    corrections_made: 0,
                    initial_balance,
                    final_balance: None,
                    error: Some(e.to_string()),
                    retryable: e.is_retryable(),
                }
            }
        }
    }

    async fn try_recalculate(
        &self,
        key: &K,
        initial_balance: Decimal,
    ) -> Result<RecalculationStats, ServiceError> {
        ledger_store::ensure_chain_key_exists(self.db.as_ref(), key).await?;

        let lock_wait = self.config.lock_timeout();
        let guard = self.locks.acquire(&key.lock_id()).await?;
        let key = key.clone();
        let now = Utc::now();

        let stats = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                ledger_store::bound_row_lock_wait(txn, lock_wait).await?;
                let Some(aggregate) = ledger_store::find_aggregate(txn, &key, true).await? else {
                    return Ok(RecalculationStats {
                        transactions_processed: 0,
                        corrections_made: 0,
                        final_balance: initial_balance,
                    });
                };

                let mut movements =
                    ledger_store::movements_for(txn, K::KIND, &key.storage_key()).await?;
                balance_calculator::sort_chronologically(&mut movements);
                let replay = balance_calculator::replay(&movements, initial_balance)?;

                let mut corrections_made = 0u64;
                for balance in replay.corrections() {
                    stock_movement::ActiveModel {
                        id: sea_orm::ActiveValue::Unchanged(balance.movement_id),
                        previous_balance: Set(balance.previous_balance),
                        current_balance: Set(balance.current_balance),
                        ..Default::default()
                    }
                    .update(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                    corrections_made += 1;
                }

                let final_balance = replay.final_balance;
                let aggregate_drifted = aggregate.current_quantity != final_balance;
                if aggregate_drifted {
                    warn!(
                        stored = %aggregate.current_quantity,
                        recomputed = %final_balance,
                        "cached balance overwritten"
                    );
                }

                let last_movement_at = movements.iter().map(|m| m.movement_date).max();
                let average = aggregate.average_unit_cost;
                let version = aggregate.version;
                let mut active: stock_aggregate::ActiveModel = aggregate.into();
                active.current_quantity = Set(final_balance);
                active.total_value = Set(balance_calculator::stock_value(final_balance, average)?);
                active.last_movement_at = Set(last_movement_at);
                active.needs_recalculation = Set(false);
                active.last_recalculated_at = Set(Some(now));
                active.version = Set(version + 1);
                active.updated_at = Set(now);
                active.update(txn).await.map_err(ServiceError::db_error)?;

                Ok(RecalculationStats {
                    transactions_processed: movements.len() as u64,
                    corrections_made,
                    final_balance,
                })
            })
        })
        .await?;
        drop(guard);

        Ok(stats)
    }
}
