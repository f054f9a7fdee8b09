//! Generic ledger engine shared by part and fuel stock.
//!
//! `StockLedger<K>` is the only writer of movements and aggregates for chain
//! keys of type `K`. Its operations are split by component: appends live in
//! `ledger_store`, holds in `reservations`, paired moves in `transfers`, and
//! drift handling in `audit` and `recalculation`.

use metrics::counter;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::balance_calculator;
use super::ledger_store;
use crate::config::LedgerConfig;
use crate::db::{ChainLockManager, DbPool};
use crate::entities::stock_aggregate;
use crate::entities::stock_movement::{self, Entity as StockMovement};
use crate::errors::ServiceError;
use crate::events::{EventSender, LedgerEvent};
use crate::models::{ChainKey, StockSnapshot};

const MAX_PAGE_SIZE: u64 = 1000;

pub struct StockLedger<K: ChainKey> {
    pub(crate) db: Arc<DbPool>,
    pub(crate) locks: Arc<ChainLockManager>,
    pub(crate) config: LedgerConfig,
    pub(crate) events: Option<EventSender>,
    _key: PhantomData<fn() -> K>,
}

impl<K: ChainKey> Clone for StockLedger<K> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            _key: PhantomData,
        }
    }
}

impl<K: ChainKey> StockLedger<K> {
    /// Creates an engine over `db`. Engines for different key types may share
    /// one lock manager; lock ids are namespaced by chain kind.
    pub fn new(db: Arc<DbPool>, locks: Arc<ChainLockManager>, config: LedgerConfig) -> Self {
        Self {
            db,
            locks,
            config,
            events: None,
            _key: PhantomData,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) async fn publish(&self, event: LedgerEvent) {
        if let Some(events) = &self.events {
            events.send_or_log(event).await;
        }
    }

    pub(crate) async fn publish_committed(
        &self,
        aggregate: &stock_aggregate::Model,
        movement: &stock_movement::Model,
    ) {
        self.publish(LedgerEvent::MovementCommitted {
            movement_id: movement.id,
            chain_kind: K::KIND,
            chain_key: aggregate.chain_key.clone(),
            movement_type: movement.movement_type,
            quantity: movement.quantity,
            current_balance: movement.current_balance,
            reserved_quantity: aggregate.reserved_quantity,
        })
        .await;
    }

    /// Counts and logs a rejected operation before handing the error back.
    pub(crate) fn rejected(&self, operation: &'static str, err: ServiceError) -> ServiceError {
        counter!(
            "inventory_ledger.operations.rejected",
            1,
            "kind" => K::KIND.as_str(),
            "operation" => operation,
            "code" => err.code()
        );
        debug!(operation, error = %err, "ledger operation rejected");
        err
    }

    /// Read-only snapshot of the cached aggregate. A known key with no
    /// movements yet reports zeros.
    #[instrument(skip(self), fields(kind = K::KIND.as_str()))]
    pub async fn aggregate(&self, key: &K) -> Result<StockSnapshot<K>, ServiceError> {
        let db = self.db.as_ref();
        ledger_store::ensure_chain_key_exists(db, key).await?;

        Ok(match ledger_store::find_aggregate(db, key, false).await? {
            Some(aggregate) => StockSnapshot::from_aggregate(key.clone(), &aggregate),
            None => StockSnapshot::empty(key.clone()),
        })
    }

    /// Movement history, newest first. `page` is 1-based.
    #[instrument(skip(self), fields(kind = K::KIND.as_str()))]
    pub async fn movements(
        &self,
        key: &K,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ServiceError::ValidationError(format!(
                "Limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let db = self.db.as_ref();
        ledger_store::ensure_chain_key_exists(db, key).await?;

        let paginator = StockMovement::find()
            .filter(stock_movement::Column::ChainKind.eq(K::KIND.as_str()))
            .filter(stock_movement::Column::ChainKey.eq(key.storage_key()))
            .order_by_desc(stock_movement::Column::Sequence)
            .paginate(db, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let models = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((models, total))
    }

    /// Full balance chain in chronological order.
    #[instrument(skip(self), fields(kind = K::KIND.as_str()))]
    pub async fn chain(&self, key: &K) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let db = self.db.as_ref();
        ledger_store::ensure_chain_key_exists(db, key).await?;

        let mut movements = ledger_store::movements_for(db, K::KIND, &key.storage_key()).await?;
        balance_calculator::sort_chronologically(&mut movements);
        Ok(movements)
    }

    /// Every chain key of this kind that has an aggregate.
    pub async fn chain_keys(&self) -> Result<Vec<K>, ServiceError> {
        let aggregates = stock_aggregate::Entity::find()
            .filter(stock_aggregate::Column::ChainKind.eq(K::KIND.as_str()))
            .order_by_asc(stock_aggregate::Column::ChainKey)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        aggregates
            .into_iter()
            .map(|a| {
                K::from_parts(a.scope_id, a.sub_id).ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "aggregate {} does not describe a {} key",
                        a.id,
                        K::KIND
                    ))
                })
            })
            .collect()
    }
}
