//! Inventory Ledger Library
//!
//! Append-only stock movement ledger with cached running balances,
//! reservations, atomic transfers, drift audits and full-chain recalculation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod services;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::LedgerConfig;
use crate::db::{ChainLockManager, DbPool};
use crate::events::EventSender;
use crate::models::{FuelStockKey, PartStockKey};
use crate::services::{EntityDirectory, StockLedger};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub entities: EntityDirectory,
    pub parts: Arc<StockLedger<PartStockKey>>,
    pub fuel: Arc<StockLedger<FuelStockKey>>,
}

impl AppState {
    /// Builds both ledgers over one pool and one lock manager.
    pub fn new(db: Arc<DbPool>, config: LedgerConfig, events: Option<EventSender>) -> Self {
        let locks = Arc::new(ChainLockManager::new(config.lock_timeout()));

        let mut parts = StockLedger::new(db.clone(), locks.clone(), config.clone());
        let mut fuel = StockLedger::new(db.clone(), locks, config);
        if let Some(events) = events {
            parts = parts.with_events(events.clone());
            fuel = fuel.with_events(events);
        }

        Self {
            entities: EntityDirectory::new(db.clone()),
            db,
            parts: Arc::new(parts),
            fuel: Arc::new(fuel),
        }
    }
}

/// Full HTTP application: health probes, entity registry and one ledger
/// router per chain kind.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "inventory-ledger up" }))
        .merge(handlers::health::routes().with_state(state.db.clone()))
        .nest(
            "/api/v1/entities",
            handlers::entities::routes().with_state(state.entities.clone()),
        )
        .nest(
            "/api/v1/parts",
            handlers::ledger::routes::<PartStockKey>().with_state(state.parts.clone()),
        )
        .nest(
            "/api/v1/fuel",
            handlers::ledger::routes::<FuelStockKey>().with_state(state.fuel.clone()),
        )
        .layer(TraceLayer::new_for_http())
}
