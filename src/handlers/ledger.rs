//! HTTP surface of a `StockLedger<K>`.
//!
//! The same routes serve every chain kind; the router is nested once per
//! kind (`/api/v1/parts`, `/api/v1/fuel`). Chain keys travel in the JSON body
//! for writes and in the query string for reads.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::PaginationParams;
use crate::entities::stock_movement::MovementType;
use crate::errors::ServiceError;
use crate::models::{
    ChainKey, MovementRequest, Reference, ReserveRequest, TransferRequest, UnreserveRequest,
};
use crate::services::StockLedger;

/// Create the ledger router for chain keys of type `K`
pub fn routes<K: ChainKey>() -> Router<Arc<StockLedger<K>>> {
    Router::new()
        .route("/movements", post(append_movement::<K>))
        .route(
            "/reservations",
            get(list_reservations::<K>).post(reserve::<K>),
        )
        .route("/reservations/:id/unreserve", post(unreserve::<K>))
        .route("/transfers", post(transfer::<K>))
        .route("/aggregate", get(get_aggregate::<K>))
        .route("/history", get(get_history::<K>))
        .route("/chain", get(get_chain::<K>))
        .route("/audit", get(audit::<K>))
        .route("/audit/all", get(audit_all::<K>))
        .route("/recalculate", post(recalculate::<K>))
}

/// Movement body with the type kept as text so unknown values map to a
/// ledger error instead of a generic JSON rejection.
#[derive(Debug, Deserialize)]
pub struct AppendMovementBody<K> {
    pub chain_key: K,
    pub movement_type: String,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    pub reservation_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub movement_date: Option<DateTime<Utc>>,
}

impl<K: ChainKey> AppendMovementBody<K> {
    fn into_request(self) -> Result<MovementRequest<K>, ServiceError> {
        let movement_type = MovementType::from_str(&self.movement_type).map_err(|_| {
            ServiceError::InvalidMovementType(format!(
                "unknown movement type '{}'",
                self.movement_type
            ))
        })?;

        Ok(MovementRequest {
            chain_key: self.chain_key,
            movement_type,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            reference: self.reference,
            reservation_id: self.reservation_id,
            performed_by: self.performed_by,
            notes: self.notes,
            movement_date: self.movement_date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RecalculateBody<K> {
    pub chain_key: K,
    pub initial_balance: Option<Decimal>,
}

async fn append_movement<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Json(body): Json<AppendMovementBody<K>>,
) -> Result<impl IntoResponse, ServiceError> {
    let movement = ledger.append(body.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn reserve<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Json(request): Json<ReserveRequest<K>>,
) -> Result<impl IntoResponse, ServiceError> {
    let movement = ledger.reserve(request).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn list_reservations<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Query(key): Query<K>,
) -> Result<impl IntoResponse, ServiceError> {
    let reservations = ledger.open_reservations(&key).await?;
    Ok(Json(reservations))
}

async fn unreserve<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Path(reservation_id): Path<Uuid>,
    body: Option<Json<UnreserveRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let movement = ledger.unreserve(reservation_id, request).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn transfer<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Json(request): Json<TransferRequest<K>>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = ledger.transfer(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn get_aggregate<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Query(key): Query<K>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(ledger.aggregate(&key).await?))
}

async fn get_history<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Query(key): Query<K>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (movements, total) = ledger
        .movements(&key, pagination.page, pagination.limit)
        .await?;

    Ok(Json(json!({
        "movements": movements,
        "total": total,
        "page": pagination.page,
        "limit": pagination.limit,
    })))
}

async fn get_chain<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Query(key): Query<K>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(ledger.chain(&key).await?))
}

async fn audit<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Query(key): Query<K>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(ledger.audit(&key).await?))
}

async fn audit_all<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(ledger.audit_all().await?))
}

/// Always answers with the outcome body; the status only reflects whether
/// the run succeeded and whether retrying may help.
async fn recalculate<K: ChainKey>(
    State(ledger): State<Arc<StockLedger<K>>>,
    Json(body): Json<RecalculateBody<K>>,
) -> impl IntoResponse {
    let outcome = ledger
        .recalculate(&body.chain_key, body.initial_balance)
        .await;

    let status = if outcome.success {
        StatusCode::OK
    } else if outcome.retryable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(outcome))
}
