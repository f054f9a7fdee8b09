use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::{EntityDirectory, RegisterEntityRequest};

/// Create the tracked entity router
pub fn routes() -> Router<EntityDirectory> {
    Router::new()
        .route("/", post(register_entity))
        .route("/:id", get(get_entity))
        .route("/:id/activate", post(activate_entity))
        .route("/:id/deactivate", post(deactivate_entity))
}

async fn register_entity(
    State(directory): State<EntityDirectory>,
    Json(request): Json<RegisterEntityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let entity = directory.register(request).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn get_entity(
    State(directory): State<EntityDirectory>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(directory.get(id).await?))
}

async fn activate_entity(
    State(directory): State<EntityDirectory>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(directory.set_active(id, true).await?))
}

async fn deactivate_entity(
    State(directory): State<EntityDirectory>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(directory.set_active(id, false).await?))
}
