//! Registry of warehouses and parts that chain keys may reference.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::tracked_entity::{self, EntityType, Entity as TrackedEntity};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterEntityRequest {
    /// Caller-supplied id; generated when absent.
    pub id: Option<Uuid>,
    pub entity_type: EntityType,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

#[derive(Clone)]
pub struct EntityDirectory {
    db_pool: Arc<DatabaseConnection>,
}

impl EntityDirectory {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self), fields(entity_type = request.entity_type.as_str()))]
    pub async fn register(
        &self,
        request: RegisterEntityRequest,
    ) -> Result<tracked_entity::Model, ServiceError> {
        request.validate()?;
        let db = self.db_pool.as_ref();
        let id = request.id.unwrap_or_else(Uuid::new_v4);

        if TrackedEntity::find_by_id(id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .is_some()
        {
            return Err(ServiceError::ValidationError(format!(
                "entity {} is already registered",
                id
            )));
        }

        let entity = tracked_entity::ActiveModel {
            id: Set(id),
            entity_type: Set(request.entity_type),
            name: Set(request.name),
            active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(entity_id = %entity.id, name = %entity.name, "tracked entity registered");
        Ok(entity)
    }

    /// Retired entities stay on record but no longer form valid chain keys.
    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<tracked_entity::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let entity = self.get(id).await?;

        let mut model: tracked_entity::ActiveModel = entity.into();
        model.active = Set(active);
        model.update(db).await.map_err(ServiceError::db_error)
    }

    pub async fn get(&self, id: Uuid) -> Result<tracked_entity::Model, ServiceError> {
        TrackedEntity::find_by_id(id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("entity {}", id)))
    }
}
