//! Store management.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::entities::store::{self, Entity as StoreEntity};
use crate::errors::ServiceError;

const MAX_STORE_NAME_LEN: usize = 200;

/// Loads a store or fails with `NotFound`.
pub(crate) async fn find_store<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
) -> Result<store::Model, ServiceError> {
    StoreEntity::find_by_id(store_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Store {} not found", store_id)))
}

#[derive(Clone)]
pub struct StoreService {
    db_pool: Arc<DatabaseConnection>,
}

impl StoreService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Registers a store. Owners register their own; admins may register
    /// one on behalf of any owner.
    #[instrument(skip(self, name, address), fields(actor_id = %actor.user_id))]
    pub async fn create_store(
        &self,
        actor: &Actor,
        owner_id: Uuid,
        name: String,
        address: Option<String>,
    ) -> Result<store::Model, ServiceError> {
        match actor.role {
            Role::Admin => {}
            Role::StoreOwner if actor.user_id == owner_id => {}
            Role::StoreOwner => {
                return Err(ServiceError::Unauthorized(
                    "store owners may only register their own stores".to_string(),
                ))
            }
            Role::Customer => {
                return Err(ServiceError::Unauthorized(
                    "customers may not register stores".to_string(),
                ))
            }
        }

        let name = name.trim().to_string();
        if name.is_empty() || name.len() > MAX_STORE_NAME_LEN {
            return Err(ServiceError::ValidationError(format!(
                "store name must be 1 to {} characters",
                MAX_STORE_NAME_LEN
            )));
        }
        let address = address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let now = Utc::now();
        let store = store::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            name: Set(name),
            address: Set(address),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(ServiceError::db_error)?;

        info!(store_id = %store.id, owner_id = %owner_id, "Store created");
        Ok(store)
    }

    #[instrument(skip(self))]
    pub async fn get_store(&self, store_id: Uuid) -> Result<store::Model, ServiceError> {
        find_store(&*self.db_pool, store_id).await
    }

    /// Lists stores, optionally only those of one owner.
    #[instrument(skip(self))]
    pub async fn list_stores(&self, owner_id: Option<Uuid>) -> Result<Vec<store::Model>, ServiceError> {
        let mut query = StoreEntity::find();
        if let Some(owner_id) = owner_id {
            query = query.filter(store::Column::OwnerId.eq(owner_id));
        }

        query
            .order_by_asc(store::Column::Name)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Enables or disables a store. Inactive stores accept no new reservations.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn set_store_active(
        &self,
        actor: &Actor,
        store_id: Uuid,
        active: bool,
    ) -> Result<store::Model, ServiceError> {
        if !actor.is_admin() {
            return Err(ServiceError::Unauthorized(
                "only admins may change store status".to_string(),
            ));
        }

        let existing = find_store(&*self.db_pool, store_id).await?;
        if existing.is_active == active {
            return Ok(existing);
        }

        let mut store: store::ActiveModel = existing.into();
        store.is_active = Set(active);
        store.updated_at = Set(Utc::now());

        let updated = store
            .update(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        info!(store_id = %store_id, active, "Store status changed");
        Ok(updated)
    }
}
