//! Inventory store.
//!
//! Tracks total and held quantity per item. The three stock operations
//! (`try_reserve`, `release`, `commit`) are single conditional `UPDATE`
//! statements so concurrent callers cannot oversell; they take any
//! [`ConnectionTrait`] so the reservation ledger can run them inside its
//! own transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Actor;
use crate::entities::inventory_item::{self, Column, Entity as InventoryItemEntity};
use crate::entities::store;
use crate::errors::ServiceError;
use crate::services::stores::find_store;

/// Quantity successfully held against an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHold {
    pub item_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    /// Item state with the hold applied
    pub item: inventory_item::Model,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateItemInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub original_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub total_quantity: i32,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateItemInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub unit_price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    /// Restock or write-down; may not drop below the held quantity
    #[validate(range(min = 0))]
    pub total_quantity: Option<i32>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    /// Version the caller last read; a mismatch is a `Conflict`
    pub expected_version: Option<i32>,
}

fn validate_pricing(unit_price: Decimal, original_price: Option<Decimal>) -> Result<(), ServiceError> {
    if unit_price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "unit_price must not be negative".to_string(),
        ));
    }
    if let Some(original) = original_price {
        if original < unit_price {
            return Err(ServiceError::ValidationError(
                "original_price must not be below unit_price".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_window(from: DateTime<Utc>, until: DateTime<Utc>) -> Result<(), ServiceError> {
    if from >= until {
        return Err(ServiceError::ValidationError(
            "available_from must be before available_until".to_string(),
        ));
    }
    Ok(())
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be at least 1, got {}",
            quantity
        )));
    }
    Ok(())
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<inventory_item::Model, ServiceError> {
    InventoryItemEntity::find_by_id(item_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Inventory item {} not found", item_id)))
}

#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Holds `quantity` units of an item.
    ///
    /// Fails with `NotFound` for an unknown item, `WindowExpired` when `now`
    /// is outside the availability window and `InsufficientStock` when fewer
    /// than `quantity` units are free. On failure nothing is written.
    #[instrument(skip(conn))]
    pub async fn try_reserve<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<ReservationHold, ServiceError> {
        validate_quantity(quantity)?;

        // Write before any read so the row lock is taken up front
        let result = InventoryItemEntity::update_many()
            .col_expr(
                Column::ReservedQuantity,
                Expr::col(Column::ReservedQuantity).add(quantity),
            )
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(item_id))
            .filter(Column::AvailableFrom.lte(now))
            .filter(Column::AvailableUntil.gte(now))
            .filter(
                Expr::col(Column::TotalQuantity)
                    .gte(Expr::col(Column::ReservedQuantity).add(quantity)),
            )
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        let item = find_item(conn, item_id).await?;

        if result.rows_affected == 0 {
            if !item.window_contains(now) {
                return Err(ServiceError::WindowExpired(format!(
                    "Inventory item {} is available from {} until {}",
                    item_id, item.available_from, item.available_until
                )));
            }
            debug!(item_id = %item_id, quantity, "Stock hold refused");
            return Err(ServiceError::InsufficientStock(format!(
                "Requested {} of item {}, {} available",
                quantity,
                item_id,
                item.available_quantity()
            )));
        }

        debug!(item_id = %item_id, quantity, "Stock held");
        Ok(ReservationHold {
            item_id,
            store_id: item.store_id,
            quantity,
            item,
        })
    }

    /// Returns held units to available stock, never dropping below zero.
    #[instrument(skip(conn))]
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        validate_quantity(quantity)?;

        let result = InventoryItemEntity::update_many()
            .col_expr(
                Column::ReservedQuantity,
                Expr::case(
                    Expr::col(Column::ReservedQuantity).gte(quantity),
                    Expr::col(Column::ReservedQuantity).sub(quantity),
                )
                .finally(0)
                .into(),
            )
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(item_id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Inventory item {} not found",
                item_id
            )));
        }

        debug!(item_id = %item_id, quantity, "Stock released");
        Ok(())
    }

    /// Consumes held units: total and reserved drop together.
    ///
    /// Fails with `Conflict` if the item no longer holds `quantity` units,
    /// which means its counters were changed outside the ledger.
    #[instrument(skip(conn))]
    pub async fn commit<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        validate_quantity(quantity)?;

        let result = InventoryItemEntity::update_many()
            .col_expr(
                Column::TotalQuantity,
                Expr::col(Column::TotalQuantity).sub(quantity),
            )
            .col_expr(
                Column::ReservedQuantity,
                Expr::col(Column::ReservedQuantity).sub(quantity),
            )
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(item_id))
            .filter(Column::ReservedQuantity.gte(quantity))
            .filter(Column::TotalQuantity.gte(quantity))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            find_item(conn, item_id).await?;
            warn!(item_id = %item_id, quantity, "Commit found fewer held units than expected");
            return Err(ServiceError::Conflict(format!(
                "Inventory item {} does not hold {} units",
                item_id, quantity
            )));
        }

        debug!(item_id = %item_id, quantity, "Stock committed");
        Ok(())
    }

    /// Adds an item to a store. Only the store's owner or an admin may.
    #[instrument(skip(self, input), fields(actor_id = %actor.user_id))]
    pub async fn create_item(
        &self,
        actor: &Actor,
        store_id: Uuid,
        input: CreateItemInput,
    ) -> Result<inventory_item::Model, ServiceError> {
        input.validate()?;
        validate_pricing(input.unit_price, input.original_price)?;
        validate_window(input.available_from, input.available_until)?;

        let db = &*self.db_pool;
        let store = find_store(db, store_id).await?;
        if !actor.acts_for_owner(store.owner_id) {
            return Err(ServiceError::Unauthorized(
                "only the store owner may add inventory".to_string(),
            ));
        }

        let now = Utc::now();
        let item = inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            unit_price: Set(input.unit_price),
            original_price: Set(input.original_price),
            total_quantity: Set(input.total_quantity),
            reserved_quantity: Set(0),
            available_from: Set(input.available_from),
            available_until: Set(input.available_until),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(item_id = %item.id, store_id = %store_id, total = item.total_quantity, "Inventory item created");
        Ok(item)
    }

    /// Edits an item's listing or restocks it.
    #[instrument(skip(self, patch), fields(actor_id = %actor.user_id))]
    pub async fn update_item(
        &self,
        actor: &Actor,
        item_id: Uuid,
        patch: UpdateItemInput,
    ) -> Result<inventory_item::Model, ServiceError> {
        patch.validate()?;

        let db = &*self.db_pool;
        let current = find_item(db, item_id).await?;
        let store = find_store(db, current.store_id).await?;
        if !actor.acts_for_owner(store.owner_id) {
            return Err(ServiceError::Unauthorized(
                "only the store owner may edit inventory".to_string(),
            ));
        }

        if let Some(expected) = patch.expected_version {
            if expected != current.version {
                return Err(ServiceError::Conflict(format!(
                    "Inventory item {} is at version {}, not {}",
                    item_id, current.version, expected
                )));
            }
        }

        let unit_price = patch.unit_price.unwrap_or(current.unit_price);
        let original_price = patch.original_price.or(current.original_price);
        validate_pricing(unit_price, original_price)?;

        let available_from = patch.available_from.unwrap_or(current.available_from);
        let available_until = patch.available_until.unwrap_or(current.available_until);
        validate_window(available_from, available_until)?;

        let total_quantity = patch.total_quantity.unwrap_or(current.total_quantity);
        if total_quantity < current.reserved_quantity {
            return Err(ServiceError::ValidationError(format!(
                "total_quantity {} is below the {} units currently reserved",
                total_quantity, current.reserved_quantity
            )));
        }

        let now = Utc::now();
        let changes = inventory_item::ActiveModel {
            name: patch
                .name
                .map(|n| Set(n.trim().to_string()))
                .unwrap_or_default(),
            description: patch.description.map(|d| Set(Some(d))).unwrap_or_default(),
            unit_price: Set(unit_price),
            original_price: Set(original_price),
            total_quantity: Set(total_quantity),
            available_from: Set(available_from),
            available_until: Set(available_until),
            version: Set(current.version + 1),
            updated_at: Set(now),
            ..Default::default()
        };

        // A version bump by any stock operation in between makes this a no-match
        let result = InventoryItemEntity::update_many()
            .set(changes)
            .filter(Column::Id.eq(item_id))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            warn!(item_id = %item_id, "Concurrent modification detected for inventory item");
            return Err(ServiceError::Conflict(format!(
                "Inventory item {} was modified concurrently",
                item_id
            )));
        }

        let updated = find_item(db, item_id).await?;
        info!(item_id = %item_id, version = updated.version, "Inventory item updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: Uuid) -> Result<inventory_item::Model, ServiceError> {
        find_item(&*self.db_pool, item_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_items_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let db = &*self.db_pool;
        find_store(db, store_id).await?;

        InventoryItemEntity::find()
            .filter(Column::StoreId.eq(store_id))
            .order_by_asc(Column::AvailableUntil)
            .order_by_asc(Column::Name)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Items a customer could reserve at `now`: window open, stock left,
    /// store active.
    #[instrument(skip(self))]
    pub async fn list_available_items(
        &self,
        now: DateTime<Utc>,
        limit: Option<u64>,
    ) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let mut query = InventoryItemEntity::find()
            .inner_join(store::Entity)
            .filter(store::Column::IsActive.eq(true))
            .filter(Column::AvailableFrom.lte(now))
            .filter(Column::AvailableUntil.gte(now))
            .filter(Expr::col((InventoryItemEntity, Column::TotalQuantity)).gt(Expr::col((
                InventoryItemEntity,
                Column::ReservedQuantity,
            ))))
            .order_by_asc(Column::AvailableUntil);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        query
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
