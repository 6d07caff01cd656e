use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::inventory_item,
    errors::ServiceError,
    services::inventory::{CreateItemInput, UpdateItemInput},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InventoryItemResponse {
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub original_price: Option<Decimal>,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
    /// Stock left and pickup window open right now
    pub is_orderable: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<inventory_item::Model> for InventoryItemResponse {
    fn from(model: inventory_item::Model) -> Self {
        let is_orderable = model.is_orderable(Utc::now());
        let available_quantity = model.available_quantity();
        Self {
            id: model.id,
            store_id: model.store_id,
            name: model.name,
            description: model.description,
            unit_price: model.unit_price,
            original_price: model.original_price,
            total_quantity: model.total_quantity,
            reserved_quantity: model.reserved_quantity,
            available_quantity,
            available_from: model.available_from,
            available_until: model.available_until,
            is_orderable,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AvailableItemsQuery {
    /// Maximum number of items returned
    pub limit: Option<u64>,
}

/// Routes nested under `/stores`.
pub fn store_item_routes() -> Router<AppState> {
    Router::new().route("/:id/items", get(list_store_items).post(create_item))
}

/// Routes nested under `/items`.
pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_available_items))
        .route("/:id", get(get_item).put(update_item))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{id}/items",
    params(("id" = Uuid, Path, description = "Store id")),
    request_body = CreateItemInput,
    responses(
        (status = 201, description = "Item created", body = ApiResponse<InventoryItemResponse>),
        (status = 400, description = "Invalid item", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the store owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown store", body = crate::errors::ErrorResponse),
    ),
    tag = "Inventory"
)]
pub async fn create_item(
    State(state): State<AppState>,
    actor: Actor,
    Path(store_id): Path<Uuid>,
    Json(request): Json<CreateItemInput>,
) -> Result<(StatusCode, Json<ApiResponse<InventoryItemResponse>>), ServiceError> {
    let item = state.inventory.create_item(&actor, store_id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(InventoryItemResponse::from(item))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{id}/items",
    params(("id" = Uuid, Path, description = "Store id")),
    responses(
        (status = 200, description = "Items of the store", body = ApiResponse<Vec<InventoryItemResponse>>),
        (status = 404, description = "Unknown store", body = crate::errors::ErrorResponse),
    ),
    tag = "Inventory"
)]
pub async fn list_store_items(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Vec<InventoryItemResponse>> {
    let items = state.inventory.list_items_for_store(store_id).await?;
    Ok(Json(ApiResponse::success(
        items.into_iter().map(InventoryItemResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/items",
    params(AvailableItemsQuery),
    responses(
        (status = 200, description = "Items that can be reserved now", body = ApiResponse<Vec<InventoryItemResponse>>),
    ),
    tag = "Inventory"
)]
pub async fn list_available_items(
    State(state): State<AppState>,
    Query(query): Query<AvailableItemsQuery>,
) -> ApiResult<Vec<InventoryItemResponse>> {
    let items = state
        .inventory
        .list_available_items(Utc::now(), query.limit)
        .await?;
    Ok(Json(ApiResponse::success(
        items.into_iter().map(InventoryItemResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Inventory item id")),
    responses(
        (status = 200, description = "Item found", body = ApiResponse<InventoryItemResponse>),
        (status = 404, description = "Unknown item", body = crate::errors::ErrorResponse),
    ),
    tag = "Inventory"
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<InventoryItemResponse> {
    let item = state.inventory.get_item(id).await?;
    Ok(Json(ApiResponse::success(item.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Inventory item id")),
    request_body = UpdateItemInput,
    responses(
        (status = 200, description = "Item updated", body = ApiResponse<InventoryItemResponse>),
        (status = 400, description = "Invalid change", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the store owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown item", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item changed concurrently", body = crate::errors::ErrorResponse),
    ),
    tag = "Inventory"
)]
pub async fn update_item(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateItemInput>,
) -> ApiResult<InventoryItemResponse> {
    let item = state.inventory.update_item(&actor, id, request).await?;
    Ok(Json(ApiResponse::success(item.into())))
}
