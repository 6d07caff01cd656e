use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor, entities::store, errors::ServiceError, ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<store::Model> for StoreResponse {
    fn from(model: store::Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            name: model.name,
            address: model.address,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateStoreRequest {
    /// Defaults to the calling owner; only admins may name someone else
    pub owner_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStoreActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListStoresQuery {
    /// Only stores of this owner
    pub owner_id: Option<Uuid>,
}

pub fn store_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stores).post(create_store))
        .route("/:id", get(get_store))
        .route("/:id/active", put(set_store_active))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores",
    request_body = CreateStoreRequest,
    responses(
        (status = 201, description = "Store created", body = ApiResponse<StoreResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not allowed to register this store", body = crate::errors::ErrorResponse),
    ),
    tag = "Stores"
)]
pub async fn create_store(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateStoreRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StoreResponse>>), ServiceError> {
    request.validate()?;

    let owner_id = request.owner_id.unwrap_or(actor.user_id);
    let store = state
        .stores
        .create_store(&actor, owner_id, request.name, request.address)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(StoreResponse::from(store))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores",
    params(ListStoresQuery),
    responses(
        (status = 200, description = "Stores listed", body = ApiResponse<Vec<StoreResponse>>),
    ),
    tag = "Stores"
)]
pub async fn list_stores(
    State(state): State<AppState>,
    Query(query): Query<ListStoresQuery>,
) -> ApiResult<Vec<StoreResponse>> {
    let stores = state.stores.list_stores(query.owner_id).await?;
    Ok(Json(ApiResponse::success(
        stores.into_iter().map(StoreResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{id}",
    params(("id" = Uuid, Path, description = "Store id")),
    responses(
        (status = 200, description = "Store found", body = ApiResponse<StoreResponse>),
        (status = 404, description = "Unknown store", body = crate::errors::ErrorResponse),
    ),
    tag = "Stores"
)]
pub async fn get_store(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StoreResponse> {
    let store = state.stores.get_store(id).await?;
    Ok(Json(ApiResponse::success(store.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/stores/{id}/active",
    params(("id" = Uuid, Path, description = "Store id")),
    request_body = SetStoreActiveRequest,
    responses(
        (status = 200, description = "Store status updated", body = ApiResponse<StoreResponse>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown store", body = crate::errors::ErrorResponse),
    ),
    tag = "Stores"
)]
pub async fn set_store_active(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<SetStoreActiveRequest>,
) -> ApiResult<StoreResponse> {
    let store = state
        .stores
        .set_store_active(&actor, id, request.active)
        .await?;
    Ok(Json(ApiResponse::success(store.into())))
}
