use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    entities::{
        reservation::{self, ReservationStatus},
        reservation_status_history,
    },
    errors::ServiceError,
    services::StatusChange,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub customer_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    pub pickup_time: DateTime<Utc>,
    pub status: ReservationStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<reservation::Model> for ReservationResponse {
    fn from(model: reservation::Model) -> Self {
        Self {
            id: model.id,
            inventory_id: model.inventory_id,
            customer_id: model.customer_id,
            store_id: model.store_id,
            quantity: model.quantity,
            pickup_time: model.pickup_time,
            status: model.status,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusHistoryResponse {
    pub from_status: Option<ReservationStatus>,
    pub to_status: ReservationStatus,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<reservation_status_history::Model> for StatusHistoryResponse {
    fn from(model: reservation_status_history::Model) -> Self {
        Self {
            from_status: model.from_status,
            to_status: model.to_status,
            actor_id: model.actor_id,
            reason: model.reason,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReservationRequest {
    pub inventory_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub pickup_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateStatusRequest {
    /// Target status; `ACCEPTED` and lower-case names are accepted
    #[validate(length(min = 1, max = 32))]
    pub status: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReservationListQuery {
    /// Only reservations in this status
    pub status: Option<String>,
    /// Owner whose stores to list; admins only, defaults to the caller
    pub owner_id: Option<Uuid>,
}

/// Maps a client-supplied label onto the canonical status.
pub fn parse_status_label(label: &str) -> Result<ReservationStatus, ServiceError> {
    ReservationStatus::from_label(label)
        .ok_or_else(|| ServiceError::ValidationError(format!("unknown reservation status '{}'", label)))
}

fn parse_status_filter(status: Option<&str>) -> Result<Option<ReservationStatus>, ServiceError> {
    status.map(parse_status_label).transpose()
}

pub fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_reservations).post(create_reservation))
        .route("/store", get(list_store_reservations))
        .route("/:id", get(get_reservation))
        .route("/:id/history", get(get_reservation_history))
        .route("/:id/status", post(update_reservation_status))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation placed and stock held", body = ApiResponse<ReservationResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown inventory item", body = crate::errors::ErrorResponse),
        (status = 410, description = "Pickup window closed", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReservationResponse>>), ServiceError> {
    request.validate()?;

    let created = state
        .reservations
        .create(&actor, request.inventory_id, request.quantity, request.pickup_time)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ReservationResponse::from(created))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    params(ReservationListQuery),
    responses(
        (status = 200, description = "The caller's reservations, newest first", body = ApiResponse<Vec<ReservationResponse>>),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn list_my_reservations(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ReservationListQuery>,
) -> ApiResult<Vec<ReservationResponse>> {
    let status = parse_status_filter(query.status.as_deref())?;
    let reservations = state
        .reservations
        .list_by_customer(actor.user_id, status)
        .await?;

    Ok(Json(ApiResponse::success(
        reservations.into_iter().map(ReservationResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/store",
    params(ReservationListQuery),
    responses(
        (status = 200, description = "Reservations against the owner's stores, newest first", body = ApiResponse<Vec<ReservationResponse>>),
        (status = 403, description = "Listing another owner's stores", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn list_store_reservations(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ReservationListQuery>,
) -> ApiResult<Vec<ReservationResponse>> {
    let owner_id = query.owner_id.unwrap_or(actor.user_id);
    if !actor.acts_for_owner(owner_id) {
        return Err(ServiceError::Unauthorized(
            "only admins may list another owner's reservations".to_string(),
        ));
    }

    let status = parse_status_filter(query.status.as_deref())?;
    let reservations = state
        .reservations
        .list_by_store_owner(owner_id, status)
        .await?;

    Ok(Json(ApiResponse::success(
        reservations.into_iter().map(ReservationResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation found", body = ApiResponse<ReservationResponse>),
        (status = 403, description = "Not a party to the reservation", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reservation", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<ReservationResponse> {
    let found = state.reservations.get(id, &actor).await?;
    Ok(Json(ApiResponse::success(found.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}/history",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Status changes, oldest first", body = ApiResponse<Vec<StatusHistoryResponse>>),
        (status = 403, description = "Not a party to the reservation", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reservation", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn get_reservation_history(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<StatusHistoryResponse>> {
    let rows = state.reservations.history(id, &actor).await?;
    Ok(Json(ApiResponse::success(
        rows.into_iter().map(StatusHistoryResponse::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/status",
    params(("id" = Uuid, Path, description = "Reservation id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status applied, or already in that status", body = ApiResponse<ReservationResponse>),
        (status = 400, description = "Unknown status label", body = crate::errors::ErrorResponse),
        (status = 403, description = "Actor may not take this transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reservation", body = crate::errors::ErrorResponse),
        (status = 409, description = "Invalid transition or concurrent modification", body = crate::errors::ErrorResponse),
    ),
    tag = "Reservations"
)]
pub async fn update_reservation_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<ReservationResponse> {
    request.validate()?;

    let change = StatusChange {
        target: parse_status_label(&request.status)?,
        reason: request.reason,
        expected_version: request.expected_version,
    };
    let updated = state
        .reservations
        .apply_status_change(id, change, &actor)
        .await?;

    Ok(Json(ApiResponse::success(updated.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn boundary_labels_map_to_canonical_statuses() {
        assert_eq!(parse_status_label("accepted").unwrap(), ReservationStatus::Confirmed);
        assert_eq!(parse_status_label("ACCEPTED").unwrap(), ReservationStatus::Confirmed);
        assert_eq!(parse_status_label("pending").unwrap(), ReservationStatus::Pending);
        assert_eq!(parse_status_label("REJECTED").unwrap(), ReservationStatus::Rejected);
        assert_matches!(parse_status_label("picked_up"), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn missing_filter_means_all_statuses() {
        assert_eq!(parse_status_filter(None).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("completed")).unwrap(),
            Some(ReservationStatus::Completed)
        );
    }
}
