use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Surplus API",
        version = "0.1.0",
        description = r#"
# Surplus food reservations

Stores list discounted surplus stock with a pickup window; customers reserve
a quantity, the store confirms or rejects, and the pickup completes it.

## Identity

Authentication happens at the gateway. Every call that acts on behalf of a
user carries two headers:

- `x-actor-id`: the caller's UUID
- `x-actor-role`: `customer`, `store_owner` or `admin`

## Errors

Failures return an `ErrorResponse` whose `code` is a stable kind such as
`insufficient_stock` or `conflict`. Only `conflict` is `retryable`: re-read
the resource and try again.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Stores", description = "Store registration and status"),
        (name = "Inventory", description = "Surplus items and pickup windows"),
        (name = "Reservations", description = "Reservation lifecycle"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::health::health_check,

        crate::handlers::stores::create_store,
        crate::handlers::stores::list_stores,
        crate::handlers::stores::get_store,
        crate::handlers::stores::set_store_active,

        crate::handlers::inventory::create_item,
        crate::handlers::inventory::list_store_items,
        crate::handlers::inventory::list_available_items,
        crate::handlers::inventory::get_item,
        crate::handlers::inventory::update_item,

        crate::handlers::reservations::create_reservation,
        crate::handlers::reservations::list_my_reservations,
        crate::handlers::reservations::list_store_reservations,
        crate::handlers::reservations::get_reservation,
        crate::handlers::reservations::get_reservation_history,
        crate::handlers::reservations::update_reservation_status,
    ),
    components(
        schemas(
            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentStatus,

            crate::handlers::stores::StoreResponse,
            crate::handlers::stores::CreateStoreRequest,
            crate::handlers::stores::SetStoreActiveRequest,

            crate::handlers::inventory::InventoryItemResponse,
            crate::services::inventory::CreateItemInput,
            crate::services::inventory::UpdateItemInput,

            crate::handlers::reservations::ReservationResponse,
            crate::handlers::reservations::StatusHistoryResponse,
            crate::handlers::reservations::CreateReservationRequest,
            crate::handlers::reservations::UpdateStatusRequest,
            crate::entities::reservation::ReservationStatus,
            crate::auth::Role,

            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;
