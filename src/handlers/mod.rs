pub mod health;
pub mod inventory;
pub mod reservations;
pub mod stores;

use axum::Router;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Versioned API surface, mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest(
            "/stores",
            stores::store_routes().merge(inventory::store_item_routes()),
        )
        .nest("/items", inventory::item_routes())
        .nest("/reservations", reservations::reservation_routes())
}
