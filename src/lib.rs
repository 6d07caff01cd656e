//! Surplus API Library
//!
//! Stores list discounted surplus stock with a pickup window, customers
//! reserve part of it and the store walks each reservation through
//! confirmation to pickup.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn, Span};
use utoipa::{OpenApi, ToSchema};

use services::{InventoryService, ReservationLedger, StoreService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub stores: StoreService,
    pub inventory: InventoryService,
    pub reservations: ReservationLedger,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let reservations = ReservationLedger::new(
            db.clone(),
            event_sender.clone(),
            config.reservation.clone(),
        );
        Self {
            stores: StoreService::new(db.clone()),
            inventory: InventoryService::new(db.clone()),
            reservations,
            db,
            config,
            event_sender,
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDocV1::openapi())
}

fn http_request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.is_development() {
        info!("Using permissive CORS because no origins are configured in development");
        CorsLayer::permissive()
    } else {
        warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// Assembles the full HTTP surface: health, metrics, the OpenAPI document
/// and the versioned API, wrapped in tracing, CORS, timeout and request-id
/// layers.
pub fn build_router(state: AppState) -> Router {
    metrics::init();

    let classifier = SharedClassifier::new(StatusInRangeAsFailures::new(500..=599));
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", handlers::api_v1_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new(classifier).make_span_with(http_request_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub mod prelude {
    pub use crate::auth::{Actor, Role};
    pub use crate::config::{AppConfig, ReservationPolicyConfig};
    pub use crate::entities::reservation::ReservationStatus;
    pub use crate::errors::ServiceError;
    pub use crate::events::{EventSender, EventType, ReservationEvent};
    pub use crate::services::{
        InventoryService, ReservationLedger, StatusChange, StoreService,
    };
    pub use crate::{build_router, ApiResponse, AppState};
}
