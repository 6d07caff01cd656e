#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde_json::Value;
use surplus_api::{
    auth::{Actor, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER},
    config::{AppConfig, ReservationPolicyConfig},
    db,
    entities::{inventory_item, reservation, store},
    events::{EventSender, ReservationEvent},
    services::inventory::CreateItemInput,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state backed by a private SQLite database.
///
/// The in-memory variant holds a single connection: every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    events: mpsc::Receiver<ReservationEvent>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(ReservationPolicyConfig::default()).await
    }

    pub async fn with_policy(policy: ReservationPolicyConfig) -> Self {
        let mut cfg = test_config("sqlite::memory:".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.reservation = policy;
        Self::build(cfg).await
    }

    /// A SQLite file under `dir` served by a pool of `connections`, so
    /// concurrent requests really run on separate connections.
    pub async fn pooled_on_disk(dir: &Path, connections: u32) -> Self {
        let url = format!("sqlite://{}?mode=rwc", dir.join("surplus.db").display());
        let mut cfg = test_config(url);
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        Self::build(cfg).await
    }

    async fn build(cfg: AppConfig) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, events) = EventSender::channel(256);
        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = surplus_api::build_router(state.clone());

        Self {
            router,
            state,
            events,
        }
    }

    /// Send a request, optionally on behalf of `actor`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        actor: Option<&Actor>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(actor) = actor {
            builder = builder
                .header(ACTOR_ID_HEADER, actor.user_id.to_string())
                .header(ACTOR_ROLE_HEADER, actor.role.as_str());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Every event emitted so far, in order.
    pub fn drain_events(&mut self) -> Vec<ReservationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn seed_store(&self, owner_id: Uuid) -> store::Model {
        self.state
            .stores
            .create_store(
                &Actor::store_owner(owner_id),
                owner_id,
                "Corner Bakery".to_string(),
                Some("12 Market Street".to_string()),
            )
            .await
            .expect("seed store for tests")
    }

    /// An item whose window opened an hour ago and closes in two hours.
    pub async fn seed_item(&self, store: &store::Model, total_quantity: i32) -> inventory_item::Model {
        let now = Utc::now();
        self.seed_item_with_window(
            store,
            total_quantity,
            now - Duration::hours(1),
            now + Duration::hours(2),
        )
        .await
    }

    pub async fn seed_item_with_window(
        &self,
        store: &store::Model,
        total_quantity: i32,
        available_from: chrono::DateTime<Utc>,
        available_until: chrono::DateTime<Utc>,
    ) -> inventory_item::Model {
        self.state
            .inventory
            .create_item(
                &Actor::store_owner(store.owner_id),
                store.id,
                CreateItemInput {
                    name: "Sourdough loaf".to_string(),
                    description: Some("Baked this morning".to_string()),
                    unit_price: dec!(2.50),
                    original_price: Some(dec!(6.00)),
                    total_quantity,
                    available_from,
                    available_until,
                },
            )
            .await
            .expect("seed inventory item for tests")
    }

    pub async fn reserve(
        &self,
        customer: &Actor,
        item: &inventory_item::Model,
        quantity: i32,
    ) -> Result<reservation::Model, surplus_api::errors::ServiceError> {
        self.state
            .reservations
            .create(customer, item.id, quantity, pickup_time())
            .await
    }

    pub async fn item(&self, item_id: Uuid) -> inventory_item::Model {
        self.state
            .inventory
            .get_item(item_id)
            .await
            .expect("item should exist")
    }
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig::new(
        database_url,
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    )
}

/// A pickup time inside the window of [`TestApp::seed_item`].
pub fn pickup_time() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::minutes(30)
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body should be valid json")
}
