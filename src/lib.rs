pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod notifications;
pub mod openapi;
pub mod services;

use axum::{response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::OpenApi;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

/// Builds the full v1 API router. State is applied by the caller.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(health))
        .route("/health", get(health))
        .nest("/carts", handlers::carts::carts_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/orders", handlers::checkout::orders_routes())
        .nest("/payments", handlers::payment_webhooks::webhook_routes())
        .nest("/loyalty", handlers::loyalty::loyalty_routes())
}

/// Root, health, and OpenAPI routes.
pub fn base_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(|| async { "bakeshop-api up" }))
        .route("/health", get(health))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
}

/// Liveness plus a database round trip.
async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<Value> {
    let db_ok = state.db.ping().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
