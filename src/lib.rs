pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Assemble the application router on top of a prepared state.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/checkout", post(handlers::checkout::create_checkout))
        .route(
            "/api/v1/payments/webhook",
            post(handlers::payments::payment_webhook),
        )
        .route(
            "/api/v1/payments/return/:tracking_code",
            get(handlers::payments::payment_return),
        )
        .route(
            "/api/v1/payments/cancel/:tracking_code",
            get(handlers::payments::payment_cancel),
        )
        .route("/health", get(handlers::health::health))
        .with_state(state);

    api.merge(
        SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
    )
    .layer(TraceLayer::new_for_http())
    .layer(PropagateRequestIdLayer::x_request_id())
    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    .layer(TimeoutLayer::new(Duration::from_secs(30)))
    .layer(CorsLayer::permissive())
}
