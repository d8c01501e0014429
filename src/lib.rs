//! Storefront API Library
//!
//! Checkout, PIX payment requests and payment reconciliation for a
//! storefront selling to anonymous visitors.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod services;
pub mod session;
pub mod validation;

use axum::{
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::repositories::{OrderStore, SeaOrmOrderStore};
use crate::services::PaymentGateway;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires the services over a sea-orm backed order store.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: events::EventSender,
    ) -> Self {
        let store: Arc<dyn OrderStore> = Arc::new(SeaOrmOrderStore::new(db.clone()));
        let services = handlers::AppServices::new(store, gateway, event_sender.clone(), &config);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let storefront = Router::new()
        .route("/checkout", post(handlers::checkout::submit_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/payment-status",
            get(handlers::orders::payment_status),
        )
        .route(
            "/orders/:id/retry-payment",
            post(handlers::checkout::retry_payment),
        );

    let payments = Router::new().route(
        "/payments/postback",
        post(handlers::postback::payment_postback),
    );

    let admin = Router::new().route(
        "/admin/orders/:id/status",
        patch(handlers::admin::update_order_status),
    );

    storefront.merge(payments).merge(admin)
}

/// Full application router with tracing, CORS and request timeout layers.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
