use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::AccessToken;
use crate::repositories::OrderWithItems;
use crate::services::reconciliation::PaymentCheck;
use crate::{ApiResponse, ApiResult, AppState};

/// Every visitor-facing order route is scoped by the caller's access token.
#[derive(Debug, Deserialize)]
pub struct AccessTokenQuery {
    pub access_token: Option<String>,
}

impl AccessTokenQuery {
    fn token(&self) -> Result<AccessToken, ServiceError> {
        self.access_token
            .clone()
            .and_then(AccessToken::parse)
            .ok_or_else(|| ServiceError::ValidationError("access_token is required".to_string()))
    }
}

/// GET /api/v1/orders?access_token=...
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AccessTokenQuery>,
) -> ApiResult<Vec<OrderWithItems>> {
    let token = query.token()?;
    let orders = state.services.orders.list_orders(&token).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /api/v1/orders/:id?access_token=...
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<AccessTokenQuery>,
) -> ApiResult<OrderWithItems> {
    let token = query.token()?;
    let order = state.services.orders.get_order(order_id, &token).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders/:id/payment-status?access_token=...
///
/// One reconciliation pass; storefront pages call this on every poll tick.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<AccessTokenQuery>,
) -> ApiResult<PaymentCheck> {
    let token = query.token()?;
    let check = state
        .services
        .reconciliation
        .check_once(order_id, &token)
        .await?;
    Ok(Json(ApiResponse::success(check)))
}
