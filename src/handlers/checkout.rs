use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{CheckoutError, ServiceError};
use crate::models::{AccessToken, CheckoutInput, OrderReceipt, PaymentMethod};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct RetryPaymentRequest {
    pub access_token: AccessToken,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// POST /api/v1/checkout
pub async fn submit_order(
    State(state): State<AppState>,
    Json(input): Json<CheckoutInput>,
) -> Result<impl IntoResponse, CheckoutError> {
    let receipt = state.services.checkout.submit_order(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

/// POST /api/v1/orders/:id/retry-payment
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RetryPaymentRequest>,
) -> Result<Json<ApiResponse<OrderReceipt>>, ServiceError> {
    let receipt = state
        .services
        .checkout
        .retry_payment(order_id, &request.access_token, request.payment_method)
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}
