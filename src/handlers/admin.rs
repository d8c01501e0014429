use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::OrderStatus;
use crate::{ApiResponse, ApiResult, AppState};

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub order_id: Uuid,
    pub previous: OrderStatus,
    pub status: OrderStatus,
    pub changed: bool,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state
        .config
        .admin_api_key
        .as_deref()
        .filter(|key| !key.is_empty())
    else {
        return Err(ServiceError::Unauthorized(
            "admin access is not configured".to_string(),
        ));
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if crate::handlers::postback::constant_time_eq(provided, expected) {
        Ok(())
    } else {
        warn!("Rejected admin request with a missing or wrong key");
        Err(ServiceError::Unauthorized("invalid admin key".to_string()))
    }
}

/// PATCH /api/v1/admin/orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<UpdateStatusResponse> {
    authorize(&state, &headers)?;

    let change = state
        .services
        .orders
        .update_status(order_id, request.status)
        .await?;

    Ok(Json(ApiResponse::success(UpdateStatusResponse {
        order_id,
        previous: change.previous,
        status: change.current,
        changed: change.changed(),
    })))
}
