use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Stable machine-readable code the storefront uses to pick a message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Order the failure refers to, when one already exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, message: String) -> Self {
        Self {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            code: None,
            order_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse::new(status, self.response_message());

        (status, Json(err)).into_response()
    }
}

/// Everything `submit_order` can report back to the storefront.
///
/// Each variant has its own machine code so the client can render a
/// targeted message instead of a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("tax id failed check-digit validation")]
    InvalidTaxId,

    #[error("amount of {amount_cents} cents is below the minimum of {minimum_cents} cents")]
    AmountTooLow {
        amount_cents: i64,
        minimum_cents: i64,
    },

    #[error("order could not be created: {0}")]
    OrderCreationFailed(String),

    #[error("order items could not be created: {0}")]
    OrderItemsFailed(String),

    /// The order exists and stays `pending`; payment can be retried against it.
    #[error("payment request for order {order_id} failed: {reason}")]
    PaymentRequestFailed { order_id: Uuid, reason: String },
}

impl CheckoutError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        CheckoutError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyCart => "empty_cart",
            Self::InvalidField { .. } => "invalid_field",
            Self::InvalidTaxId => "invalid_tax_id",
            Self::AmountTooLow { .. } => "amount_too_low",
            Self::OrderCreationFailed(_) => "order_creation_failed",
            Self::OrderItemsFailed(_) => "order_items_failed",
            Self::PaymentRequestFailed { .. } => "payment_request_failed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::InvalidField { .. }
            | Self::InvalidTaxId
            | Self::AmountTooLow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OrderCreationFailed(_) | Self::OrderItemsFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::PaymentRequestFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether the caller can try again without changing the input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OrderCreationFailed(_) | Self::OrderItemsFailed(_) | Self::PaymentRequestFailed { .. }
        )
    }

    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Self::PaymentRequestFailed { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut err = ErrorResponse::new(status, self.to_string());
        err.code = Some(self.code().to_string());
        err.order_id = self.order_id();

        (status, Json(err)).into_response()
    }
}
