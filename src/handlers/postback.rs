use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{GatewayStatus, OrderStatus};
use crate::{ApiResponse, ApiResult, AppState};

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";
const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Status notification sent by the gateway to the postback URL.
#[derive(Debug, Deserialize)]
pub struct PostbackPayload {
    #[serde(alias = "paymentId", alias = "transactionId")]
    pub id: String,
    pub status: GatewayStatus,
}

#[derive(Debug, Serialize)]
pub struct PostbackAck {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub changed: bool,
}

/// POST /api/v1/payments/postback
pub async fn payment_postback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<PostbackAck> {
    let Some(secret) = state
        .config
        .payment_webhook_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
    else {
        warn!("Payment postback refused, no webhook secret configured");
        return Err(ServiceError::Unauthorized(
            "payment postbacks are not configured".to_string(),
        ));
    };

    let tolerance = state
        .config
        .payment_webhook_tolerance_secs
        .unwrap_or(DEFAULT_TOLERANCE_SECS);
    if !verify_signature(&headers, &body, secret, tolerance, chrono::Utc::now().timestamp()) {
        warn!("Payment postback signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid postback signature".to_string(),
        ));
    }

    let payload: PostbackPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid postback body: {}", e)))?;

    info!(payment_id = %payload.id, status = payload.status.as_str(), "Payment postback received");

    let outcome = state
        .services
        .reconciliation
        .apply_postback(&payload.id, payload.status)
        .await?;

    Ok(Json(ApiResponse::success(PostbackAck {
        order_id: outcome.order_id,
        status: outcome.change.current,
        changed: outcome.change.changed(),
    })))
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(ts), Some(signature)) = (header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER)) else {
        return false;
    };
    let Ok(ts) = ts.trim().parse::<i64>() else {
        return false;
    };
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    sign_payload(secret, ts, body)
        .map(|expected| constant_time_eq(&expected, signature.trim()))
        .unwrap_or(false)
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed_headers(ts: i64, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
        headers
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let body = br#"{"id":"pay_1","status":"PAID"}"#;
        let signature = sign_payload("whsec", 1_700_000_000, body).unwrap();
        let headers = signed_headers(1_700_000_000, &signature);
        assert!(verify_signature(&headers, body, "whsec", 300, 1_700_000_100));
    }

    #[test]
    fn rejects_tampering_and_stale_timestamps() {
        let body = br#"{"id":"pay_1","status":"PAID"}"#;
        let signature = sign_payload("whsec", 1_700_000_000, body).unwrap();
        let headers = signed_headers(1_700_000_000, &signature);

        assert!(!verify_signature(&headers, br#"{"id":"pay_2","status":"PAID"}"#, "whsec", 300, 1_700_000_000));
        assert!(!verify_signature(&headers, body, "other", 300, 1_700_000_000));
        assert!(!verify_signature(&headers, body, "whsec", 300, 1_700_000_301));
        assert!(!verify_signature(&HeaderMap::new(), body, "whsec", 300, 1_700_000_000));
    }

    #[test]
    fn payload_accepts_gateway_field_names() {
        let payload: PostbackPayload =
            serde_json::from_str(r#"{"paymentId":"pay_9","status":"approved"}"#).unwrap();
        assert_eq!(payload.id, "pay_9");
        assert_eq!(payload.status, GatewayStatus::Approved);
    }
}
