use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::models::{CustomerInfo, GatewayStatus, PaymentInstructions, PaymentIntent, PaymentMethod};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("gateway response for a {method} payment carries no payment instructions")]
    MissingInstructions { method: PaymentMethod },
}

/// One product line as the gateway displays it to the payer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentItem {
    pub title: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

/// Everything needed to open a payment intent for an existing order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// Sent as `externalId` so the gateway record points back to the order.
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub customer: CustomerInfo,
    pub items: Vec<PaymentItem>,
    pub postback_url: String,
    pub utm_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentStatusReport {
    pub status: GatewayStatus,
    /// Full gateway payload, kept for logging and diagnostics.
    pub raw: serde_json::Value,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, GatewayError>;

    async fn get_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, GatewayError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseItem<'a> {
    unit_price: i64,
    title: &'a str,
    quantity: i32,
    tangible: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseBody<'a> {
    name: &'a str,
    email: &'a str,
    cpf: &'a str,
    phone: &'a str,
    payment_method: PaymentMethod,
    amount: i64,
    traceable: bool,
    items: Vec<PurchaseItem<'a>>,
    external_id: String,
    postback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    utm_query: Option<&'a str>,
}

impl<'a> From<&'a PaymentRequest> for PurchaseBody<'a> {
    fn from(request: &'a PaymentRequest) -> Self {
        Self {
            name: &request.customer.name,
            email: &request.customer.email,
            cpf: &request.customer.tax_id,
            phone: &request.customer.phone,
            payment_method: request.method,
            amount: request.amount_cents,
            traceable: true,
            items: request
                .items
                .iter()
                .map(|item| PurchaseItem {
                    unit_price: item.unit_price_cents,
                    title: &item.title,
                    quantity: item.quantity,
                    tangible: true,
                })
                .collect(),
            external_id: request.order_id.to_string(),
            postback_url: &request.postback_url,
            utm_query: request.utm_query.as_deref().filter(|q| !q.is_empty()),
        }
    }
}

/// Purchase response; which optional fields are present depends on the method.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    id: String,
    #[serde(default)]
    custom_id: Option<String>,
    status: GatewayStatus,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    pix_code: Option<String>,
    #[serde(default)]
    pix_qr_code: Option<String>,
    #[serde(default)]
    billet_url: Option<String>,
    #[serde(default)]
    billet_code: Option<String>,
}

impl PurchaseResponse {
    fn into_intent(
        self,
        method: PaymentMethod,
        amount_cents: i64,
    ) -> Result<PaymentIntent, GatewayError> {
        let instructions = match method {
            PaymentMethod::Pix => PaymentInstructions::Pix {
                pix_code: non_blank(self.pix_code)
                    .ok_or(GatewayError::MissingInstructions { method })?,
                pix_qr_code: non_blank(self.pix_qr_code),
            },
            PaymentMethod::Billet => PaymentInstructions::Billet {
                billet_url: non_blank(self.billet_url)
                    .ok_or(GatewayError::MissingInstructions { method })?,
                billet_code: non_blank(self.billet_code),
            },
            PaymentMethod::CreditCard => PaymentInstructions::CreditCard,
        };

        Ok(PaymentIntent {
            id: self.id,
            status: self.status,
            amount_cents,
            expires_at: self.expires_at.as_deref().and_then(parse_timestamp),
            instructions,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The gateway sends either RFC 3339 or a naive timestamp in UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn truncate(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// HTTP client for the PIX payment gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Gateway rejected request");
        Err(GatewayError::Status {
            status: status.as_u16(),
            body: truncate(body),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount_cents = request.amount_cents, method = %request.method))]
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, GatewayError> {
        counter!("storefront.gateway.requests", 1, "operation" => "create_payment");

        let body = PurchaseBody::from(&request);
        let response = self
            .client
            .post(self.url("transaction.purchase"))
            .header(AUTHORIZATION, &self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gateway purchase request failed: {}", e);
                counter!("storefront.gateway.errors", 1, "operation" => "create_payment");
                GatewayError::Transport(e)
            })?;

        let response = Self::check_status(response).await.map_err(|e| {
            counter!("storefront.gateway.errors", 1, "operation" => "create_payment");
            e
        })?;

        let purchase: PurchaseResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        if let Some(custom_id) = purchase.custom_id.as_deref() {
            debug!(custom_id, "Gateway assigned custom id");
        }

        let intent = purchase.into_intent(request.method, request.amount_cents)?;
        info!(payment_id = %intent.id, status = %intent.status, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn get_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, GatewayError> {
        counter!("storefront.gateway.requests", 1, "operation" => "get_payment_status");

        let response = self
            .client
            .get(self.url("transaction.getPayment"))
            .query(&[("id", payment_id)])
            .header(AUTHORIZATION, &self.secret_key)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let status = raw
            .get("status")
            .and_then(serde_json::Value::as_str)
            .map(GatewayStatus::from)
            .ok_or_else(|| GatewayError::Decode("missing status field".to_string()))?;

        debug!(status = %status, "Gateway reported payment status");
        Ok(PaymentStatusReport { status, raw })
    }
}
