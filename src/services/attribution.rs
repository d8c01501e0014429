use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AttributionConfig;
use crate::models::{AttributionStatus, CustomerInfo, PaymentMethod, TrackingParameters};

const API_TOKEN_HEADER: &str = "x-api-token";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum AttributionError {
    #[error("attribution request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("attribution service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotProduct {
    pub id: String,
    pub name: String,
    pub quantity: i32,
    pub price_in_cents: i64,
}

/// What the attribution service learns about an order at checkout time.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub status: AttributionStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub customer: CustomerInfo,
    pub products: Vec<SnapshotProduct>,
    pub tracking: TrackingParameters,
    pub total_cents: i64,
}

/// Best-effort sink for order lifecycle events.
///
/// Callers never let a failure here affect the order; errors are only logged.
#[async_trait]
pub trait AttributionReporter: Send + Sync {
    async fn report_order(&self, snapshot: &OrderSnapshot) -> Result<(), AttributionError>;

    async fn update_status(
        &self,
        order_id: Uuid,
        status: AttributionStatus,
    ) -> Result<(), AttributionError>;
}

/// Used when attribution is disabled.
#[derive(Debug, Default, Clone)]
pub struct NoopAttributionReporter;

#[async_trait]
impl AttributionReporter for NoopAttributionReporter {
    async fn report_order(&self, snapshot: &OrderSnapshot) -> Result<(), AttributionError> {
        debug!(order_id = %snapshot.order_id, "Attribution disabled, skipping order report");
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: AttributionStatus,
    ) -> Result<(), AttributionError> {
        debug!(order_id = %order_id, status = %status, "Attribution disabled, skipping status update");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomerPayload<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    document: &'a str,
    country: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductPayload<'a> {
    id: &'a str,
    name: &'a str,
    quantity: i32,
    price_in_cents: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommissionPayload {
    total_price_in_cents: i64,
    gateway_fee_in_cents: i64,
    user_commission_in_cents: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload<'a> {
    order_id: String,
    platform: &'a str,
    payment_method: String,
    status: AttributionStatus,
    created_at: String,
    approved_date: Option<String>,
    refunded_at: Option<String>,
    customer: CustomerPayload<'a>,
    products: Vec<ProductPayload<'a>>,
    tracking_parameters: &'a TrackingParameters,
    commission: CommissionPayload,
    is_test: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    order_id: String,
    status: AttributionStatus,
}

/// HTTP client for the marketing attribution service.
#[derive(Clone)]
pub struct HttpAttributionReporter {
    client: reqwest::Client,
    orders_url: String,
    api_token: String,
    platform: String,
    is_test: bool,
}

impl HttpAttributionReporter {
    pub fn new(config: &AttributionConfig) -> Result<Self, AttributionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            orders_url: format!("{}/orders", config.base_url.trim_end_matches('/')),
            api_token: config.api_token.clone().unwrap_or_default(),
            platform: config.platform.clone(),
            is_test: config.is_test,
        })
    }

    fn payload<'a>(&'a self, snapshot: &'a OrderSnapshot) -> OrderPayload<'a> {
        OrderPayload {
            order_id: snapshot.order_id.to_string(),
            platform: &self.platform,
            payment_method: snapshot.payment_method.to_string().to_lowercase(),
            status: snapshot.status,
            created_at: snapshot.created_at.format(TIMESTAMP_FORMAT).to_string(),
            approved_date: snapshot
                .approved_at
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string()),
            refunded_at: None,
            customer: CustomerPayload {
                name: &snapshot.customer.name,
                email: &snapshot.customer.email,
                phone: &snapshot.customer.phone,
                document: &snapshot.customer.tax_id,
                country: "BR",
            },
            products: snapshot
                .products
                .iter()
                .map(|product| ProductPayload {
                    id: &product.id,
                    name: &product.name,
                    quantity: product.quantity,
                    price_in_cents: product.price_in_cents,
                })
                .collect(),
            tracking_parameters: &snapshot.tracking,
            commission: CommissionPayload {
                total_price_in_cents: snapshot.total_cents,
                gateway_fee_in_cents: 0,
                user_commission_in_cents: snapshot.total_cents,
            },
            is_test: self.is_test,
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<(), AttributionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Attribution service rejected request");
        Err(AttributionError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AttributionReporter for HttpAttributionReporter {
    #[instrument(skip(self, snapshot), fields(order_id = %snapshot.order_id, status = %snapshot.status))]
    async fn report_order(&self, snapshot: &OrderSnapshot) -> Result<(), AttributionError> {
        let response = self
            .client
            .post(&self.orders_url)
            .header(API_TOKEN_HEADER, &self.api_token)
            .json(&self.payload(snapshot))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        info!("Order reported to attribution service");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: Uuid,
        status: AttributionStatus,
    ) -> Result<(), AttributionError> {
        let response = self
            .client
            .patch(&self.orders_url)
            .header(API_TOKEN_HEADER, &self.api_token)
            .json(&StatusPayload {
                order_id: order_id.to_string(),
                status,
            })
            .send()
            .await?;

        Self::ensure_success(response).await?;
        info!("Attribution status updated");
        Ok(())
    }
}
