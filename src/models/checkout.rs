use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::access_token::AccessToken;
use super::payment::{PaymentInstructions, PaymentMethod};

/// One cart line as submitted at checkout.
///
/// `name` and `unit_price` are snapshotted into the order item, so later
/// catalog price changes never alter a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    /// `None` when the product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub tax_id: String,
    pub shipping_address: String,
}

/// Campaign tracking parameters captured on the storefront landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingParameters {
    pub src: Option<String>,
    pub sck: Option<String>,
    pub utm_source: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
}

impl TrackingParameters {
    /// Query-string form forwarded to the gateway, e.g. `utm_source=ig&utm_medium=cpc`.
    pub fn to_query(&self) -> String {
        let pairs = [
            ("src", &self.src),
            ("sck", &self.sck),
            ("utm_source", &self.utm_source),
            ("utm_campaign", &self.utm_campaign),
            ("utm_medium", &self.utm_medium),
            ("utm_content", &self.utm_content),
            ("utm_term", &self.utm_term),
        ];

        pairs
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutInput {
    pub items: Vec<CartLine>,
    pub customer: CustomerInfo,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Token of the visitor's session; a fresh one is issued when absent.
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    #[serde(default)]
    pub tracking: TrackingParameters,
}

/// Durable reference returned to the client after a successful checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub payment_id: String,
    pub access_token: AccessToken,
    pub amount_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub instructions: PaymentInstructions,
}
