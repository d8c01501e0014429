use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order_status::GatewayStatus;

/// Payment method accepted by the gateway.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PaymentMethod {
    #[default]
    Pix,
    CreditCard,
    Billet,
}

/// Method-specific data the customer needs to complete a payment.
///
/// One variant per method so that e.g. a PIX intent can never carry a billet URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "paymentMethod", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentInstructions {
    #[serde(rename_all = "camelCase")]
    Pix { pix_code: String, pix_qr_code: Option<String> },
    #[serde(rename_all = "camelCase")]
    Billet { billet_url: String, billet_code: Option<String> },
    CreditCard,
}

impl PaymentInstructions {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentInstructions::Pix { .. } => PaymentMethod::Pix,
            PaymentInstructions::Billet { .. } => PaymentMethod::Billet,
            PaymentInstructions::CreditCard => PaymentMethod::CreditCard,
        }
    }

    pub fn pix_code(&self) -> Option<&str> {
        match self {
            PaymentInstructions::Pix { pix_code, .. } => Some(pix_code),
            _ => None,
        }
    }
}

/// A payment intent created by the gateway for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub status: GatewayStatus,
    pub amount_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub instructions: PaymentInstructions,
}

impl PaymentIntent {
    pub fn method(&self) -> PaymentMethod {
        self.instructions.method()
    }
}
