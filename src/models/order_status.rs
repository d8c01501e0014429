use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fulfillment state of an order as persisted in the order store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Whether `self -> next` is an allowed transition.
    ///
    /// Setting an order to the status it already has is accepted as a no-op,
    /// which is what makes repeated confirmation idempotent.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Shipped)
                | (Confirmed, Delivered)
                | (Shipped, Delivered)
        )
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Delivered)
    }

    /// Payment has settled for this order (confirmed or any later fulfillment step).
    pub fn is_paid(self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }

    /// Status reported to the attribution service when an admin changes the order.
    pub fn to_attribution_status(self) -> AttributionStatus {
        match self {
            OrderStatus::Pending => AttributionStatus::WaitingPayment,
            OrderStatus::Confirmed | OrderStatus::Shipped | OrderStatus::Delivered => {
                AttributionStatus::Paid
            }
            OrderStatus::Cancelled => AttributionStatus::Refused,
        }
    }
}

/// Settlement status as reported by the payment gateway.
///
/// The gateway vocabulary is open-ended, so anything unrecognised is kept
/// verbatim in `Unknown` and treated as still waiting for payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GatewayStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
    Refunded,
    Chargeback,
    Unknown(String),
}

impl GatewayStatus {
    /// Every status the gateway documents.
    pub const KNOWN: [GatewayStatus; 6] = [
        GatewayStatus::Pending,
        GatewayStatus::Approved,
        GatewayStatus::Paid,
        GatewayStatus::Rejected,
        GatewayStatus::Refunded,
        GatewayStatus::Chargeback,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Pending => "PENDING",
            GatewayStatus::Approved => "APPROVED",
            GatewayStatus::Paid => "PAID",
            GatewayStatus::Rejected => "REJECTED",
            GatewayStatus::Refunded => "REFUNDED",
            GatewayStatus::Chargeback => "CHARGEBACK",
            GatewayStatus::Unknown(raw) => raw.as_str(),
        }
    }

    /// The payment has settled and the order may be confirmed.
    pub fn is_settled(&self) -> bool {
        matches!(self, GatewayStatus::Approved | GatewayStatus::Paid)
    }

    pub fn to_order_status(&self) -> OrderStatus {
        match self {
            GatewayStatus::Approved | GatewayStatus::Paid => OrderStatus::Confirmed,
            GatewayStatus::Rejected | GatewayStatus::Refunded | GatewayStatus::Chargeback => {
                OrderStatus::Cancelled
            }
            GatewayStatus::Pending | GatewayStatus::Unknown(_) => OrderStatus::Pending,
        }
    }

    pub fn to_attribution_status(&self) -> AttributionStatus {
        match self {
            GatewayStatus::Approved | GatewayStatus::Paid => AttributionStatus::Paid,
            GatewayStatus::Rejected => AttributionStatus::Refused,
            GatewayStatus::Refunded => AttributionStatus::Refunded,
            GatewayStatus::Chargeback => AttributionStatus::Chargedback,
            GatewayStatus::Pending | GatewayStatus::Unknown(_) => {
                AttributionStatus::WaitingPayment
            }
        }
    }
}

impl From<&str> for GatewayStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => GatewayStatus::Pending,
            "APPROVED" => GatewayStatus::Approved,
            "PAID" => GatewayStatus::Paid,
            "REJECTED" => GatewayStatus::Rejected,
            "REFUNDED" => GatewayStatus::Refunded,
            "CHARGEBACK" => GatewayStatus::Chargeback,
            _ => GatewayStatus::Unknown(raw.to_string()),
        }
    }
}

impl From<String> for GatewayStatus {
    fn from(raw: String) -> Self {
        GatewayStatus::from(raw.as_str())
    }
}

impl From<GatewayStatus> for String {
    fn from(status: GatewayStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status vocabulary of the marketing attribution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttributionStatus {
    WaitingPayment,
    Paid,
    Refused,
    Refunded,
    Chargedback,
}
