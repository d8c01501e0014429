use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OrderStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_tax_id: String,
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub status: OrderStatus,

    /// Gateway id of the current payment intent; replaced only by a newer intent.
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub pix_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub pix_qr_code: Option<String>,
    pub billet_url: Option<String>,
    pub billet_code: Option<String>,
    pub payment_expires_at: Option<DateTime<Utc>>,

    pub access_token: String,
    pub tracking_query: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
