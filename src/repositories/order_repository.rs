use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column as OrderColumn, Entity as Order, Model as OrderModel,
};
use crate::entities::order_item::{
    ActiveModel as OrderItemActiveModel, Column as OrderItemColumn, Entity as OrderItem,
    Model as OrderItemModel,
};
use crate::errors::ServiceError;
use crate::models::{AccessToken, CustomerInfo, OrderStatus, PaymentInstructions, PaymentIntent};

/// Reads and guarded writes tried before a status update gives up as a conflict.
const MAX_STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Fields needed to insert a new `pending` order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer: CustomerInfo,
    pub total_amount: Decimal,
    pub access_token: AccessToken,
    pub tracking_query: Option<String>,
}

/// A line snapshotted from the cart at checkout time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl NewOrderItem {
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Payment columns written once a gateway intent exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentFields {
    pub payment_id: String,
    pub method: String,
    pub pix_code: Option<String>,
    pub pix_qr_code: Option<String>,
    pub billet_url: Option<String>,
    pub billet_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&PaymentIntent> for PaymentFields {
    fn from(intent: &PaymentIntent) -> Self {
        let mut fields = PaymentFields {
            payment_id: intent.id.clone(),
            method: intent.method().to_string(),
            pix_code: None,
            pix_qr_code: None,
            billet_url: None,
            billet_code: None,
            expires_at: intent.expires_at,
        };

        match &intent.instructions {
            PaymentInstructions::Pix {
                pix_code,
                pix_qr_code,
            } => {
                fields.pix_code = Some(pix_code.clone());
                fields.pix_qr_code = pix_qr_code.clone();
            }
            PaymentInstructions::Billet {
                billet_url,
                billet_code,
            } => {
                fields.billet_url = Some(billet_url.clone());
                fields.billet_code = billet_code.clone();
            }
            PaymentInstructions::CreditCard => {}
        }

        fields
    }
}

/// Outcome of a status update; `previous == current` means nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: OrderStatus,
    pub current: OrderStatus,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Persistence operations the checkout and reconciliation flows rely on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderModel, ServiceError>;

    async fn create_order_items(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
    ) -> Result<(), ServiceError>;

    /// Compensating delete. Failures are logged, never returned.
    async fn delete_order(&self, order_id: Uuid);

    async fn get_order_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError>;

    /// Applies a validated transition. Setting the current status again is a no-op.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<StatusChange, ServiceError>;

    /// Records a new payment intent. Only allowed while the order is `pending`.
    async fn update_payment_fields(
        &self,
        order_id: Uuid,
        fields: PaymentFields,
    ) -> Result<(), ServiceError>;

    async fn find_by_payment_id(&self, payment_id: &str)
        -> Result<Option<OrderModel>, ServiceError>;

    async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError>;

    /// Orders created under `access_token`, newest first.
    async fn list_by_access_token(
        &self,
        access_token: &AccessToken,
    ) -> Result<Vec<OrderWithItems>, ServiceError>;
}

/// `OrderStore` backed by the relational database through sea-orm.
#[derive(Debug, Clone)]
pub struct SeaOrmOrderStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })
    }

    async fn items_for(&self, order_ids: Vec<Uuid>) -> Result<Vec<OrderItemModel>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        OrderItem::find()
            .filter(OrderItemColumn::OrderId.is_in(order_ids))
            .order_by_asc(OrderItemColumn::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order items: {}", e);
                ServiceError::DatabaseError(e)
            })
    }
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    #[instrument(skip(self, new_order))]
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let customer = new_order.customer;

        let order = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            customer_name: Set(customer.name),
            customer_email: Set(customer.email),
            customer_phone: Set(customer.phone),
            customer_tax_id: Set(customer.tax_id),
            shipping_address: Set(customer.shipping_address),
            total_amount: Set(new_order.total_amount),
            status: Set(OrderStatus::Pending),
            payment_id: Set(None),
            payment_method: Set(None),
            pix_code: Set(None),
            pix_qr_code: Set(None),
            billet_url: Set(None),
            billet_code: Set(None),
            payment_expires_at: Set(None),
            access_token: Set(new_order.access_token.as_str().to_string()),
            tracking_query: Set(new_order.tracking_query),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = order.insert(&*self.db).await.map_err(|e| {
            error!("Failed to insert order: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, total = %order.total_amount, "Order created");
        Ok(order)
    }

    #[instrument(skip(self, items), fields(order_id = %order_id, item_count = items.len()))]
    async fn create_order_items(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let models = items
            .iter()
            .map(|item| {
                let line_total = item.line_total().ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "line total for {} is out of range",
                        item.product_id
                    ))
                })?;
                Ok(OrderItemActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    product_id: Set(item.product_id.clone()),
                    product_name: Set(item.product_name.clone()),
                    unit_price: Set(item.unit_price),
                    quantity: Set(item.quantity),
                    line_total: Set(line_total),
                    created_at: Set(now),
                })
            })
            .collect::<Result<Vec<OrderItemActiveModel>, ServiceError>>()?;

        if models.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one item".to_string(),
            ));
        }

        OrderItem::insert_many(models)
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to insert items for order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, order_id: Uuid) {
        if let Err(e) = OrderItem::delete_many()
            .filter(OrderItemColumn::OrderId.eq(order_id))
            .exec(&*self.db)
            .await
        {
            warn!(order_id = %order_id, error = %e, "Failed to delete items of order");
        }

        match Order::delete_by_id(order_id).exec(&*self.db).await {
            Ok(result) => {
                info!(order_id = %order_id, rows = result.rows_affected, "Order deleted")
            }
            Err(e) => error!(order_id = %order_id, error = %e, "Compensating order delete failed"),
        }
    }

    async fn get_order_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        self.find_order(order_id)
            .await?
            .map(|order| order.status)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self), fields(order_id = %order_id, new_status = %status))]
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<StatusChange, ServiceError> {
        for attempt in 1..=MAX_STATUS_WRITE_ATTEMPTS {
            let previous = self.get_order_status(order_id).await?;
            if !previous.can_transition_to(status) {
                warn!("Invalid status transition from {} to {}", previous, status);
                return Err(ServiceError::InvalidStatus(format!(
                    "Cannot transition order {} from '{}' to '{}'",
                    order_id, previous, status
                )));
            }

            if previous == status {
                debug!("Order already {}, nothing to write", status);
                return Ok(StatusChange {
                    previous,
                    current: status,
                });
            }

            // Written only if nobody moved the order since it was read.
            let result = Order::update_many()
                .set(OrderActiveModel {
                    status: Set(status),
                    updated_at: Set(Utc::now()),
                    ..<OrderActiveModel as ActiveModelTrait>::default()
                })
                .filter(OrderColumn::Id.eq(order_id))
                .filter(OrderColumn::Status.eq(previous))
                .exec(&*self.db)
                .await
                .map_err(|e| {
                    error!("Failed to update status of order {}: {}", order_id, e);
                    ServiceError::DatabaseError(e)
                })?;

            if result.rows_affected == 1 {
                info!(old_status = %previous, "Order status updated");
                return Ok(StatusChange {
                    previous,
                    current: status,
                });
            }

            debug!(attempt, "Order status changed concurrently, re-reading");
        }

        Err(ServiceError::Conflict(format!(
            "Order {} kept changing while moving it to '{}'",
            order_id, status
        )))
    }

    #[instrument(skip(self, payment), fields(order_id = %order_id, payment_id = %payment.payment_id))]
    async fn update_payment_fields(
        &self,
        order_id: Uuid,
        payment: PaymentFields,
    ) -> Result<(), ServiceError> {
        let order = self
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {}; its payment can no longer be replaced",
                order_id, order.status
            )));
        }

        if let Some(previous) = order.payment_id.as_deref() {
            info!(previous_payment_id = %previous, "Superseding payment intent");
        }

        let result = Order::update_many()
            .set(OrderActiveModel {
                payment_id: Set(Some(payment.payment_id)),
                payment_method: Set(Some(payment.method)),
                pix_code: Set(payment.pix_code),
                pix_qr_code: Set(payment.pix_qr_code),
                billet_url: Set(payment.billet_url),
                billet_code: Set(payment.billet_code),
                payment_expires_at: Set(payment.expires_at),
                updated_at: Set(Utc::now()),
                ..<OrderActiveModel as ActiveModelTrait>::default()
            })
            .filter(OrderColumn::Id.eq(order_id))
            .filter(OrderColumn::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to write payment fields for order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} left pending before its payment was recorded",
                order_id
            )));
        }
        Ok(())
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(OrderColumn::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to look up payment {}: {}", payment_id, e);
                ServiceError::DatabaseError(e)
            })
    }

    async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = self.find_order(order_id).await? else {
            return Ok(None);
        };
        let items = self.items_for(vec![order.id]).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    async fn list_by_access_token(
        &self,
        access_token: &AccessToken,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = Order::find()
            .filter(OrderColumn::AccessToken.eq(access_token.as_str()))
            .order_by_desc(OrderColumn::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to list orders by access token: {}", e);
                ServiceError::DatabaseError(e)
            })?;

        let mut items_by_order: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for item in self.items_for(orders.iter().map(|o| o.id).collect()).await? {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect())
    }
}
