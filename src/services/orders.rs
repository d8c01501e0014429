use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{AccessToken, OrderStatus};
use crate::repositories::{OrderStore, OrderWithItems, StatusChange};

/// Order history for anonymous visitors and status changes for staff.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    events: EventSender,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, events: EventSender) -> Self {
        Self { store, events }
    }

    /// Orders placed under `access_token`, newest first.
    #[instrument(skip(self, access_token))]
    pub async fn list_orders(
        &self,
        access_token: &AccessToken,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        self.store.list_by_access_token(access_token).await
    }

    /// An order is visible only to the token it was placed with.
    #[instrument(skip(self, access_token))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        access_token: &AccessToken,
    ) -> Result<OrderWithItems, ServiceError> {
        self.store
            .get_order_with_items(order_id)
            .await?
            .filter(|found| found.order.access_token == access_token.as_str())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Staff-initiated status change. The caller must already be authenticated.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<StatusChange, ServiceError> {
        let change = self.store.update_order_status(order_id, status).await?;

        if change.changed() {
            info!(from = %change.previous, to = %change.current, "Order status changed by admin");
            let event = Event::OrderStatusChanged {
                order_id,
                status: status.to_attribution_status(),
            };
            if let Err(e) = self.events.send(event) {
                warn!(order_id = %order_id, error = %e, "Attribution event dropped");
            }
        }

        Ok(change)
    }
}
