pub mod admin;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod postback;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::repositories::OrderStore;
use crate::services::{
    CheckoutService, CheckoutSettings, OrderService, PaymentGateway, ReconciliationService,
};

/// Services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        config: &AppConfig,
    ) -> Self {
        Self {
            checkout: Arc::new(CheckoutService::new(
                store.clone(),
                gateway.clone(),
                events.clone(),
                CheckoutSettings::from(config),
            )),
            reconciliation: Arc::new(ReconciliationService::new(
                store.clone(),
                gateway,
                events.clone(),
                config.poller.clone(),
            )),
            orders: Arc::new(OrderService::new(store, events)),
        }
    }
}
