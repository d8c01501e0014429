use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{CheckoutError, ServiceError};
use crate::events::{Event, EventSender};
use crate::models::{
    AccessToken, AttributionStatus, CartLine, CheckoutInput, CustomerInfo, OrderReceipt,
    OrderStatus, PaymentIntent, PaymentMethod, TrackingParameters,
};
use crate::repositories::{NewOrder, NewOrderItem, OrderStore, OrderWithItems, PaymentFields};
use crate::services::attribution::{OrderSnapshot, SnapshotProduct};
use crate::services::payment_gateway::{PaymentGateway, PaymentItem, PaymentRequest};
use crate::validation;

/// Settings the orchestrator reads from the application configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub min_amount_cents: i64,
    pub postback_url: String,
    pub default_method: PaymentMethod,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_amount_cents: config.checkout.min_amount_cents,
            postback_url: config.postback_url(),
            default_method: config.gateway.default_method,
        }
    }
}

/// Checkout input after every field check passed.
///
/// `payment_items` is index-aligned with `items`.
#[derive(Debug, Clone)]
struct ValidatedCheckout {
    customer: CustomerInfo,
    items: Vec<NewOrderItem>,
    payment_items: Vec<PaymentItem>,
    total: Decimal,
    amount_cents: i64,
}

/// Turns a cart into a persisted order with a payment intent.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            settings,
        }
    }

    fn validate(&self, input: &CheckoutInput) -> Result<ValidatedCheckout, CheckoutError> {
        validation::validate_cart(&input.items)?;

        let customer = CustomerInfo {
            name: validation::validate_name(&input.customer.name)?,
            email: validation::validate_email(&input.customer.email)?,
            tax_id: validation::validate_tax_id(&input.customer.tax_id)?,
            phone: validation::validate_phone(&input.customer.phone)?,
            shipping_address: validation::validate_address(&input.customer.shipping_address)?,
        };

        let out_of_range = || CheckoutError::invalid_field("items", "order total is out of range");
        let total = validation::cart_total(&input.items).ok_or_else(out_of_range)?;
        let amount_cents = validation::amount_to_cents(total).ok_or_else(out_of_range)?;
        validation::ensure_min_amount(amount_cents, self.settings.min_amount_cents)?;

        let items: Vec<NewOrderItem> = input.items.iter().map(order_item).collect();
        let payment_items = payment_items(&items).ok_or_else(out_of_range)?;

        Ok(ValidatedCheckout {
            customer,
            items,
            payment_items,
            total,
            amount_cents,
        })
    }

    /// Validates the cart, persists the order and asks the gateway for a payment.
    ///
    /// The steps are not one transaction. A failure after the order exists
    /// leaves it `pending` without a payment so it can be retried, except an
    /// item insert failure, which deletes the order again.
    #[instrument(skip(self, input), fields(item_count = input.items.len()))]
    pub async fn submit_order(&self, input: CheckoutInput) -> Result<OrderReceipt, CheckoutError> {
        counter!("storefront.checkout.submitted", 1);

        let result = self.place_order(input).await;
        match &result {
            Ok(receipt) => {
                counter!("storefront.checkout.completed", 1);
                info!(order_id = %receipt.order_id, payment_id = %receipt.payment_id, "Checkout completed");
            }
            Err(e) => {
                counter!("storefront.checkout.failed", 1, "reason" => e.code());
                warn!(code = e.code(), error = %e, "Checkout failed");
            }
        }
        result
    }

    async fn place_order(&self, input: CheckoutInput) -> Result<OrderReceipt, CheckoutError> {
        let checkout = self.validate(&input)?;
        let access_token = input.access_token.unwrap_or_else(AccessToken::generate);
        let tracking_query = Some(input.tracking.to_query()).filter(|q| !q.is_empty());

        let order = self
            .store
            .create_order(NewOrder {
                customer: checkout.customer.clone(),
                total_amount: checkout.total,
                access_token: access_token.clone(),
                tracking_query: tracking_query.clone(),
            })
            .await
            .map_err(|e| CheckoutError::OrderCreationFailed(e.to_string()))?;

        if let Err(e) = self.store.create_order_items(order.id, &checkout.items).await {
            error!(order_id = %order.id, error = %e, "Order items failed, deleting order");
            self.store.delete_order(order.id).await;
            return Err(CheckoutError::OrderItemsFailed(e.to_string()));
        }

        let request = PaymentRequest {
            order_id: order.id,
            amount_cents: checkout.amount_cents,
            method: input.payment_method,
            customer: checkout.customer.clone(),
            items: checkout.payment_items.clone(),
            postback_url: self.settings.postback_url.clone(),
            utm_query: tracking_query,
        };

        let payment = self.gateway.create_payment(request).await;

        let attribution_status = match &payment {
            Ok(intent) => intent.status.to_attribution_status(),
            Err(_) => AttributionStatus::WaitingPayment,
        };
        self.notify_order_placed(
            order.id,
            attribution_status,
            input.payment_method,
            &checkout,
            input.tracking,
        );

        let intent = payment.map_err(|e| {
            error!(order_id = %order.id, error = %e, "Payment request failed, order kept pending");
            CheckoutError::PaymentRequestFailed {
                order_id: order.id,
                reason: e.to_string(),
            }
        })?;

        if let Err(e) = self
            .store
            .update_payment_fields(order.id, PaymentFields::from(&intent))
            .await
        {
            // The intent exists at the gateway; the receipt is still usable for polling.
            error!(order_id = %order.id, payment_id = %intent.id, error = %e, "Failed to record payment on order");
        }

        Ok(receipt(order.id, access_token, intent))
    }

    /// Requests a new payment intent for a `pending` order, superseding the old one.
    #[instrument(skip(self, access_token))]
    pub async fn retry_payment(
        &self,
        order_id: Uuid,
        access_token: &AccessToken,
        method: Option<PaymentMethod>,
    ) -> Result<OrderReceipt, ServiceError> {
        let OrderWithItems { order, items } = self
            .store
            .get_order_with_items(order_id)
            .await?
            .filter(|found| found.order.access_token == access_token.as_str())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {}; only pending orders accept a new payment",
                order_id, order.status
            )));
        }

        let amount_cents = validation::amount_to_cents(order.total_amount).ok_or_else(|| {
            ServiceError::InternalError(format!("Order {} total is out of range", order_id))
        })?;

        let method = method
            .or_else(|| order.payment_method.as_deref().and_then(|m| m.parse().ok()))
            .unwrap_or(self.settings.default_method);

        let items: Vec<NewOrderItem> = items
            .into_iter()
            .map(|item| NewOrderItem {
                product_id: item.product_id,
                product_name: item.product_name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();
        let payment_items = payment_items(&items).ok_or_else(|| {
            ServiceError::InternalError(format!("Order {} item prices are out of range", order_id))
        })?;

        let request = PaymentRequest {
            order_id,
            amount_cents,
            method,
            customer: CustomerInfo {
                name: order.customer_name,
                email: order.customer_email,
                phone: order.customer_phone,
                tax_id: order.customer_tax_id,
                shipping_address: order.shipping_address,
            },
            items: payment_items,
            postback_url: self.settings.postback_url.clone(),
            utm_query: order.tracking_query,
        };

        let intent = self.gateway.create_payment(request).await.map_err(|e| {
            counter!("storefront.checkout.retry_failed", 1);
            ServiceError::ExternalServiceError(e.to_string())
        })?;

        self.store
            .update_payment_fields(order_id, PaymentFields::from(&intent))
            .await?;

        info!(payment_id = %intent.id, "Payment re-requested");
        Ok(receipt(order_id, access_token.clone(), intent))
    }

    fn notify_order_placed(
        &self,
        order_id: Uuid,
        status: AttributionStatus,
        payment_method: PaymentMethod,
        checkout: &ValidatedCheckout,
        tracking: TrackingParameters,
    ) {
        let snapshot = OrderSnapshot {
            order_id,
            status,
            payment_method,
            created_at: Utc::now(),
            approved_at: None,
            customer: checkout.customer.clone(),
            products: checkout
                .items
                .iter()
                .zip(&checkout.payment_items)
                .map(|(item, priced)| SnapshotProduct {
                    id: item.product_id.clone(),
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                    price_in_cents: priced.unit_price_cents,
                })
                .collect(),
            tracking,
            total_cents: checkout.amount_cents,
        };

        if let Err(e) = self.events.send(Event::OrderPlaced(Box::new(snapshot))) {
            warn!(order_id = %order_id, error = %e, "Attribution event dropped");
        }
    }
}

fn order_item(line: &CartLine) -> NewOrderItem {
    NewOrderItem {
        product_id: line.product_id.clone(),
        product_name: line.name.clone(),
        unit_price: line.unit_price,
        quantity: line.quantity,
    }
}

/// Gateway lines with unit prices in cents; `None` if a price does not convert.
fn payment_items(items: &[NewOrderItem]) -> Option<Vec<PaymentItem>> {
    items
        .iter()
        .map(|item| {
            Some(PaymentItem {
                title: item.product_name.clone(),
                unit_price_cents: validation::amount_to_cents(item.unit_price)?,
                quantity: item.quantity,
            })
        })
        .collect()
}

fn receipt(order_id: Uuid, access_token: AccessToken, intent: PaymentIntent) -> OrderReceipt {
    OrderReceipt {
        order_id,
        payment_id: intent.id,
        access_token,
        amount_cents: intent.amount_cents,
        expires_at: intent.expires_at,
        instructions: intent.instructions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::Model as OrderModel;
    use crate::models::{GatewayStatus, PaymentInstructions};
    use crate::repositories::order_repository::MockOrderStore;
    use crate::services::payment_gateway::{GatewayError, MockPaymentGateway};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            min_amount_cents: 501,
            postback_url: "https://shop.example.com/api/v1/payments/postback".into(),
            default_method: PaymentMethod::Pix,
        }
    }

    fn input(unit_price: Decimal, quantity: i32) -> CheckoutInput {
        CheckoutInput {
            items: vec![CartLine {
                product_id: "p1".into(),
                name: "Camiseta".into(),
                unit_price,
                quantity,
            }],
            customer: CustomerInfo {
                name: "Ana Souza".into(),
                email: "ana@example.com".into(),
                phone: "(11) 98765-4321".into(),
                tax_id: "529.982.247-25".into(),
                shipping_address: "Rua das Flores, 123".into(),
            },
            payment_method: PaymentMethod::Pix,
            access_token: None,
            tracking: TrackingParameters::default(),
        }
    }

    fn order_model(id: Uuid, new_order: &NewOrder) -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id,
            customer_name: new_order.customer.name.clone(),
            customer_email: new_order.customer.email.clone(),
            customer_phone: new_order.customer.phone.clone(),
            customer_tax_id: new_order.customer.tax_id.clone(),
            shipping_address: new_order.customer.shipping_address.clone(),
            total_amount: new_order.total_amount,
            status: OrderStatus::Pending,
            payment_id: None,
            payment_method: None,
            pix_code: None,
            pix_qr_code: None,
            billet_url: None,
            billet_code: None,
            payment_expires_at: None,
            access_token: new_order.access_token.to_string(),
            tracking_query: new_order.tracking_query.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn pix_intent() -> PaymentIntent {
        PaymentIntent {
            id: "pay_123".into(),
            status: GatewayStatus::Pending,
            amount_cents: 5980,
            expires_at: None,
            instructions: PaymentInstructions::Pix {
                pix_code: "00020126".into(),
                pix_qr_code: None,
            },
        }
    }

    fn service(
        store: MockOrderStore,
        gateway: MockPaymentGateway,
    ) -> (CheckoutService, mpsc::Receiver<Event>) {
        let (events, rx) = EventSender::channel(8);
        (
            CheckoutService::new(Arc::new(store), Arc::new(gateway), events, settings()),
            rx,
        )
    }

    #[tokio::test]
    async fn invalid_input_has_no_side_effects() {
        let (svc, mut rx) = service(MockOrderStore::new(), MockPaymentGateway::new());

        let mut empty = input(dec!(29.90), 2);
        empty.items.clear();
        assert_matches!(svc.submit_order(empty).await, Err(CheckoutError::EmptyCart));

        let mut bad_tax_id = input(dec!(29.90), 2);
        bad_tax_id.customer.tax_id = "111.111.111-11".into();
        assert_matches!(
            svc.submit_order(bad_tax_id).await,
            Err(CheckoutError::InvalidTaxId)
        );

        assert_matches!(
            svc.submit_order(input(dec!(2.50), 2)).await,
            Err(CheckoutError::AmountTooLow {
                amount_cents: 500,
                minimum_cents: 501
            })
        );

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversized_prices_are_rejected_before_any_write() {
        let mut store = MockOrderStore::new();
        store.expect_create_order().never();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();
        let (svc, mut rx) = service(store, gateway);

        let huge = Decimal::from_str_exact("79228162514264337593543950335").unwrap();
        assert_matches!(
            svc.submit_order(input(huge, 2)).await,
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
        assert_matches!(
            svc.submit_order(input(dec!(29.905), 2)).await,
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_checkout_records_payment_and_notifies() {
        let order_id = Uuid::new_v4();
        let mut store = MockOrderStore::new();
        store
            .expect_create_order()
            .withf(|new_order| {
                new_order.total_amount == dec!(59.80)
                    && new_order.customer.tax_id == "52998224725"
                    && new_order.customer.phone == "11987654321"
            })
            .times(1)
            .returning(move |new_order| Ok(order_model(order_id, &new_order)));
        store
            .expect_create_order_items()
            .times(1)
            .returning(|_, items| {
                assert_eq!(items[0].line_total(), Some(dec!(59.80)));
                Ok(())
            });
        store
            .expect_update_payment_fields()
            .withf(move |id, fields| *id == order_id && fields.payment_id == "pay_123")
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_delete_order().never();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .withf(move |request| {
                request.amount_cents == 5980
                    && request.order_id == order_id
                    && request.items[0].unit_price_cents == 2990
            })
            .times(1)
            .returning(|_| Ok(pix_intent()));

        let (svc, mut rx) = service(store, gateway);
        let receipt = svc.submit_order(input(dec!(29.90), 2)).await.unwrap();

        assert_eq!(receipt.order_id, order_id);
        assert_eq!(receipt.payment_id, "pay_123");
        assert_eq!(receipt.instructions.pix_code(), Some("00020126"));
        assert!(uuid::Uuid::parse_str(receipt.access_token.as_str()).is_ok());

        match rx.try_recv().unwrap() {
            Event::OrderPlaced(snapshot) => {
                assert_eq!(snapshot.order_id, order_id);
                assert_eq!(snapshot.status, AttributionStatus::WaitingPayment);
                assert_eq!(snapshot.total_cents, 5980);
                assert_eq!(snapshot.products[0].price_in_cents, 2990);
                assert_eq!(snapshot.products[0].quantity, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn item_failure_deletes_the_order() {
        let order_id = Uuid::new_v4();
        let mut store = MockOrderStore::new();
        store
            .expect_create_order()
            .returning(move |new_order| Ok(order_model(order_id, &new_order)));
        store
            .expect_create_order_items()
            .returning(|_, _| Err(ServiceError::InternalError("disk full".into())));
        store
            .expect_delete_order()
            .withf(move |id| *id == order_id)
            .times(1)
            .returning(|_| ());

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();

        let (svc, mut rx) = service(store, gateway);
        assert_matches!(
            svc.submit_order(input(dec!(29.90), 2)).await,
            Err(CheckoutError::OrderItemsFailed(_))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn gateway_failure_keeps_the_order_pending() {
        let order_id = Uuid::new_v4();
        let mut store = MockOrderStore::new();
        store
            .expect_create_order()
            .returning(move |new_order| Ok(order_model(order_id, &new_order)));
        store.expect_create_order_items().returning(|_, _| Ok(()));
        store.expect_delete_order().never();
        store.expect_update_payment_fields().never();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().returning(|_| {
            Err(GatewayError::Status {
                status: 503,
                body: "maintenance".into(),
            })
        });

        let (svc, mut rx) = service(store, gateway);
        let err = svc.submit_order(input(dec!(29.90), 2)).await.unwrap_err();
        assert_eq!(err.order_id(), Some(order_id));
        assert_eq!(err.code(), "payment_request_failed");
        assert!(err.is_retryable());

        // Attribution is still told about the order.
        assert_matches!(rx.try_recv(), Ok(Event::OrderPlaced(_)));
    }

    #[tokio::test]
    async fn supplied_access_token_is_reused() {
        let token = AccessToken::parse("visitor-token-1").unwrap();
        let expected = token.clone();
        let mut store = MockOrderStore::new();
        store
            .expect_create_order()
            .withf(move |new_order| new_order.access_token == expected)
            .returning(|new_order| Ok(order_model(Uuid::new_v4(), &new_order)));
        store.expect_create_order_items().returning(|_, _| Ok(()));
        store.expect_update_payment_fields().returning(|_, _| Ok(()));

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().returning(|_| Ok(pix_intent()));

        let (svc, _rx) = service(store, gateway);
        let mut checkout = input(dec!(29.90), 2);
        checkout.access_token = Some(token.clone());
        let receipt = svc.submit_order(checkout).await.unwrap();
        assert_eq!(receipt.access_token, token);
    }

    #[tokio::test]
    async fn retry_is_refused_for_confirmed_orders() {
        let order_id = Uuid::new_v4();
        let token = AccessToken::parse("visitor-token-1").unwrap();
        let mut order = order_model(
            order_id,
            &NewOrder {
                customer: input(dec!(29.90), 2).customer,
                total_amount: dec!(59.80),
                access_token: token.clone(),
                tracking_query: None,
            },
        );
        order.status = OrderStatus::Confirmed;

        let mut store = MockOrderStore::new();
        store.expect_get_order_with_items().returning(move |_| {
            Ok(Some(OrderWithItems {
                order: order.clone(),
                items: vec![],
            }))
        });
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();

        let (svc, _rx) = service(store, gateway);
        assert_matches!(
            svc.retry_payment(order_id, &token, None).await,
            Err(ServiceError::InvalidStatus(_))
        );

        let stranger = AccessToken::parse("someone-else").unwrap();
        assert_matches!(
            svc.retry_payment(order_id, &stranger, None).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
