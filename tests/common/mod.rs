#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::OrderModel,
    errors::ServiceError,
    events::{self, EventSender},
    models::{
        AccessToken, AttributionStatus, CartLine, CheckoutInput, CustomerInfo, GatewayStatus,
        OrderStatus, PaymentInstructions, PaymentIntent, PaymentMethod, TrackingParameters,
    },
    repositories::{
        NewOrder, NewOrderItem, OrderStore, OrderWithItems, PaymentFields, SeaOrmOrderStore,
        StatusChange,
    },
    services::{
        attribution::{AttributionError, AttributionReporter, OrderSnapshot},
        payment_gateway::{GatewayError, PaymentGateway, PaymentRequest, PaymentStatusReport},
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const VALID_CPF: &str = "529.982.247-25";
pub const ADMIN_KEY: &str = "admin-test-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// In-process payment gateway with a settable settlement status.
pub struct StubGateway {
    status: Mutex<GatewayStatus>,
    fail_create: AtomicBool,
    fail_status: AtomicBool,
    next_id: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub requests: Mutex<Vec<PaymentRequest>>,
}

impl Default for StubGateway {
    fn default() -> Self {
        Self {
            status: Mutex::new(GatewayStatus::Pending),
            fail_create: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            status_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl StubGateway {
    pub fn set_status(&self, status: GatewayStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn last_request(&self) -> Option<PaymentRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, GatewayError> {
        let amount_cents = request.amount_cents;
        let method = request.method;
        self.requests.lock().unwrap().push(request);

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                body: "gateway unavailable".into(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instructions = match method {
            PaymentMethod::Pix => PaymentInstructions::Pix {
                pix_code: format!("00020126pix{n}"),
                pix_qr_code: None,
            },
            PaymentMethod::Billet => PaymentInstructions::Billet {
                billet_url: format!("https://billets.example.com/{n}"),
                billet_code: None,
            },
            PaymentMethod::CreditCard => PaymentInstructions::CreditCard,
        };

        Ok(PaymentIntent {
            id: format!("pay_{n}"),
            status: GatewayStatus::Pending,
            amount_cents,
            expires_at: None,
            instructions,
        })
    }

    async fn get_payment_status(
        &self,
        _payment_id: &str,
    ) -> Result<PaymentStatusReport, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(GatewayError::Decode("connection reset".into()));
        }
        Ok(PaymentStatusReport {
            status: self.status.lock().unwrap().clone(),
            raw: Value::Null,
        })
    }
}

/// Attribution reporter that remembers what it was told.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<OrderSnapshot>>,
    pub updates: Mutex<Vec<(Uuid, AttributionStatus)>>,
}

#[async_trait]
impl AttributionReporter for RecordingReporter {
    async fn report_order(&self, snapshot: &OrderSnapshot) -> Result<(), AttributionError> {
        self.reports.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: AttributionStatus,
    ) -> Result<(), AttributionError> {
        self.updates.lock().unwrap().push((order_id, status));
        Ok(())
    }
}

/// Order store whose item inserts always fail.
pub struct FailingItemsStore {
    pub inner: SeaOrmOrderStore,
}

#[async_trait]
impl OrderStore for FailingItemsStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderModel, ServiceError> {
        self.inner.create_order(new_order).await
    }

    async fn create_order_items(
        &self,
        _order_id: Uuid,
        _items: &[NewOrderItem],
    ) -> Result<(), ServiceError> {
        Err(ServiceError::InternalError("item insert rejected".into()))
    }

    async fn delete_order(&self, order_id: Uuid) {
        self.inner.delete_order(order_id).await
    }

    async fn get_order_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        self.inner.get_order_status(order_id).await
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<StatusChange, ServiceError> {
        self.inner.update_order_status(order_id, status).await
    }

    async fn update_payment_fields(
        &self,
        order_id: Uuid,
        fields: PaymentFields,
    ) -> Result<(), ServiceError> {
        self.inner.update_payment_fields(order_id, fields).await
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        self.inner.find_by_payment_id(payment_id).await
    }

    async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        self.inner.get_order_with_items(order_id).await
    }

    async fn list_by_access_token(
        &self,
        access_token: &AccessToken,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        self.inner.list_by_access_token(access_token).await
    }
}

/// Application wired over an in-memory SQLite database and in-process fakes.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<SeaOrmOrderStore>,
    pub gateway: Arc<StubGateway>,
    pub reporter: Arc<RecordingReporter>,
    pub event_sender: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.public_base_url = "https://shop.example.com".to_string();
        cfg.admin_api_key = Some(ADMIN_KEY.to_string());
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.poller.interval_secs = 1;
        configure(&mut cfg);

        let pool = db::establish_connection(&cfg.database_url)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let gateway = Arc::new(StubGateway::default());
        let reporter = Arc::new(RecordingReporter::default());
        let (event_sender, event_rx) = EventSender::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx, reporter.clone()));

        let state = AppState::new(db_arc.clone(), cfg, gateway.clone(), event_sender.clone());
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            store: Arc::new(SeaOrmOrderStore::new(db_arc)),
            gateway,
            reporter,
            event_sender,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let bytes = body
            .map(|value| serde_json::to_vec(&value).expect("serialize body"))
            .unwrap_or_default();
        self.raw_request(method, uri, bytes, headers).await
    }

    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    /// Waits until the attribution worker has delivered `count` status updates.
    pub async fn wait_for_updates(&self, count: usize) -> Vec<(Uuid, AttributionStatus)> {
        for _ in 0..100 {
            let updates = self.reporter.updates.lock().unwrap().clone();
            if updates.len() >= count {
                return updates;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.reporter.updates.lock().unwrap().clone()
    }

    pub async fn wait_for_reports(&self, count: usize) -> Vec<OrderSnapshot> {
        for _ in 0..100 {
            let reports = self.reporter.reports.lock().unwrap().clone();
            if reports.len() >= count {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.reporter.reports.lock().unwrap().clone()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn shirt_cart() -> Vec<CartLine> {
    vec![CartLine {
        product_id: "p1".into(),
        name: "Camiseta".into(),
        unit_price: rust_decimal_macros::dec!(29.90),
        quantity: 2,
    }]
}

pub fn customer() -> CustomerInfo {
    CustomerInfo {
        name: "Ana Souza".into(),
        email: "ana@example.com".into(),
        phone: "(11) 98765-4321".into(),
        tax_id: VALID_CPF.into(),
        shipping_address: "Rua das Flores, 123, São Paulo".into(),
    }
}

pub fn checkout_input(items: Vec<CartLine>, token: &str) -> CheckoutInput {
    CheckoutInput {
        items,
        customer: customer(),
        payment_method: PaymentMethod::Pix,
        access_token: AccessToken::parse(token),
        tracking: TrackingParameters {
            utm_source: Some("instagram".into()),
            ..Default::default()
        },
    }
}
