use metrics::{counter, decrement_gauge, increment_gauge};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::PollerConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{AccessToken, GatewayStatus, OrderStatus};
use crate::repositories::{OrderStore, StatusChange};
use crate::services::payment_gateway::PaymentGateway;

/// Which side first reported the payment as settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmedBy {
    Store,
    Gateway,
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed(ConfirmedBy),
    /// Stopped by the caller before the payment settled.
    StillPending,
    /// Gave up after too many consecutive failed ticks. Says nothing about the payment.
    Error(String),
}

/// Result of a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentCheck {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub gateway_status: Option<String>,
    pub confirmed: bool,
}

/// Result of applying a gateway postback.
#[derive(Debug, Clone, PartialEq)]
pub struct PostbackOutcome {
    pub order_id: Uuid,
    pub change: StatusChange,
}

/// What one tick learned, before anything is written.
#[derive(Debug)]
enum Observation {
    PaidInStore,
    SettledAtGateway,
    Pending { all_failed: bool },
}

/// Handle to a running watch. Dropping it stops the watch.
#[derive(Debug)]
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<PollOutcome>,
}

impl PollerHandle {
    /// Stops the watch. No tick starts and no write happens after this returns.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Waits for the watch to end.
    pub async fn outcome(self) -> PollOutcome {
        let PollerHandle { stop, task } = self;
        let outcome = task.await.unwrap_or_else(|e| {
            error!("Poller task failed: {}", e);
            PollOutcome::Error(e.to_string())
        });
        drop(stop);
        outcome
    }
}

/// Brings an order's status in line with the gateway, by polling or by postback.
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    config: PollerConfig,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            config,
        }
    }

    /// Starts polling `(order_id, payment_id)` until it is confirmed or stopped.
    ///
    /// Each tick reads the store first and asks the gateway only when the store
    /// does not already show the order as paid. A gateway settlement is written
    /// back to the store before the watch reports `Confirmed`.
    pub fn watch(&self, order_id: Uuid, payment_id: impl Into<String>) -> PollerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let service = self.clone();
        let payment_id = payment_id.into();
        let task = tokio::spawn(async move { service.run(order_id, payment_id, stop_rx).await });
        PollerHandle { stop, task }
    }

    #[instrument(skip(self, stop), fields(order_id = %order_id, payment_id = %payment_id))]
    async fn run(
        &self,
        order_id: Uuid,
        payment_id: String,
        mut stop: watch::Receiver<bool>,
    ) -> PollOutcome {
        let base_interval = self.config.interval();
        let mut interval = base_interval;
        let mut consecutive_errors: u32 = 0;
        increment_gauge!("storefront.poller.active", 1.0);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break PollOutcome::StillPending,
                _ = tokio::time::sleep(interval) => {}
            }

            counter!("storefront.poller.ticks", 1);
            let observation = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break PollOutcome::StillPending,
                observation = self.observe(order_id, &payment_id) => observation,
            };

            // A stop that raced the reads wins over their result.
            if *stop.borrow() {
                break PollOutcome::StillPending;
            }

            match observation {
                Observation::PaidInStore => break PollOutcome::Confirmed(ConfirmedBy::Store),
                Observation::SettledAtGateway => {
                    self.write_back(order_id).await;
                    break PollOutcome::Confirmed(ConfirmedBy::Gateway);
                }
                Observation::Pending { all_failed: false } => {
                    consecutive_errors = 0;
                    interval = base_interval;
                }
                Observation::Pending { all_failed: true } => {
                    consecutive_errors += 1;
                    if let Some(max) = self.config.max_consecutive_errors {
                        if consecutive_errors >= max {
                            warn!(consecutive_errors, "Giving up on payment watch");
                            break PollOutcome::Error(format!(
                                "{} consecutive checks failed",
                                consecutive_errors
                            ));
                        }
                    }
                    interval = next_interval(interval, &self.config);
                    debug!(next_in = ?interval, "Backing off after failed check");
                }
            }
        };

        decrement_gauge!("storefront.poller.active", 1.0);
        info!(outcome = ?outcome, "Payment watch ended");
        outcome
    }

    async fn observe(&self, order_id: Uuid, payment_id: &str) -> Observation {
        let store_ok = match self.store.get_order_status(order_id).await {
            Ok(status) if status.is_paid() => return Observation::PaidInStore,
            Ok(_) => true,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Order status check failed");
                false
            }
        };

        match self.gateway.get_payment_status(payment_id).await {
            Ok(report) if report.status.is_settled() => Observation::SettledAtGateway,
            Ok(report) => {
                debug!(status = report.status.as_str(), "Payment not settled yet");
                Observation::Pending { all_failed: false }
            }
            Err(e) => {
                warn!(payment_id = %payment_id, error = %e, "Gateway status check failed");
                Observation::Pending {
                    all_failed: !store_ok,
                }
            }
        }
    }

    /// Records a gateway confirmation in the store. Failures are only logged;
    /// a later check repeats the write.
    async fn write_back(&self, order_id: Uuid) {
        match self
            .store
            .update_order_status(order_id, OrderStatus::Confirmed)
            .await
        {
            Ok(change) => {
                counter!("storefront.poller.write_backs", 1);
                self.notify_change(order_id, &change, &GatewayStatus::Paid);
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Write-back of confirmed status failed");
            }
        }
    }

    fn notify_change(&self, order_id: Uuid, change: &StatusChange, status: &GatewayStatus) {
        let refund_like = matches!(status, GatewayStatus::Refunded | GatewayStatus::Chargeback);
        if !change.changed() && !refund_like {
            return;
        }
        let event = Event::OrderStatusChanged {
            order_id,
            status: status.to_attribution_status(),
        };
        if let Err(e) = self.events.send(event) {
            warn!(order_id = %order_id, error = %e, "Attribution event dropped");
        }
    }

    /// One reconciliation pass for an order, as done on a page load.
    #[instrument(skip(self, access_token))]
    pub async fn check_once(
        &self,
        order_id: Uuid,
        access_token: &AccessToken,
    ) -> Result<PaymentCheck, ServiceError> {
        let order = self
            .store
            .get_order_with_items(order_id)
            .await?
            .map(|found| found.order)
            .filter(|order| order.access_token == access_token.as_str())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status.is_paid() {
            return Ok(PaymentCheck {
                order_id,
                status: order.status,
                gateway_status: None,
                confirmed: true,
            });
        }

        let Some(payment_id) = order.payment_id.filter(|_| order.status == OrderStatus::Pending)
        else {
            return Ok(PaymentCheck {
                order_id,
                status: order.status,
                gateway_status: None,
                confirmed: false,
            });
        };

        let report = self
            .gateway
            .get_payment_status(&payment_id)
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        let mut status = order.status;
        if report.status.is_settled() {
            let change = self
                .store
                .update_order_status(order_id, OrderStatus::Confirmed)
                .await?;
            self.notify_change(order_id, &change, &report.status);
            status = change.current;
        }

        Ok(PaymentCheck {
            order_id,
            status,
            gateway_status: Some(report.status.as_str().to_string()),
            confirmed: status.is_paid(),
        })
    }

    /// Handles a gateway postback for `payment_id`.
    ///
    /// The pushed status is only a hint: the gateway is asked for the payment
    /// and its answer is what gets applied. Repeated deliveries are no-ops. A
    /// status the order can no longer move to (e.g. a refund after shipping)
    /// is acknowledged without a write.
    #[instrument(skip(self), fields(claimed_status = claimed.as_str()))]
    pub async fn apply_postback(
        &self,
        payment_id: &str,
        claimed: GatewayStatus,
    ) -> Result<PostbackOutcome, ServiceError> {
        let order = self
            .store
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for payment {}", payment_id))
            })?;

        let status = self
            .gateway
            .get_payment_status(payment_id)
            .await
            .map_err(|e| {
                warn!(payment_id = %payment_id, error = %e, "Could not verify postback with the gateway");
                ServiceError::ExternalServiceError(e.to_string())
            })?
            .status;
        if status != claimed {
            warn!(
                payment_id = %payment_id,
                claimed = claimed.as_str(),
                reported = status.as_str(),
                "Postback status differs from the gateway, applying the gateway's"
            );
            counter!("storefront.postback.mismatched", 1);
        }

        let target = status.to_order_status();
        let unchanged = StatusChange {
            previous: order.status,
            current: order.status,
        };

        let change = if target == OrderStatus::Pending {
            debug!("Gateway still waiting for payment");
            unchanged
        } else if !order.status.can_transition_to(target) {
            warn!(
                order_id = %order.id,
                current = %order.status,
                target = %target,
                "Ignoring gateway status the order cannot move to"
            );
            unchanged
        } else {
            self.store.update_order_status(order.id, target).await?
        };

        counter!("storefront.postback.applied", 1, "status" => status.as_str().to_lowercase());
        self.notify_change(order.id, &change, &status);

        Ok(PostbackOutcome {
            order_id: order.id,
            change,
        })
    }
}

/// Resolves once a stop was requested or the handle is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn next_interval(current: Duration, config: &PollerConfig) -> Duration {
    current
        .mul_f64(config.backoff_multiplier)
        .min(config.max_interval())
}
