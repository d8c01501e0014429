use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::AttributionStatus;
use crate::services::attribution::{AttributionReporter, OrderSnapshot};

/// Order lifecycle events forwarded to the attribution service.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Emitted once per checkout, whatever the gateway outcome.
    OrderPlaced(Box<OrderSnapshot>),
    OrderStatusChanged {
        order_id: Uuid,
        status: AttributionStatus,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced(snapshot) => snapshot.order_id,
            Event::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }
}

/// Fire-and-forget handle onto the event channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiver `process_events` drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queues an event without waiting; a full or closed channel drops it.
    pub fn send(&self, event: Event) -> Result<(), String> {
        let order_id = event.order_id();
        self.sender.try_send(event).map_err(|e| {
            counter!("storefront.events.dropped", 1);
            format!("Failed to queue event for order {}: {}", order_id, e)
        })
    }
}

/// Delivers queued events to the attribution reporter until every sender is gone.
///
/// Delivery failures are logged and dropped; they never reach the order flow.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, reporter: Arc<dyn AttributionReporter>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(order_id = %event.order_id(), "Received event");

        let result = match &event {
            Event::OrderPlaced(snapshot) => reporter.report_order(snapshot).await,
            Event::OrderStatusChanged { order_id, status } => {
                reporter.update_status(*order_id, *status).await
            }
        };

        match result {
            Ok(()) => {
                counter!("storefront.attribution.delivered", 1);
            }
            Err(e) => {
                counter!("storefront.attribution.failed", 1);
                error!(
                    order_id = %event.order_id(),
                    error = %e,
                    "Failed to deliver attribution event"
                );
            }
        }
    }

    warn!("Event channel closed, stopping event processing loop");
}
