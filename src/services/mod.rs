pub mod attribution;
pub mod checkout;
pub mod orders;
pub mod payment_gateway;
pub mod reconciliation;

pub use attribution::{AttributionReporter, HttpAttributionReporter, NoopAttributionReporter};
pub use checkout::{CheckoutService, CheckoutSettings};
pub use orders::OrderService;
pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use reconciliation::{PollOutcome, PollerHandle, ReconciliationService};
