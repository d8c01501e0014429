pub mod access_token;
pub mod checkout;
pub mod order_status;
pub mod payment;

pub use access_token::AccessToken;
pub use checkout::{CartLine, CheckoutInput, CustomerInfo, OrderReceipt, TrackingParameters};
pub use order_status::{AttributionStatus, GatewayStatus, OrderStatus};
pub use payment::{PaymentInstructions, PaymentIntent, PaymentMethod};
