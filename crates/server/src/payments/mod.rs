//! Payment provider integration: checkout sessions, webhook verification and
//! settlement of payment events.

pub mod processor;
pub mod settlement;
pub mod signature;
pub mod stripe;

pub use processor::{PaymentEventProcessor, WebhookAck, WebhookError};
pub use signature::{SIGNATURE_HEADER, SignatureError, WebhookVerifier};
pub use stripe::{
    CheckoutLineItem, CheckoutSession, CheckoutSessionRequest, PaymentProvider, ProviderError,
    SessionStatus, StripeClient,
};
