pub mod adapters;
pub mod api;
pub mod models;
pub mod service;

use thiserror::Error;

pub use adapters::{
    sign_payload, verify_signature, PaymentProvider, StripeAdapter, WebhookVerificationError,
};
pub use api::{
    create_credits_checkout, create_subscription_checkout, stripe_webhook, CheckoutResponse,
    CreditsCheckoutRequest, SubscriptionCheckoutRequest,
};
pub use models::{
    BillingEvent, CheckoutMode, CheckoutRequest, CheckoutSession, LineItem, TierCatalog,
    WebhookOutcome,
};
pub use service::{BillingService, CheckoutSettings};

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature or payload did not verify. Nothing was applied.
    #[error("webhook rejected: {0}")]
    Rejected(String),
    /// Storage failed; the provider should redeliver.
    #[error("webhook processing failed: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout request: {0}")]
    InvalidRequest(String),
    #[error("checkout not configured: {0}")]
    NotConfigured(String),
    #[error("payment provider error: {0}")]
    Provider(String),
}
