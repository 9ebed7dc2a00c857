//! Charge service contract
//!
//! The external payment gateway is consumed only through this trait. The
//! engine cares about exactly one distinction: a charge that was attempted
//! and explicitly declined (a business outcome), versus any other provider
//! failure (propagated to the caller so the surrounding batch can decide
//! about retries).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use userpay_shared::Cents;

#[derive(Debug, Error)]
pub enum ChargeError {
    /// The provider attempted the charge and declined it, e.g. an invalid
    /// or expired card. Carries the provider's human-readable reason.
    #[error("charge declined: {reason}")]
    Declined { reason: String },

    /// Any other provider failure (network fault, misconfiguration). Never
    /// converted into a processing outcome; always propagated.
    #[error(transparent)]
    Provider(Box<dyn std::error::Error + Send + Sync>),
}

/// One settlement attempt against the gateway.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub customer_ref: String,
    pub amount_cents: Cents,
    pub currency: String,
    pub idempotency_key: String,
    pub description: String,
}

#[async_trait]
pub trait ChargeService: Send + Sync {
    /// Attempt to collect the given amount. Returns the provider's opaque
    /// charge record on success.
    async fn attempt_charge(&self, request: ChargeRequest) -> Result<Value, ChargeError>;

    /// Fetch the provider's current customer record, used by the explicit
    /// [`CustomerRecord::refresh`](crate::customers::CustomerRecord) path.
    async fn retrieve_customer(&self, customer_ref: &str) -> Result<Value, ChargeError>;
}
