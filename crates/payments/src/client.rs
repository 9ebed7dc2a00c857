//! Stripe implementation of the charge service contract

use async_trait::async_trait;
use serde_json::Value;
use stripe::{
    Charge, Client, CreateCharge, Currency, Customer, CustomerId, ErrorType, RequestStrategy,
    StripeError,
};
use tracing::info;

use crate::charge::{ChargeError, ChargeRequest, ChargeService};

/// Stripe credentials, loaded once at process start.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

impl StripeConfig {
    /// Read `STRIPE_SECRET_KEY`; `None` when unconfigured so deployments
    /// without Stripe fall back to notification-only processing.
    pub fn from_env() -> Option<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY").ok()?;
        if secret_key.is_empty() {
            return None;
        }
        Some(Self { secret_key })
    }
}

/// Charge service backed by the Stripe API.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        info!("stripe gateway configured");
        Self {
            client: Client::new(config.secret_key),
        }
    }

    pub fn from_env() -> Option<Self> {
        StripeConfig::from_env().map(Self::new)
    }

    fn map_error(err: StripeError) -> ChargeError {
        match err {
            StripeError::Stripe(request_error)
                if request_error.error_type == ErrorType::Card =>
            {
                ChargeError::Declined {
                    reason: request_error
                        .message
                        .unwrap_or_else(|| "card declined".to_string()),
                }
            }
            other => ChargeError::Provider(Box::new(other)),
        }
    }
}

#[async_trait]
impl ChargeService for StripeGateway {
    async fn attempt_charge(&self, request: ChargeRequest) -> Result<Value, ChargeError> {
        let customer: CustomerId = request
            .customer_ref
            .parse()
            .map_err(|err| ChargeError::Provider(Box::new(err)))?;
        let currency: Currency = request
            .currency
            .to_lowercase()
            .parse()
            .map_err(|err| ChargeError::Provider(Box::new(err)))?;

        let mut params = CreateCharge::new();
        params.customer = Some(customer);
        params.amount = Some(request.amount_cents);
        params.currency = Some(currency);
        params.description = Some(&request.description);

        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(request.idempotency_key.clone()));
        let charge = Charge::create(&client, params)
            .await
            .map_err(Self::map_error)?;
        serde_json::to_value(&charge).map_err(|err| ChargeError::Provider(Box::new(err)))
    }

    async fn retrieve_customer(&self, customer_ref: &str) -> Result<Value, ChargeError> {
        let id: CustomerId = customer_ref
            .parse()
            .map_err(|err| ChargeError::Provider(Box::new(err)))?;
        let customer = Customer::retrieve(&self.client, &id, &["default_source"])
            .await
            .map_err(Self::map_error)?;
        serde_json::to_value(&customer).map_err(|err| ChargeError::Provider(Box::new(err)))
    }
}
