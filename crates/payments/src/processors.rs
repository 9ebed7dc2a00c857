//! Built-in settlement strategies

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use userpay_shared::BillingConfig;

use crate::charge::{ChargeError, ChargeRequest, ChargeService};
use crate::customers::CustomerVault;
use crate::error::PaymentResult;
use crate::models::Payment;
use crate::notify::Notifier;
use crate::processing::{Outcome, Processor};
use crate::store::Ledger;

/// Catch-all processor that never settles anything. It mails a "please pay"
/// notice and reports [`Outcome::Failure`] so the chain treats it as one
/// more strategy that did not collect money. Placed last, it guarantees a
/// human hears about every payment automation could not settle, unless an
/// earlier processor already terminated the chain.
pub struct PleasePayMail {
    notifier: Arc<dyn Notifier>,
    bcc: Vec<String>,
}

impl PleasePayMail {
    pub fn new(notifier: Arc<dyn Notifier>, config: &BillingConfig) -> Self {
        Self {
            notifier,
            bcc: config.managers.clone(),
        }
    }
}

#[async_trait]
impl Processor for PleasePayMail {
    fn name(&self) -> &'static str {
        "please-pay-mail"
    }

    async fn attempt(&self, _ledger: &Ledger, payment: &Payment) -> PaymentResult<Outcome> {
        let mut to = vec![payment.email.clone()];
        to.extend(self.bcc.iter().cloned());
        self.notifier
            .send(&payment.to_string(), "<No body>", &to)
            .await;
        // No success, but do not terminate processing.
        Ok(Outcome::Failure)
    }
}

/// Charge the user's stored payment method.
///
/// No stored customer record is a normal [`Outcome::Failure`]; a declined
/// charge notifies the user and terminates the chain; every other gateway
/// error propagates so the caller sees the batch iteration fail.
pub struct WithStripeCustomer {
    charge: Arc<dyn ChargeService>,
    vault: Arc<dyn CustomerVault>,
    notifier: Arc<dyn Notifier>,
    config: BillingConfig,
}

impl WithStripeCustomer {
    pub fn new(
        charge: Arc<dyn ChargeService>,
        vault: Arc<dyn CustomerVault>,
        notifier: Arc<dyn Notifier>,
        config: BillingConfig,
    ) -> Self {
        Self {
            charge,
            vault,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl Processor for WithStripeCustomer {
    fn name(&self) -> &'static str {
        "with-stripe-customer"
    }

    async fn attempt(&self, ledger: &Ledger, payment: &Payment) -> PaymentResult<Outcome> {
        let Some(mut customer) = self.vault.get(payment.user_id).await else {
            return Ok(Outcome::Failure);
        };

        if customer.is_stale(Utc::now()) {
            if let Some(refreshed) = self.vault.refresh(payment.user_id).await? {
                customer = refreshed;
            }
        }

        let items = ledger.items_of_payment(payment.id).await;
        let request = ChargeRequest {
            customer_ref: customer.customer_id.clone(),
            amount_cents: payment.amount_cents,
            currency: self.config.currency.clone(),
            idempotency_key: format!(
                "charge-{}-{}",
                payment.id.simple(),
                payment.amount_cents
            ),
            description: payment.description(&items),
        };

        match self.charge.attempt_charge(request).await {
            Ok(record) => Ok(Outcome::success("stripe", record.to_string())),
            Err(ChargeError::Declined { reason }) => {
                warn!(
                    payment = %payment,
                    email = %payment.email,
                    reason = %reason,
                    "failure charging the customer's card"
                );
                let mut to = vec![payment.email.clone()];
                to.extend(self.config.managers.iter().cloned());
                self.notifier.send(&payment.to_string(), &reason, &to).await;
                Ok(Outcome::Terminate)
            }
            Err(err) => Err(err.into()),
        }
    }
}
