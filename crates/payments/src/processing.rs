//! Payment processing pipeline
//!
//! A payment runs through an ordered list of settlement strategies. Each
//! strategy reports exactly one of three outcomes:
//!
//! - [`Outcome::Success`]: the payment is settled, the chain stops.
//! - [`Outcome::Failure`]: this strategy does not apply or did not succeed;
//!   the next strategy runs.
//! - [`Outcome::Terminate`]: a definitive failure (e.g. the charge was
//!   attempted and declined); the chain stops without trying the rest.
//!
//! The set is closed: `Outcome` is a plain enum with no boolean conversion,
//! so a strategy cannot smuggle a truthy-but-wrong value into the chain.
//! Unexpected strategy errors are not outcomes at all; they run the
//! cancel-on-failure cleanup and then propagate to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};
use crate::models::Payment;
use crate::reconcile::Reconciler;
use crate::store::Ledger;

/// Outcome of one settlement strategy.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The strategy settled the payment. Carries the provider identifier and
    /// the provider's opaque transaction record; the chain persists both.
    Success {
        provider: String,
        transaction: String,
    },
    /// The strategy's preconditions were unmet or its attempt failed softly.
    Failure,
    /// Definitive failure; no further strategy must run.
    Terminate,
}

impl Outcome {
    pub fn success(provider: impl Into<String>, transaction: impl Into<String>) -> Self {
        Self::Success {
            provider: provider.into(),
            transaction: transaction.into(),
        }
    }
}

/// One settlement strategy, a link in the processor chain.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt to settle `payment`. `Err` is reserved for unexpected
    /// failures (e.g. a gateway network fault); expected declines map to
    /// [`Outcome::Terminate`].
    async fn attempt(&self, ledger: &Ledger, payment: &Payment) -> PaymentResult<Outcome>;
}

/// The payment aggregator: owns the ledger handle and the reconciler, and
/// drives the processor chain.
#[derive(Clone)]
pub struct Payments {
    ledger: Ledger,
    reconciler: Arc<dyn Reconciler>,
}

impl Payments {
    pub fn new(ledger: Ledger, reconciler: Arc<dyn Reconciler>) -> Self {
        Self { ledger, reconciler }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// See [`Ledger::create_pending`].
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        items: Option<&[Uuid]>,
    ) -> PaymentResult<Option<Payment>> {
        self.ledger.create_pending(user_id, items, None).await
    }

    /// See [`Ledger::cancel_pending`]. Cancelling never touches settled
    /// coverage, so no reconciliation is needed here.
    pub async fn cancel_pending(&self, payment_id: Uuid) -> PaymentResult<()> {
        self.ledger.cancel_pending(payment_id).await
    }

    /// Record a settlement and reconcile everything referencing the
    /// payment's line items.
    pub async fn settle(
        &self,
        payment_id: Uuid,
        provider: &str,
        transaction: String,
    ) -> PaymentResult<Payment> {
        let payment = self
            .ledger
            .mark_charged(payment_id, provider, transaction, Utc::now())
            .await?;
        let items = self.ledger.items_of_payment(payment_id).await;
        self.reconciler.reconcile(&self.ledger, &payment, &items).await;
        Ok(payment)
    }

    /// Revert a settled payment and reconcile. The affected line items are
    /// captured before the ledger unbinds them.
    pub async fn undo(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        let items = self.ledger.items_of_payment(payment_id).await;
        let payment = self.ledger.undo(payment_id).await?;
        self.reconciler.reconcile(&self.ledger, &payment, &items).await;
        Ok(payment)
    }

    /// Run the processor chain against one payment.
    ///
    /// Returns whether the payment was settled. When nothing settles it and
    /// `cancel_on_failure` is set, the pending payment is cancelled. This
    /// also happens when an unexpected processor error is about to
    /// propagate, so the cleanup is guaranteed either way.
    pub async fn process_payment(
        &self,
        payment_id: Uuid,
        processors: &[Arc<dyn Processor>],
        cancel_on_failure: bool,
    ) -> PaymentResult<bool> {
        let payment = self.ledger.payment(payment_id).await?;
        info!(payment = %payment, email = %payment.email, "processing");

        let mut success = false;
        let mut terminated = false;
        let mut pending_error: Option<PaymentError> = None;

        for processor in processors {
            match processor.attempt(&self.ledger, &payment).await {
                Ok(Outcome::Success {
                    provider,
                    transaction,
                }) => {
                    self.settle(payment.id, &provider, transaction).await?;
                    info!(
                        payment = %payment,
                        email = %payment.email,
                        processor = processor.name(),
                        "settled"
                    );
                    success = true;
                    break;
                }
                Ok(Outcome::Failure) => continue,
                Ok(Outcome::Terminate) => {
                    info!(
                        payment = %payment,
                        email = %payment.email,
                        processor = processor.name(),
                        "terminated by processor"
                    );
                    terminated = true;
                    break;
                }
                Err(err) => {
                    error!(
                        payment = %payment,
                        email = %payment.email,
                        processor = processor.name(),
                        error = %err,
                        "unexpected processor failure"
                    );
                    pending_error = Some(err);
                    break;
                }
            }
        }

        if !success {
            if !terminated && pending_error.is_none() {
                warn!(payment = %payment, email = %payment.email, "nobody could process");
            }
            if cancel_on_failure {
                warn!(payment = %payment, email = %payment.email, "cancelling");
                if let Err(cancel_err) = self.cancel_pending(payment.id).await {
                    error!(
                        payment_id = %payment.id,
                        error = %cancel_err,
                        "failed to cancel after unsuccessful processing"
                    );
                }
            }
        }

        match pending_error {
            Some(err) => Err(err),
            None => Ok(success),
        }
    }

    /// Aggregate every user's unbound line items into a pending payment and
    /// try settling it. Payments nobody could settle are cancelled again so
    /// the line items return to the unbound pool.
    pub async fn process_unbound_items(
        &self,
        processors: &[Arc<dyn Processor>],
    ) -> PaymentResult<()> {
        for user in self.ledger.users_with_unbound_items().await {
            let Some(payment) = self.ledger.create_pending(user.id, None, None).await? else {
                continue;
            };
            let _ = self.process_payment(payment.id, processors, true).await?;
        }
        Ok(())
    }

    /// Retry the chain for every payment that is still pending, keeping the
    /// payment around on renewed failure for a later pass.
    pub async fn process_pending_payments(
        &self,
        processors: &[Arc<dyn Processor>],
    ) -> PaymentResult<()> {
        for payment in self.ledger.pending_payments().await {
            let _ = self.process_payment(payment.id, processors, false).await?;
        }
        Ok(())
    }
}
