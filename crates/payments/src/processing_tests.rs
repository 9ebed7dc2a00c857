// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Processor chain scenario tests
//!
//! Covers the short-circuit semantics of the chain, the cancel-on-failure
//! cleanup, the stored-customer processor (including the decline path that
//! must send exactly one notice), and error propagation for unexpected
//! gateway faults.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use userpay_shared::{BillingConfig, User};

use crate::customers::{CustomerRecord, CustomerVault, InMemoryVault};
use crate::error::PaymentError;
use crate::processing::{Outcome, Payments, Processor};
use crate::processors::{PleasePayMail, WithStripeCustomer};
use crate::reconcile::NoopReconciler;
use crate::store::Ledger;
use crate::testutil::{ChargeBehavior, FixedProcessor, MockCharge, RecordingNotifier};

fn payments() -> Payments {
    Payments::new(Ledger::new(), Arc::new(NoopReconciler))
}

async fn user_with_item(payments: &Payments, email: &str, amount_cents: i64) -> User {
    let user = User::new(email);
    payments.ledger().upsert_user(user.clone()).await;
    payments
        .ledger()
        .create_line_item(user.id, "Stuff", amount_cents)
        .await
        .unwrap();
    user
}

/// Stripe processor plus catch-all mail, wired against mocks.
struct Chain {
    payments: Payments,
    charge: Arc<MockCharge>,
    vault: Arc<InMemoryVault>,
    notifier: Arc<RecordingNotifier>,
    processors: Vec<Arc<dyn Processor>>,
}

fn chain(behavior: ChargeBehavior) -> Chain {
    let payments = payments();
    let charge = Arc::new(MockCharge::new(behavior));
    let vault = Arc::new(InMemoryVault::new(charge.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let config = BillingConfig::default();
    let processors: Vec<Arc<dyn Processor>> = vec![
        Arc::new(WithStripeCustomer::new(
            charge.clone(),
            vault.clone(),
            notifier.clone(),
            config.clone(),
        )),
        Arc::new(PleasePayMail::new(notifier.clone(), &config)),
    ];
    Chain {
        payments,
        charge,
        vault,
        notifier,
        processors,
    }
}

mod chain_semantics {
    use super::*;

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let payments = payments();
        let user = user_with_item(&payments, "test@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let failing = Arc::new(FixedProcessor::new(Outcome::Failure));
        let succeeding = Arc::new(FixedProcessor::new(Outcome::success("test", "{}")));
        let trailing = Arc::new(FixedProcessor::new(Outcome::Failure));
        let processors: Vec<Arc<dyn Processor>> =
            vec![failing.clone(), succeeding.clone(), trailing.clone()];

        let settled = payments
            .process_payment(payment.id, &processors, true)
            .await
            .unwrap();
        assert!(settled);
        assert_eq!(failing.call_count(), 1);
        assert_eq!(succeeding.call_count(), 1);
        assert_eq!(trailing.call_count(), 0);

        // Not cancelled; settled with the winning processor's data.
        let payment = payments.ledger().payment(payment.id).await.unwrap();
        assert!(payment.charged_at.is_some());
        assert_eq!(payment.provider.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn terminate_short_circuits_and_cancels_when_asked() {
        let payments = payments();
        let user = user_with_item(&payments, "test@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let terminating = Arc::new(FixedProcessor::new(Outcome::Terminate));
        let succeeding = Arc::new(FixedProcessor::new(Outcome::success("test", "{}")));
        let processors: Vec<Arc<dyn Processor>> = vec![terminating.clone(), succeeding.clone()];

        let settled = payments
            .process_payment(payment.id, &processors, true)
            .await
            .unwrap();
        assert!(!settled);
        assert_eq!(succeeding.call_count(), 0, "terminate must stop the chain");
        assert_eq!(payments.ledger().payment_count().await, 0);
        assert_eq!(payments.ledger().unbound_items(user.id).await.len(), 1);
    }

    #[tokio::test]
    async fn terminate_leaves_the_payment_pending_without_cancel_on_failure() {
        let payments = payments();
        let user = user_with_item(&payments, "test@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let processors: Vec<Arc<dyn Processor>> =
            vec![Arc::new(FixedProcessor::new(Outcome::Terminate))];
        let settled = payments
            .process_payment(payment.id, &processors, false)
            .await
            .unwrap();
        assert!(!settled);
        assert_eq!(payments.ledger().pending_payments().await.len(), 1);
        assert_eq!(payments.ledger().unbound_items(user.id).await.len(), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_cancels_when_asked() {
        let payments = payments();
        let user = user_with_item(&payments, "test@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let processors: Vec<Arc<dyn Processor>> = vec![
            Arc::new(FixedProcessor::new(Outcome::Failure)),
            Arc::new(FixedProcessor::new(Outcome::Failure)),
        ];
        let settled = payments
            .process_payment(payment.id, &processors, true)
            .await
            .unwrap();
        assert!(!settled);
        assert_eq!(payments.ledger().payment_count().await, 0);
        assert_eq!(payments.ledger().unbound_items(user.id).await.len(), 1);
    }

    #[tokio::test]
    async fn empty_chain_is_an_exhausted_chain() {
        let payments = payments();
        let user = user_with_item(&payments, "test@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let settled = payments.process_payment(payment.id, &[], true).await.unwrap();
        assert!(!settled);
        assert_eq!(payments.ledger().unbound_items(user.id).await.len(), 1);
    }
}

mod stored_customer_processing {
    use super::*;

    #[tokio::test]
    async fn charges_users_with_a_customer_record_and_mails_the_rest() {
        let c = chain(ChargeBehavior::Succeed);

        let charged = user_with_item(&c.payments, "test1@example.com", 500).await;
        c.vault
            .insert(CustomerRecord::new(charged.id, "cus_example"))
            .await;
        let mailed = user_with_item(&c.payments, "test2@example.com", 1000).await;

        c.payments
            .process_unbound_items(&c.processors)
            .await
            .unwrap();

        // One "please pay" mail for the user without a stored customer.
        let outbox = c.notifier.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].1, vec!["test2@example.com".to_string()]);

        // The second user's payment was cancelled again, the first settled.
        assert_eq!(c.payments.ledger().unbound_items(mailed.id).await.len(), 1);
        assert_eq!(c.payments.ledger().unbound_items(charged.id).await.len(), 0);
        assert_eq!(c.payments.ledger().unpaid_items(charged.id).await.len(), 0);
        assert_eq!(c.payments.ledger().payment_count().await, 1);
        assert_eq!(c.charge.request_count(), 1);
    }

    #[tokio::test]
    async fn charge_requests_carry_description_and_idempotency_key() {
        let c = chain(ChargeBehavior::Succeed);
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        c.vault
            .insert(CustomerRecord::new(user.id, "cus_example"))
            .await;

        c.payments
            .process_unbound_items(&c.processors)
            .await
            .unwrap();

        let requests = c.charge.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.amount_cents, 500);
        assert_eq!(request.currency, "CHF");
        assert_eq!(
            request.description,
            "Payment of 5.00 by test1@example.com: Stuff"
        );
        assert!(request.idempotency_key.starts_with("charge-"));
        assert!(request.idempotency_key.ends_with("-500"));
    }

    #[tokio::test]
    async fn a_decline_sends_exactly_one_notice() {
        let c = chain(ChargeBehavior::Decline("card expired".to_string()));
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        c.vault
            .insert(CustomerRecord::new(user.id, "cus_example"))
            .await;

        c.payments
            .process_unbound_items(&c.processors)
            .await
            .unwrap();

        // Decline notice only; the terminate outcome must keep the catch-all
        // "please pay" mail from also firing.
        assert_eq!(c.notifier.outbox().len(), 1);

        // The payment was cancelled and the item returned to the pool.
        assert_eq!(c.payments.ledger().payment_count().await, 0);
        assert_eq!(c.payments.ledger().unbound_items(user.id).await.len(), 1);
    }

    #[tokio::test]
    async fn stale_customer_records_are_refreshed_before_charging() {
        let c = chain(ChargeBehavior::Succeed);
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        let mut record = CustomerRecord::new(user.id, "cus_example");
        record.updated_at = Utc::now() - Duration::days(60);
        c.vault.insert(record).await;

        c.payments
            .process_unbound_items(&c.processors)
            .await
            .unwrap();

        let refreshed = c.vault.get(user.id).await.unwrap();
        assert_eq!(
            refreshed.customer,
            Some(serde_json::json!({"marker": true}))
        );
        assert!(!refreshed.is_stale(Utc::now()));
    }

    #[tokio::test]
    async fn unexpected_gateway_faults_propagate_after_cleanup() {
        let c = chain(ChargeBehavior::Fault("connection reset".to_string()));
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        c.vault
            .insert(CustomerRecord::new(user.id, "cus_example"))
            .await;

        let err = c
            .payments
            .process_unbound_items(&c.processors)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Charge(_)));

        // The cancel-on-failure cleanup still ran before the error escaped.
        assert_eq!(c.payments.ledger().payment_count().await, 0);
        assert_eq!(c.payments.ledger().unbound_items(user.id).await.len(), 1);
        // And the fault was not converted into a decline notice.
        assert!(c.notifier.outbox().is_empty());
    }

    #[tokio::test]
    async fn faults_during_retry_leave_the_payment_pending() {
        let c = chain(ChargeBehavior::Fault("connection reset".to_string()));
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        c.vault
            .insert(CustomerRecord::new(user.id, "cus_example"))
            .await;
        c.payments.create_pending(user.id, None).await.unwrap().unwrap();

        let err = c
            .payments
            .process_pending_payments(&c.processors)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Charge(_)));
        assert_eq!(c.payments.ledger().pending_payments().await.len(), 1);
    }
}

mod pending_payment_retry {
    use super::*;

    #[tokio::test]
    async fn retries_keep_unsettled_payments_for_the_next_pass() {
        let c = chain(ChargeBehavior::Succeed);
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        // No stored customer: only the catch-all mail applies.
        c.payments.create_pending(user.id, None).await.unwrap().unwrap();

        c.payments
            .process_pending_payments(&c.processors)
            .await
            .unwrap();

        assert_eq!(c.notifier.outbox().len(), 1);
        assert_eq!(c.payments.ledger().unbound_items(user.id).await.len(), 0);
        assert_eq!(c.payments.ledger().unpaid_items(user.id).await.len(), 1);
        let pending = c.payments.ledger().pending_payments().await;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].charged_at.is_none());
    }

    #[tokio::test]
    async fn a_retry_pass_can_settle_once_a_customer_appears() {
        let c = chain(ChargeBehavior::Succeed);
        let user = user_with_item(&c.payments, "test1@example.com", 500).await;
        let payment = c.payments.create_pending(user.id, None).await.unwrap().unwrap();

        c.payments
            .process_pending_payments(&c.processors)
            .await
            .unwrap();
        assert!(c.payments.ledger().payment(payment.id).await.unwrap().is_pending());

        c.vault
            .insert(CustomerRecord::new(user.id, "cus_example"))
            .await;
        c.payments
            .process_pending_payments(&c.processors)
            .await
            .unwrap();
        let settled = c.payments.ledger().payment(payment.id).await.unwrap();
        assert!(settled.charged_at.is_some());
        assert_eq!(settled.provider.as_deref(), Some("stripe"));
    }
}

mod manager_bcc {
    use super::*;

    #[tokio::test]
    async fn notices_bcc_the_configured_managers() {
        let payments = payments();
        let user = user_with_item(&payments, "test1@example.com", 500).await;
        let payment = payments.create_pending(user.id, None).await.unwrap().unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let config = BillingConfig {
            managers: vec!["ops@example.com".to_string()],
            ..BillingConfig::default()
        };
        let processors: Vec<Arc<dyn Processor>> =
            vec![Arc::new(PleasePayMail::new(notifier.clone(), &config))];

        let settled = payments
            .process_payment(payment.id, &processors, false)
            .await
            .unwrap();
        assert!(!settled);

        let outbox = notifier.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, "Pending payment of 5.00");
        assert_eq!(
            outbox[0].1,
            vec!["test1@example.com".to_string(), "ops@example.com".to_string()]
        );
    }
}

mod missing_rows {
    use super::*;

    #[tokio::test]
    async fn processing_an_unknown_payment_is_an_error() {
        let payments = payments();
        let missing = Uuid::new_v4();
        let err = payments.process_payment(missing, &[], true).await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentNotFound(id) if id == missing));
    }
}
